//! Drives a task from `pending` to a terminal state.
//!
//! The orchestrator walks a task's pending units in creation order, runs
//! each unit's script and records the verdict through the
//! [`ResultTracker`]. Cancellation is cooperative: the [`StopSignal`] is
//! polled before every unit, never while a script runs, and a pass ends as
//! soon as the stored task is no longer `running`. Stop and retry are also
//! handled here, since they touch the same task and unit records.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::progress::ProgressAggregator;
use super::runner::ScriptRunner;
use super::tracker::{ResultTracker, TrackerError};
use crate::core::case::Case;
use crate::core::task::{ExecutionUnit, LiveStats, Task, TaskStatus, UnitStatus, Verdict};
use crate::core::types::{CaseId, TaskId, UnitId};
use crate::events::{EventSender, TaskEvent};
use crate::storage::{Storage, StorageError};

/// Message recorded on units whose case disappeared from the catalog.
pub const CASE_NOT_FOUND: &str = "case not found";

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The task is not in a status that allows the operation.
    #[error("task {task_id} is {status}; cannot {operation}")]
    InvalidState {
        task_id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },

    /// Another pass over the same task is still in progress.
    #[error("task {0} already has a run in progress")]
    AlreadyRunning(TaskId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Tasks with a `run_task` pass in progress.
#[derive(Default)]
struct ActiveRuns {
    ids: Mutex<HashSet<TaskId>>,
}

impl ActiveRuns {
    fn claim(self: &Arc<Self>, task_id: TaskId) -> Option<ActiveRun> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(task_id).then(|| ActiveRun {
            runs: Arc::clone(self),
            task_id,
        })
    }
}

/// Released when the pass ends, including on cancellation.
struct ActiveRun {
    runs: Arc<ActiveRuns>,
    task_id: TaskId,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.runs
            .ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.task_id);
    }
}

/// Why the unit loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Exhausted,
    Stopped,
    /// The task left `running` some other way, e.g. stopped and re-queued.
    Superseded,
}

/// Read-only view of whether a task has been stopped.
#[async_trait]
pub trait StopSignal: Send + Sync {
    async fn is_stopped(&self, task_id: TaskId) -> Result<bool, StorageError>;
}

/// Catalog lookup used to resolve a unit's script.
#[async_trait]
pub trait CaseCatalog: Send + Sync {
    /// Look up a case; `None` when it does not exist.
    async fn lookup_case(&self, case_id: CaseId) -> Result<Option<Case>, StorageError>;
}

/// Stop signal backed by the stored task status.
pub struct StoredStopSignal<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> StoredStopSignal<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage> StopSignal for StoredStopSignal<S> {
    async fn is_stopped(&self, task_id: TaskId) -> Result<bool, StorageError> {
        Ok(self.storage.get_task(task_id).await?.status == TaskStatus::Stopped)
    }
}

/// Case catalog backed by storage.
pub struct StoredCatalog<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> StoredCatalog<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage> CaseCatalog for StoredCatalog<S> {
    async fn lookup_case(&self, case_id: CaseId) -> Result<Option<Case>, StorageError> {
        match self.storage.get_case(case_id).await {
            Ok(case) => Ok(Some(case)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Summary of one `run_task` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    /// The loop ended because the task was stopped.
    pub halted_by_stop: bool,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Executes tasks and applies stop/retry requests.
pub struct Orchestrator<S: Storage> {
    storage: Arc<S>,
    runner: Arc<ScriptRunner>,
    tracker: ResultTracker<S>,
    stop_signal: Arc<dyn StopSignal>,
    catalog: Arc<dyn CaseCatalog>,
    events: EventSender,
    active: Arc<ActiveRuns>,
}

impl<S: Storage> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            runner: Arc::clone(&self.runner),
            tracker: self.tracker.clone(),
            stop_signal: Arc::clone(&self.stop_signal),
            catalog: Arc::clone(&self.catalog),
            events: self.events.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: Storage + 'static> Orchestrator<S> {
    /// Create an orchestrator whose stop signal and catalog read from `storage`.
    pub fn new(storage: Arc<S>, runner: ScriptRunner, events: EventSender) -> Self {
        let stop_signal = Arc::new(StoredStopSignal::new(Arc::clone(&storage)));
        let catalog = Arc::new(StoredCatalog::new(Arc::clone(&storage)));
        let tracker = ResultTracker::new(
            Arc::clone(&storage),
            ProgressAggregator::new(Arc::clone(&storage)),
        );
        Self {
            storage,
            runner: Arc::new(runner),
            tracker,
            stop_signal,
            catalog,
            events,
            active: Arc::default(),
        }
    }

    /// Replace the stop signal.
    pub fn with_stop_signal(mut self, signal: Arc<dyn StopSignal>) -> Self {
        self.stop_signal = signal;
        self
    }

    /// Replace the case catalog.
    pub fn with_catalog(mut self, catalog: Arc<dyn CaseCatalog>) -> Self {
        self.catalog = catalog;
        self
    }
}

impl<S: Storage> Orchestrator<S> {
    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get the script runner.
    pub fn runner(&self) -> &ScriptRunner {
        &self.runner
    }

    fn progress(&self) -> &ProgressAggregator<S> {
        self.tracker.progress()
    }

    /// Current counters of a task.
    pub async fn stats(&self, task_id: TaskId) -> Result<LiveStats, OrchestratorError> {
        Ok(self.progress().stats(task_id).await?)
    }

    /// Execute every pending unit of a task.
    ///
    /// Per-unit failures are recorded on the unit. An error escaping the unit
    /// loop marks the task `error` and is returned. At most one pass per task
    /// runs at a time.
    pub async fn run_task(&self, task_id: TaskId) -> Result<RunSummary, OrchestratorError> {
        let Some(_active) = self.active.claim(task_id) else {
            return Err(OrchestratorError::AlreadyRunning(task_id));
        };
        let task = {
            let _guard = self.progress().lock().await;
            let mut task = self.storage.get_task(task_id).await?;
            if task.status != TaskStatus::Pending {
                return Err(OrchestratorError::InvalidState {
                    task_id,
                    status: task.status,
                    operation: "run",
                });
            }
            task.mark_running();
            self.storage.update_task(task.clone()).await?;
            task
        };
        tracing::info!(task_id = %task_id, target = %task.target, total = task.total, "task started");
        self.events.emit(TaskEvent::Status(task.stats()));

        let outcome = match self.drive(&task).await {
            Ok(end) => self
                .progress()
                .recompute(task_id)
                .await
                .map(|(task, _)| (task, end))
                .map_err(OrchestratorError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((task, end)) => {
                let halted_by_stop = end == LoopEnd::Stopped;
                if task.status == TaskStatus::Completed {
                    self.events.emit(TaskEvent::Complete(task.stats()));
                }
                tracing::info!(
                    task_id = %task_id,
                    status = %task.status,
                    halted_by_stop,
                    "task pass finished"
                );
                Ok(RunSummary {
                    task_id,
                    status: task.status,
                    passed: task.passed,
                    failed: task.failed,
                    errors: task.errors,
                    halted_by_stop,
                })
            }
            Err(e) => {
                self.fail_task(task_id, &e).await;
                Err(e)
            }
        }
    }

    /// Unit loop over the units that were pending when the pass started.
    async fn drive(&self, task: &Task) -> Result<LoopEnd, OrchestratorError> {
        let pending = self
            .storage
            .list_units_with_status(task.id, &[UnitStatus::Pending])
            .await?;

        for unit in pending {
            if self.stop_signal.is_stopped(task.id).await? {
                tracing::info!(task_id = %task.id, next_unit = %unit.id, "stop observed, halting");
                return Ok(LoopEnd::Stopped);
            }
            match self.storage.get_task(task.id).await?.status {
                TaskStatus::Running => {}
                TaskStatus::Stopped => {
                    tracing::info!(task_id = %task.id, next_unit = %unit.id, "task stopped, halting");
                    return Ok(LoopEnd::Stopped);
                }
                status => {
                    tracing::info!(task_id = %task.id, status = %status, "task left running, halting");
                    return Ok(LoopEnd::Superseded);
                }
            }

            let Some(case) = self.catalog.lookup_case(unit.case_id).await? else {
                tracing::warn!(task_id = %task.id, unit_id = %unit.id, case_id = %unit.case_id, "case not found");
                let result = self
                    .tracker
                    .resolve_pending(unit.id, Verdict::Error, Some(CASE_NOT_FOUND.to_string()))
                    .await;
                self.publish(unit.id, Verdict::Error, result)?;
                continue;
            };

            let running = match self.tracker.begin(unit.id).await {
                Ok(running) => {
                    self.events.emit(TaskEvent::unit(&running));
                    running
                }
                Err(TrackerError::InvalidState { status, .. }) => {
                    tracing::debug!(unit_id = %unit.id, status = %status, "unit no longer pending, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let outcome = self
                .runner
                .run(&case.script_path, task.target, task.id, unit.id)
                .await;
            let result = self
                .tracker
                .complete(&running, outcome.verdict, outcome.message, outcome.log_path)
                .await;
            self.publish(unit.id, outcome.verdict, result)?;
        }

        Ok(LoopEnd::Exhausted)
    }

    /// Emit the events of a recorded verdict; a rejected one is only logged.
    fn publish(
        &self,
        unit_id: UnitId,
        verdict: Verdict,
        result: Result<(ExecutionUnit, LiveStats), TrackerError>,
    ) -> Result<(), OrchestratorError> {
        match result {
            Ok((unit, stats)) => {
                self.events.emit(TaskEvent::unit(&unit));
                self.events.emit(TaskEvent::Progress(stats));
                Ok(())
            }
            Err(TrackerError::InvalidState { status, .. }) => {
                tracing::warn!(
                    unit_id = %unit_id,
                    status = %status,
                    verdict = %verdict,
                    "discarding verdict for unit no longer in this run"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a running task `error`. A task that was stopped or re-queued
    /// meanwhile keeps its status.
    async fn fail_task(&self, task_id: TaskId, error: &OrchestratorError) {
        let message = error.to_string();

        let _guard = self.progress().lock().await;
        let result: Result<Option<TaskStatus>, StorageError> = async {
            let mut task = self.storage.get_task(task_id).await?;
            if task.status != TaskStatus::Running {
                return Ok(Some(task.status));
            }
            task.mark_error(message.clone());
            self.storage.update_task(task).await?;
            Ok(None)
        }
        .await;
        match result {
            Ok(None) => {
                tracing::error!(task_id = %task_id, error = %message, "task aborted");
                self.events.emit(TaskEvent::engine_error(task_id, message));
            }
            Ok(Some(status)) => {
                tracing::warn!(task_id = %task_id, status = %status, error = %message, "run failed after task left running");
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %message, "task aborted");
                tracing::error!(task_id = %task_id, error = %e, "failed to record task error");
                self.events.emit(TaskEvent::engine_error(task_id, message));
            }
        }
    }

    /// Stop a pending or running task.
    ///
    /// Every open unit is moved to `error`. A script already running is
    /// left to finish; its verdict is discarded.
    pub async fn stop(&self, task_id: TaskId) -> Result<StopOutcome, OrchestratorError> {
        let guard = self.progress().lock().await;
        let mut task = self.storage.get_task(task_id).await?;
        match task.status {
            TaskStatus::Stopped => return Ok(StopOutcome::AlreadyStopped),
            TaskStatus::Pending | TaskStatus::Running => {}
            status => {
                return Err(OrchestratorError::InvalidState {
                    task_id,
                    status,
                    operation: "stop",
                });
            }
        }

        task.mark_stopped();
        self.storage.update_task(task).await?;
        let cancelled = self.storage.stop_open_units(task_id).await?;
        let (_, stats) = self.progress().recompute_held(&guard, task_id).await?;
        drop(guard);

        tracing::info!(task_id = %task_id, cancelled_units = cancelled, "task stopped");
        self.events.emit(TaskEvent::Progress(stats.clone()));
        self.events.emit(TaskEvent::Complete(stats));
        Ok(StopOutcome::Stopped)
    }

    /// Re-queue errored units of a finished task.
    ///
    /// Units whose retry count has reached `max_retries` are skipped. Returns
    /// the number of units re-queued; zero leaves the task untouched.
    pub async fn retry(&self, task_id: TaskId, max_retries: u32) -> Result<usize, OrchestratorError> {
        let guard = self.progress().lock().await;
        let task = self.storage.get_task(task_id).await?;
        if !task.status.is_retryable() {
            return Err(OrchestratorError::InvalidState {
                task_id,
                status: task.status,
                operation: "retry",
            });
        }

        let eligible: Vec<_> = self
            .storage
            .list_units_with_status(task_id, &[UnitStatus::Error])
            .await?
            .into_iter()
            .filter(|unit| unit.retry_count < max_retries)
            .collect();
        if eligible.is_empty() {
            tracing::info!(task_id = %task_id, max_retries, "no units eligible for retry");
            return Ok(0);
        }

        for unit in &eligible {
            self.tracker.retry(&guard, unit.id).await?;
        }

        let mut task = self.storage.get_task(task_id).await?;
        task.reset_pending();
        self.storage.update_task(task).await?;
        let (_, stats) = self.progress().recompute_held(&guard, task_id).await?;
        drop(guard);

        tracing::info!(task_id = %task_id, retried = eligible.len(), "task re-queued");
        self.events.emit(TaskEvent::Progress(stats));
        Ok(eligible.len())
    }
}
