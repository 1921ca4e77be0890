//! Task-level progress rollup.
//!
//! [`ProgressAggregator`] is the only writer of a task's counters. It also
//! owns the engine-wide gate that serializes every read-modify-write of task
//! and unit records across all tasks and workers, so a stop can never be
//! overwritten by a recompute that read the task just before it. Scripts run
//! outside the gate; only the storage round-trips of a transition hold it.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::task::{LiveStats, Task, TaskStatus, UnitStatus};
use crate::core::types::TaskId;
use crate::storage::{Storage, StorageError};

/// Proof that the caller holds the engine-wide gate.
///
/// Released on drop.
pub struct EngineGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Recomputes task counters from unit records.
pub struct ProgressAggregator<S: Storage> {
    storage: Arc<S>,
    gate: Arc<Mutex<()>>,
}

impl<S: Storage> Clone for ProgressAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<S: Storage> ProgressAggregator<S> {
    /// Create an aggregator over the given storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the engine-wide gate for a multi-step update.
    pub async fn lock(&self) -> EngineGuard {
        EngineGuard {
            _guard: Arc::clone(&self.gate).lock_owned().await,
        }
    }

    /// Recompute a task's counters and detect completion.
    pub async fn recompute(&self, task_id: TaskId) -> Result<(Task, LiveStats), StorageError> {
        let guard = self.lock().await;
        self.recompute_held(&guard, task_id).await
    }

    /// Same as [`recompute`](Self::recompute) for a caller already holding the gate.
    pub async fn recompute_held(
        &self,
        _guard: &EngineGuard,
        task_id: TaskId,
    ) -> Result<(Task, LiveStats), StorageError> {
        let mut task = self.storage.get_task(task_id).await?;
        let units = self.storage.list_units(task_id).await?;

        let (mut passed, mut failed, mut errors) = (0u32, 0u32, 0u32);
        for unit in &units {
            match unit.status {
                UnitStatus::Pass => passed += 1,
                UnitStatus::Fail => failed += 1,
                UnitStatus::Error => errors += 1,
                UnitStatus::Pending | UnitStatus::Running => {}
            }
        }
        task.passed = passed;
        task.failed = failed;
        task.errors = errors;
        task.completed = passed + failed + errors;

        // Only a running task can complete; a re-queued or aborted task keeps its status.
        if task.completed == task.total && task.status == TaskStatus::Running {
            task.mark_completed();
            tracing::info!(
                task_id = %task_id,
                passed,
                failed,
                errors,
                "task completed"
            );
        }

        self.storage.update_task(task.clone()).await?;
        let stats = task.stats();
        Ok((task, stats))
    }

    /// Read-only snapshot of a task's counters.
    pub async fn stats(&self, task_id: TaskId) -> Result<LiveStats, StorageError> {
        Ok(self.storage.get_task(task_id).await?.stats())
    }
}
