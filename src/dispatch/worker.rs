//! Dispatcher loop and worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::core::types::TaskId;
use crate::execution::{Orchestrator, OrchestratorError};
use crate::storage::Storage;

use super::handle::{DispatchHandle, InFlight};
use super::types::{DispatchCommand, DispatchError, EnqueueOutcome};

/// Default number of tasks executed at once.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Default number of requests buffered before `enqueue` waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Executes queued tasks through an [`Orchestrator`].
pub struct Dispatcher<S: Storage> {
    orchestrator: Orchestrator<S>,
    worker_concurrency: usize,
    queue_capacity: usize,
}

impl<S: Storage + 'static> Dispatcher<S> {
    pub fn new(orchestrator: Orchestrator<S>) -> Self {
        Self {
            orchestrator,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the number of tasks executed at once. Zero is treated as one.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers.max(1);
        self
    }

    /// Set the request buffer size. Zero is treated as one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Start the dispatcher and return a handle for controlling it.
    pub fn start(self) -> (DispatchHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(self.queue_capacity);
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        let handle = DispatchHandle {
            command_tx,
            in_flight: in_flight.clone(),
        };

        let join_handle = tokio::spawn(self.run(command_rx, in_flight));
        (handle, join_handle)
    }

    async fn run(self, mut command_rx: mpsc::Receiver<DispatchCommand>, in_flight: InFlight) {
        tracing::info!(
            workers = self.worker_concurrency,
            queue_capacity = self.queue_capacity,
            "dispatcher started"
        );

        let permits = Arc::new(Semaphore::new(self.worker_concurrency));
        let mut workers = JoinSet::new();
        let mut shutdown_acks: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(DispatchCommand::Run { task_id, response }) => {
                        let outcome = admit(&in_flight, task_id).await;
                        if outcome == EnqueueOutcome::Queued {
                            workers.spawn(execute(
                                self.orchestrator.clone(),
                                permits.clone(),
                                in_flight.clone(),
                                task_id,
                            ));
                        }
                        let _ = response.send(Ok(outcome));
                    }
                    Some(DispatchCommand::Shutdown { response }) => {
                        shutdown_acks.push(response);
                        break;
                    }
                    None => break,
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "dispatch worker panicked");
                    }
                }
            }
        }

        tracing::info!(running = workers.len(), "dispatcher shutting down");

        command_rx.close();
        while let Some(command) = command_rx.recv().await {
            match command {
                DispatchCommand::Run { response, .. } => {
                    let _ = response.send(Err(DispatchError::ShuttingDown));
                }
                DispatchCommand::Shutdown { response } => shutdown_acks.push(response),
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }

        for ack in shutdown_acks {
            let _ = ack.send(());
        }
        tracing::info!("dispatcher stopped");
    }
}

/// Record a run request. A task already in flight gets one follow-up pass.
async fn admit(in_flight: &InFlight, task_id: TaskId) -> EnqueueOutcome {
    let mut in_flight = in_flight.lock().await;
    match in_flight.get_mut(&task_id) {
        Some(rerun) => {
            *rerun = true;
            tracing::debug!(task_id = %task_id, "task already in flight");
            EnqueueOutcome::AlreadyInFlight
        }
        None => {
            in_flight.insert(task_id, false);
            EnqueueOutcome::Queued
        }
    }
}

async fn execute<S: Storage + 'static>(
    orchestrator: Orchestrator<S>,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
    task_id: TaskId,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        in_flight.lock().await.remove(&task_id);
        return;
    };

    loop {
        match orchestrator.run_task(task_id).await {
            Ok(summary) => tracing::info!(
                task_id = %task_id,
                status = %summary.status,
                passed = summary.passed,
                failed = summary.failed,
                errors = summary.errors,
                "dispatched task finished"
            ),
            Err(e @ (OrchestratorError::InvalidState { .. } | OrchestratorError::AlreadyRunning(_))) => {
                tracing::debug!(task_id = %task_id, reason = %e, "task not runnable")
            }
            Err(e) => tracing::error!(task_id = %task_id, error = %e, "dispatched task failed"),
        }

        let mut in_flight = in_flight.lock().await;
        match in_flight.get_mut(&task_id) {
            Some(rerun) if *rerun => *rerun = false,
            _ => {
                in_flight.remove(&task_id);
                break;
            }
        }
    }
}
