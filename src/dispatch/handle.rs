//! Handle for feeding the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::core::types::TaskId;

use super::types::{DispatchCommand, DispatchError, EnqueueOutcome};

/// Tasks currently executing, with a flag for a requested follow-up pass.
pub(crate) type InFlight = Arc<Mutex<HashMap<TaskId, bool>>>;

/// Cloneable handle to a running dispatcher.
#[derive(Clone)]
pub struct DispatchHandle {
    pub(crate) command_tx: mpsc::Sender<DispatchCommand>,
    pub(crate) in_flight: InFlight,
}

impl DispatchHandle {
    /// Ask for a task to be executed.
    ///
    /// Waits while the queue is full.
    pub async fn enqueue(&self, task_id: TaskId) -> Result<EnqueueOutcome, DispatchError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DispatchCommand::Run {
                task_id,
                response: response_tx,
            })
            .await
            .map_err(|_| DispatchError::ChannelError("failed to send run command".to_string()))?;

        response_rx.await.map_err(|_| {
            DispatchError::ChannelError("failed to receive run response".to_string())
        })?
    }

    /// Stop accepting work and wait for running tasks to finish.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DispatchCommand::Shutdown {
                response: response_tx,
            })
            .await
            .map_err(|_| {
                DispatchError::ChannelError("failed to send shutdown command".to_string())
            })?;

        response_rx.await.map_err(|_| {
            DispatchError::ChannelError("failed to receive shutdown response".to_string())
        })
    }

    /// Whether a task is executing or waiting for a worker.
    pub async fn is_in_flight(&self, task_id: TaskId) -> bool {
        self.in_flight.lock().await.contains_key(&task_id)
    }

    /// Number of tasks executing or waiting for a worker.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
