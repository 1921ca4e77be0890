//! Dispatch type definitions.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::types::TaskId;

/// Errors that can occur when talking to the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher loop is gone.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// The dispatcher is shutting down and takes no new work.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// What happened to an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A worker will pick the task up.
    Queued,
    /// The task is already executing; one more pass will follow it.
    AlreadyInFlight,
}

/// Commands that can be sent to the dispatcher.
pub(crate) enum DispatchCommand {
    Run {
        task_id: TaskId,
        response: oneshot::Sender<Result<EnqueueOutcome, DispatchError>>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}
