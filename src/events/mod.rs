//! Task lifecycle events and the channel that carries them.
//!
//! The orchestrator never talks to subscribers directly. It emits
//! [`TaskEvent`]s on an [`EventSender`]; a pump task drains the matching
//! [`EventReceiver`] and hands each event to registered [`EventHandler`]s
//! (the broadcaster, a log sink in the CLI). Emitting never blocks a worker.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::task::{ExecutionUnit, LiveStats, UnitStatus};
use crate::core::types::{CaseId, TaskId, UnitId};

/// A single unit transition, as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitUpdate {
    pub task_id: TaskId,
    pub unit_id: UnitId,
    pub case_id: CaseId,
    pub status: UnitStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl From<&ExecutionUnit> for UnitUpdate {
    fn from(unit: &ExecutionUnit) -> Self {
        Self {
            task_id: unit.task_id,
            unit_id: unit.id,
            case_id: unit.case_id,
            status: unit.status,
            retry_count: unit.retry_count,
            error_message: unit.error_message.clone(),
            log_path: unit.log_path.clone(),
        }
    }
}

/// Engine-level failure report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineFailure {
    pub task_id: TaskId,
    pub message: String,
}

/// Events emitted while a task executes.
///
/// Serializes to the subscriber wire shape `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TaskEvent {
    /// Full snapshot; also sent once to each new subscriber.
    Status(LiveStats),
    /// One unit changed status.
    Result(UnitUpdate),
    /// Counters changed.
    Progress(LiveStats),
    /// The task reached a terminal state.
    Complete(LiveStats),
    /// The engine aborted the task.
    Error(EngineFailure),
}

impl TaskEvent {
    /// The task this event belongs to.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Status(stats) | TaskEvent::Progress(stats) | TaskEvent::Complete(stats) => {
                stats.task_id
            }
            TaskEvent::Result(update) => update.task_id,
            TaskEvent::Error(failure) => failure.task_id,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Status(_) => "status",
            TaskEvent::Result(_) => "result",
            TaskEvent::Progress(_) => "progress",
            TaskEvent::Complete(_) => "complete",
            TaskEvent::Error(_) => "error",
        }
    }

    /// Create a Result event from a unit record.
    pub fn unit(unit: &ExecutionUnit) -> Self {
        TaskEvent::Result(UnitUpdate::from(unit))
    }

    /// Create an Error event.
    pub fn engine_error(task_id: TaskId, message: impl Into<String>) -> Self {
        TaskEvent::Error(EngineFailure {
            task_id,
            message: message.into(),
        })
    }

    /// Render the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Sending half of the event channel.
///
/// Cloneable; one per worker is fine. Emitting after the receiver has been
/// dropped is a no-op.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl EventSender {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops every event.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Emit an event.
    pub fn emit(&self, event: TaskEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            tracing::debug!("event receiver dropped, discarding event");
        }
    }
}

/// Handler for receiving task events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &TaskEvent);
}

/// Drain `receiver`, handing every event to each handler in order.
///
/// Returns once every [`EventSender`] has been dropped.
pub async fn pump(mut receiver: EventReceiver, handlers: Vec<Arc<dyn EventHandler>>) {
    while let Some(event) = receiver.recv().await {
        for handler in &handlers {
            handler.handle(&event).await;
        }
    }
    tracing::debug!("event channel closed");
}

/// Handler that writes every event to the log.
pub struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    async fn handle(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Result(update) => tracing::info!(
                task_id = %update.task_id,
                unit_id = %update.unit_id,
                case_id = %update.case_id,
                status = %update.status,
                "unit status changed"
            ),
            TaskEvent::Progress(stats) => tracing::info!(
                task_id = %stats.task_id,
                completed = stats.completed,
                total = stats.total,
                progress = stats.progress_percent,
                "task progress"
            ),
            TaskEvent::Complete(stats) | TaskEvent::Status(stats) => tracing::info!(
                task_id = %stats.task_id,
                status = %stats.status,
                passed = stats.passed,
                failed = stats.failed,
                errors = stats.error,
                "task {}",
                event.kind()
            ),
            TaskEvent::Error(failure) => tracing::error!(
                task_id = %failure.task_id,
                error = %failure.message,
                "task aborted"
            ),
        }
    }
}
