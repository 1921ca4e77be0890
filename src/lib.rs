//! secdet - an execution engine for security-detection scripts.
//!
//! A task runs a set of catalog cases against one target address. Each case
//! becomes an execution unit whose script is run under a timeout and mapped to
//! a pass/fail/error verdict. Task counters are rolled up after every unit and
//! state changes are streamed to live subscribers.
//!
//! The main pieces:
//!
//! - [`execution`]: script runner, result tracker, progress aggregator and the
//!   orchestrator that drives a task with stop and retry support
//! - [`dispatch`]: bounded worker pool fed by a run queue
//! - [`broadcast`]: per-task subscriber registry and WebSocket transport
//! - [`storage`]: in-memory and SQLite backends
//! - [`api`]: HTTP endpoints
//! - [`config`]: YAML engine settings and case catalog

pub mod api;
pub mod broadcast;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod events;
pub mod execution;
pub mod storage;
pub mod testing;

pub use broadcast::{Broadcaster, SendError, Subscriber};
pub use config::{ConfigError, EngineConfig, StorageConfig, YamlLoader};
pub use core::case::{Case, Category, RiskLevel, SortOrder};
pub use core::task::{ExecutionUnit, LiveStats, Task, TaskStatus, UnitStatus, Verdict};
pub use core::types::{CaseId, CategoryId, SubscriberId, TargetAddr, TaskId, UnitId, UserId};
pub use dispatch::{DispatchError, DispatchHandle, Dispatcher, EnqueueOutcome};
pub use events::{EventHandler, EventSender, LogHandler, TaskEvent};
pub use execution::{
    Orchestrator, OrchestratorError, RunSummary, ScriptRunner, StopOutcome, StopSignal,
    SubmitRequest, submit_task,
};
pub use storage::{InMemoryStorage, Storage, StorageError};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
