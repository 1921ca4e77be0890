//! Task execution engine.
//!
//! This module provides the execution infrastructure for detection tasks:
//! running scripts, tracking unit results, rolling up progress, and driving
//! a task end-to-end with stop and retry support.

mod orchestrator;
mod progress;
mod runner;
mod submit;
mod tracker;

pub use orchestrator::{
    CASE_NOT_FOUND, CaseCatalog, Orchestrator, OrchestratorError, RunSummary, StopOutcome,
    StopSignal, StoredCatalog, StoredStopSignal,
};
pub use progress::{EngineGuard, ProgressAggregator};
pub use runner::{
    DEFAULT_SCRIPT_TIMEOUT, RunOutcome, RunnerError, ScriptKind, ScriptRunner, ScriptRunnerBuilder,
};
pub use submit::{SubmitError, SubmitRequest, submit_task};
pub use tracker::{ResultTracker, TrackerError};
