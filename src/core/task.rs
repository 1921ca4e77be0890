//! Task and execution-unit records.
//!
//! A [`Task`] is one detection run against a target; it owns one
//! [`ExecutionUnit`] per selected case. The status enums here encode the
//! lifecycle rules the engine enforces; the mutation helpers only stamp
//! fields and never check transitions themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::types::{CaseId, TargetAddr, TaskId, UnitId, UserId};

/// Message stored on units that were cancelled by a stop request.
pub const STOPPED_BY_USER: &str = "task stopped by user";

/// Status of a detection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created or re-queued, waiting for a worker.
    Pending,
    /// A worker is executing units.
    Running,
    /// Every unit reached a terminal status.
    Completed,
    /// Stopped by the user.
    Stopped,
    /// Aborted by an engine-level failure.
    Error,
}

impl TaskStatus {
    /// Wire/storage name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Error => "error",
        }
    }

    /// Whether the task has finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Stopped | TaskStatus::Error
        )
    }

    /// Whether a stop request may act on this status.
    pub fn is_stoppable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Whether a retry request may act on this status.
    pub fn is_retryable(self) -> bool {
        self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "stopped" => Ok(TaskStatus::Stopped),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Outcome of running one script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The check passed (exit code 0).
    Pass,
    /// The check found a problem (exit code 1).
    Fail,
    /// The check could not produce a verdict.
    Error,
}

impl Verdict {
    /// Map a script exit code onto a verdict.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Verdict::Pass,
            1 => Verdict::Fail,
            _ => Verdict::Error,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(UnitStatus::from(*self).as_str())
    }
}

/// Status of one execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Pass,
    Fail,
    Error,
}

impl UnitStatus {
    /// Wire/storage name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Pass => "pass",
            UnitStatus::Fail => "fail",
            UnitStatus::Error => "error",
        }
    }

    /// Whether the unit carries a verdict.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Pass | UnitStatus::Fail | UnitStatus::Error)
    }
}

impl From<Verdict> for UnitStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => UnitStatus::Pass,
            Verdict::Fail => UnitStatus::Fail,
            Verdict::Error => UnitStatus::Error,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitStatus::Pending),
            "running" => Ok(UnitStatus::Running),
            "pass" => Ok(UnitStatus::Pass),
            "fail" => Ok(UnitStatus::Fail),
            "error" => Ok(UnitStatus::Error),
            other => Err(format!("unknown unit status: {}", other)),
        }
    }
}

/// A detection task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub target: TargetAddr,
    pub user_id: UserId,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub total: u32,
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Message captured when the engine aborted the task.
    pub error_message: Option<String>,
}

impl Task {
    /// Create a pending task. The id is assigned by storage on insert.
    pub fn new(target: TargetAddr, user_id: UserId, total: u32) -> Self {
        Self {
            id: TaskId::new(0),
            target,
            user_id,
            description: None,
            status: TaskStatus::Pending,
            total,
            completed: 0,
            passed: 0,
            failed: 0,
            errors: 0,
            start_time: None,
            end_time: None,
            created_at: Utc::now(),
            error_message: None,
        }
    }

    /// Attach a free-text description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the task as running.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
    }

    /// Mark the task as completed.
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Mark the task as stopped by the user.
    pub fn mark_stopped(&mut self) {
        self.status = TaskStatus::Stopped;
        self.end_time = Some(Utc::now());
    }

    /// Mark the task as aborted by an engine failure.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.end_time = Some(Utc::now());
        self.error_message = Some(message.into());
    }

    /// Put the task back in the queue after a retry.
    pub fn reset_pending(&mut self) {
        self.status = TaskStatus::Pending;
        self.end_time = None;
        self.error_message = None;
    }

    /// Snapshot of the task's counters.
    pub fn stats(&self) -> LiveStats {
        LiveStats::from(self)
    }
}

/// One script's execution within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub id: UnitId,
    pub task_id: TaskId,
    pub case_id: CaseId,
    pub status: UnitStatus,
    pub retry_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub log_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionUnit {
    /// Create a pending unit. The id is assigned by storage on insert.
    pub fn new(task_id: TaskId, case_id: CaseId) -> Self {
        Self {
            id: UnitId::new(0),
            task_id,
            case_id,
            status: UnitStatus::Pending,
            retry_count: 0,
            start_time: None,
            end_time: None,
            log_path: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the unit as running.
    pub fn mark_running(&mut self) {
        self.status = UnitStatus::Running;
        self.start_time = Some(Utc::now());
    }

    /// Record the unit's verdict.
    pub fn mark_finished(
        &mut self,
        verdict: Verdict,
        message: Option<String>,
        log_path: Option<PathBuf>,
    ) {
        self.status = verdict.into();
        self.end_time = Some(Utc::now());
        self.error_message = message;
        self.log_path = log_path;
    }

    /// Cancel the unit because its task was stopped.
    pub fn mark_stopped(&mut self) {
        self.status = UnitStatus::Error;
        self.error_message = Some(STOPPED_BY_USER.to_string());
    }

    /// Re-queue the unit for another attempt.
    pub fn reset_for_retry(&mut self) {
        self.retry_count += 1;
        self.status = UnitStatus::Pending;
        self.start_time = None;
        self.end_time = None;
        self.error_message = None;
    }
}

/// Live counters for a task, as served to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStats {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub total: u32,
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
    pub error: u32,
    pub progress_percent: f64,
}

impl From<&Task> for LiveStats {
    fn from(task: &Task) -> Self {
        let progress = if task.total > 0 {
            (f64::from(task.completed) / f64::from(task.total) * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            task_id: task.id,
            status: task.status,
            total: task.total,
            completed: task.completed,
            passed: task.passed,
            failed: task.failed,
            error: task.errors,
            progress_percent: progress,
        }
    }
}
