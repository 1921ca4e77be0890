//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::{ExecutionUnit, LiveStats, Task};
use crate::core::types::CaseId;

/// Convert a timestamp to milliseconds since Unix epoch.
fn to_millis(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(|t| t.timestamp_millis())
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Body of `POST /api/tasks`.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub target: String,
    pub user_id: i64,
    pub description: Option<String>,
    /// Omitted selects every enabled case.
    pub case_ids: Option<Vec<CaseId>>,
}

/// Optional body of `POST /api/tasks/{id}/retry`.
#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    pub max_retries: Option<u32>,
}

/// Task record.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: i64,
    pub target: String,
    pub user_id: i64,
    pub description: Option<String>,
    pub status: String,
    pub total: u32,
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
    pub error: u32,
    pub progress_percent: f64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub created_at: i64,
    pub error_message: Option<String>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.get(),
            target: task.target.to_string(),
            user_id: task.user_id.get(),
            description: task.description.clone(),
            status: task.status.to_string(),
            total: task.total,
            completed: task.completed,
            passed: task.passed,
            failed: task.failed,
            error: task.errors,
            progress_percent: task.stats().progress_percent,
            start_time: to_millis(task.start_time),
            end_time: to_millis(task.end_time),
            created_at: task.created_at.timestamp_millis(),
            error_message: task.error_message.clone(),
        }
    }
}

/// One execution unit.
#[derive(Debug, Serialize)]
pub struct UnitResponse {
    pub id: i64,
    pub case_id: i64,
    pub status: String,
    pub retry_count: u32,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub log_path: Option<String>,
    pub error_message: Option<String>,
}

impl From<ExecutionUnit> for UnitResponse {
    fn from(unit: ExecutionUnit) -> Self {
        Self {
            id: unit.id.get(),
            case_id: unit.case_id.get(),
            status: unit.status.to_string(),
            retry_count: unit.retry_count,
            start_time: to_millis(unit.start_time),
            end_time: to_millis(unit.end_time),
            log_path: unit.log_path.map(|p| p.display().to_string()),
            error_message: unit.error_message,
        }
    }
}

/// Task with its units.
#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: TaskResponse,
    pub units: Vec<UnitResponse>,
}

/// Result of a submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task: TaskResponse,
    pub queued: bool,
}

/// Result of a stop request.
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub message: String,
    pub stats: LiveStats,
}

/// Result of a retry request.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub retried: usize,
    pub queued: bool,
    pub stats: LiveStats,
}
