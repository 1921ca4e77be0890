//! API request handlers.

use axum::{
    Json,
    body::Bytes,
    extract::ws::rejection::WebSocketUpgradeRejection,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;

use crate::broadcast::Broadcaster;
use crate::broadcast::ws::serve_socket;
use crate::core::task::LiveStats;
use crate::core::types::{TargetAddr, TaskId, UserId};
use crate::dispatch::DispatchHandle;
use crate::execution::{Orchestrator, StopOutcome, SubmitRequest, submit_task};
use crate::storage::Storage;

use super::errors::ApiError;
use super::responses::{
    HealthResponse, RetryRequest, RetryResponse, StopResponse, SubmitResponse, SubmitTaskRequest,
    TaskDetailResponse, TaskResponse, UnitResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: Storage> {
    pub orchestrator: Orchestrator<S>,
    pub broadcaster: Broadcaster,
    pub dispatch: DispatchHandle,
    /// Retry limit used when a request does not name one.
    pub max_retries: u32,
    pub heartbeat: Duration,
}

impl<S: Storage> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            broadcaster: self.broadcaster.clone(),
            dispatch: self.dispatch.clone(),
            max_retries: self.max_retries,
            heartbeat: self.heartbeat,
        }
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Create a task and queue it for execution.
pub async fn submit<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(body): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let target =
        TargetAddr::parse(&body.target).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut request = SubmitRequest::new(target, UserId::new(body.user_id));
    request.description = body.description;
    request.case_ids = body.case_ids;

    let (task, _units) = submit_task(state.orchestrator.storage().as_ref(), request).await?;

    let queued = match state.dispatch.enqueue(task.id).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "failed to queue submitted task");
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            task: TaskResponse::from(&task),
            queued,
        }),
    ))
}

/// Get a task with its units.
pub async fn get_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskDetailResponse>, ApiError> {
    let storage = state.orchestrator.storage();
    let task = storage.get_task(task_id).await?;
    let units = storage.list_units(task_id).await?;
    Ok(Json(TaskDetailResponse {
        task: TaskResponse::from(&task),
        units: units.into_iter().map(UnitResponse::from).collect(),
    }))
}

/// Live counters of a task.
pub async fn get_stats<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<LiveStats>, ApiError> {
    Ok(Json(state.orchestrator.stats(task_id).await?))
}

/// Stop a task.
pub async fn stop_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<StopResponse>, ApiError> {
    let message = match state.orchestrator.stop(task_id).await? {
        StopOutcome::Stopped => "task stopped",
        StopOutcome::AlreadyStopped => "task already stopped",
    };
    let stats = state.orchestrator.stats(task_id).await?;
    Ok(Json(StopResponse {
        message: message.to_string(),
        stats,
    }))
}

/// Re-queue the errored units of a task.
///
/// The body is optional; `{"max_retries": N}` overrides the configured limit.
pub async fn retry_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(task_id): Path<TaskId>,
    body: Bytes,
) -> Result<Json<RetryResponse>, ApiError> {
    let request: RetryRequest = if body.is_empty() {
        RetryRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let max_retries = request.max_retries.unwrap_or(state.max_retries);

    let retried = state.orchestrator.retry(task_id, max_retries).await?;
    let queued = if retried > 0 {
        state.dispatch.enqueue(task_id).await?;
        true
    } else {
        false
    };

    let stats = state.orchestrator.stats(task_id).await?;
    Ok(Json(RetryResponse {
        retried,
        queued,
        stats,
    }))
}

/// Upgrade to a live event stream for one task.
///
/// An unknown task is answered with 404 before the upgrade is considered.
pub async fn watch_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(task_id): Path<TaskId>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    state.orchestrator.storage().get_task(task_id).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let ApiState {
        orchestrator,
        broadcaster,
        heartbeat,
        ..
    } = state;

    Ok(ws.on_upgrade(move |socket| {
        serve_socket(socket, task_id, broadcaster, heartbeat, move || async move {
            orchestrator.stats(task_id).await.ok()
        })
    }))
}
