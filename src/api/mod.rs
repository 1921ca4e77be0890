//! HTTP API module for the secdet engine.
//!
//! Provides REST endpoints for submitting, inspecting, stopping and retrying
//! tasks, plus a WebSocket endpoint streaming live task events.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::broadcast::Broadcaster;
use crate::config::{ApiConfig, EngineConfig};
use crate::dispatch::DispatchHandle;
use crate::execution::Orchestrator;
use crate::storage::Storage;

/// Build the API router with all endpoints.
pub fn build_router<S: Storage + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Tasks
        .route("/api/tasks", post(handlers::submit::<S>))
        .route("/api/tasks/{task_id}", get(handlers::get_task::<S>))
        .route("/api/tasks/{task_id}/stats", get(handlers::get_stats::<S>))
        .route("/api/tasks/{task_id}/stop", post(handlers::stop_task::<S>))
        .route("/api/tasks/{task_id}/retry", post(handlers::retry_task::<S>))
        // Live events
        .route("/api/ws/tasks/{task_id}", get(handlers::watch_task::<S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from engine components.
pub fn create_api_state<S: Storage>(
    orchestrator: Orchestrator<S>,
    broadcaster: Broadcaster,
    dispatch: DispatchHandle,
    config: &EngineConfig,
) -> ApiState<S> {
    ApiState {
        orchestrator,
        broadcaster,
        dispatch,
        max_retries: config.max_retries,
        heartbeat: config.heartbeat_interval(),
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Storage + 'static>(
    config: &ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.bind_addr();

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
