//! API integration tests.
//!
//! These tests drive the router in-process with `oneshot` requests.

use secdet::api::{build_router, create_api_state};
use secdet::testing::TestHarness;
use secdet::{Broadcaster, Dispatcher, EngineConfig, Storage, TaskId, TaskStatus};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

use crate::common::{seed_case, wait_for_task_status};

/// Router over a fresh harness with a running dispatcher.
fn router(h: &TestHarness) -> Router {
    let (dispatch, _join) = Dispatcher::new(h.orchestrator.clone()).start();
    let state = create_api_state(
        h.orchestrator.clone(),
        Broadcaster::new(),
        dispatch,
        &EngineConfig::default(),
    );
    build_router(state)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let h = TestHarness::new();
    let (status, json) = call(&router(&h), Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: a submitted task is queued, runs and can be inspected.
#[tokio::test]
async fn test_submit_runs_task() {
    let h = TestHarness::new();
    let pass = seed_case(&h, "pass", "exit 0").await;
    let fail = seed_case(&h, "fail", "exit 1").await;
    let router = router(&h);

    let (status, json) = call(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({
            "target": "10.1.2.3",
            "user_id": 9,
            "description": "edge router",
            "case_ids": [pass.get(), fail.get()]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["queued"], true);
    assert_eq!(json["task"]["total"], 2);
    assert_eq!(json["task"]["target"], "10.1.2.3");
    let task_id = TaskId::new(json["task"]["id"].as_i64().unwrap());

    wait_for_task_status(
        h.storage.as_ref(),
        task_id,
        TaskStatus::Completed,
        Duration::from_secs(10),
    )
    .await;

    let (status, json) = call(&router, Method::GET, &format!("/api/tasks/{}", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["description"], "edge router");
    assert_eq!(json["units"].as_array().unwrap().len(), 2);
    assert_eq!(json["units"][0]["status"], "pass");
    assert_eq!(json["units"][1]["status"], "fail");
    assert!(json["units"][0]["log_path"].is_string());

    let (status, json) = call(
        &router,
        Method::GET,
        &format!("/api/tasks/{}/stats", task_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["passed"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["progress_percent"], 100.0);
}

/// Test: submission validation errors.
#[tokio::test]
async fn test_submit_rejects_bad_requests() {
    let h = TestHarness::new();
    let router = router(&h);

    let (status, json) = call(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({"target": "example.com", "user_id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({"target": "10.0.0.1", "user_id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = call(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({"target": "10.0.0.1", "user_id": 1, "case_ids": [404]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: unknown tasks are 404 on every task route.
#[tokio::test]
async fn test_unknown_task_not_found() {
    let h = TestHarness::new();
    let router = router(&h);

    for (method, uri) in [
        (Method::GET, "/api/tasks/77"),
        (Method::GET, "/api/tasks/77/stats"),
        (Method::POST, "/api/tasks/77/stop"),
        (Method::POST, "/api/tasks/77/retry"),
        (Method::GET, "/api/ws/tasks/77"),
    ] {
        let (status, _) = call(&router, method.clone(), uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}

/// Test: the WebSocket route refuses plain requests for a known task.
#[tokio::test]
async fn test_ws_requires_upgrade() {
    let h = TestHarness::new();
    let task = h.task_with_scripts(&["exit 0"]).await;
    let router = router(&h);

    let (status, _) = call(&router, Method::GET, &format!("/api/ws/tasks/{}", task.id), None).await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::NOT_FOUND);
}

/// Test: stop is idempotent and refused for finished tasks.
#[tokio::test]
async fn test_stop_endpoint() {
    let h = TestHarness::new();
    let pending = h.task_with_scripts(&["exit 0", "exit 0"]).await;
    let finished = h.task_with_scripts(&["exit 0"]).await;
    h.orchestrator.run_task(finished.id).await.unwrap();
    let router = router(&h);

    let uri = format!("/api/tasks/{}/stop", pending.id);
    let (status, json) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "task stopped");
    assert_eq!(json["stats"]["status"], "stopped");
    assert_eq!(json["stats"]["error"], 2);

    let (status, json) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "task already stopped");

    let (status, json) = call(
        &router,
        Method::POST,
        &format!("/api/tasks/{}/stop", finished.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

/// Test: retry honours a per-request limit and re-dispatches the task.
#[tokio::test]
async fn test_retry_endpoint() {
    let h = TestHarness::new();
    let task = h.task_with_scripts(&["exit 0", "exit 7"]).await;
    h.orchestrator.run_task(task.id).await.unwrap();
    let router = router(&h);
    let uri = format!("/api/tasks/{}/retry", task.id);

    let (status, json) = call(&router, Method::POST, &uri, Some(json!({"max_retries": 0}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["retried"], 0);
    assert_eq!(json["queued"], false);
    assert_eq!(json["stats"]["status"], "completed");

    let (status, json) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["retried"], 1);
    assert_eq!(json["queued"], true);

    wait_for_task_status(
        h.storage.as_ref(),
        task.id,
        TaskStatus::Completed,
        Duration::from_secs(10),
    )
    .await;
    let units = h.storage.list_units(task.id).await.unwrap();
    assert_eq!(units[1].retry_count, 1);
    assert!(units[1].end_time.is_some());

    let pending = h.task_with_scripts(&["exit 0"]).await;
    let (status, _) = call(
        &router,
        Method::POST,
        &format!("/api/tasks/{}/retry", pending.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&router, Method::POST, &uri, Some(json!({"max_retries": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
