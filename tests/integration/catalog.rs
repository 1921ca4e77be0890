//! Catalog-to-completion integration tests.
//!
//! Seeds a YAML catalog, submits a task for every enabled case and lets the
//! dispatcher run it.

use secdet::config::{YamlLoader, seed_catalog};
use secdet::testing::ScriptFixture;
use secdet::{
    Dispatcher, EnqueueOutcome, EventSender, InMemoryStorage, Orchestrator, Storage,
    SubmitRequest, TargetAddr, TaskStatus, UnitStatus, UserId, submit_task,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::wait_for_task_status;

const CATALOG: &str = r#"
categories:
  - name: web
    sort_order: 2
    cases:
      - name: headers
        risk_level: low
        script: web/headers.sh
  - name: network
    sort_order: 1
    cases:
      - name: target env
        risk_level: high
        script: network/target_env.sh
      - name: legacy
        risk_level: medium
        script: network/legacy.sh
        enabled: false
"#;

fn write_scripts(fixture: &ScriptFixture) {
    fixture.script("web/headers.sh", "echo checking headers\nexit 1");
    // Arguments and environment must agree on the target.
    fixture.script(
        "network/target_env.sh",
        "[ \"$1\" = \"$TARGET_IP\" ] && [ -n \"$TASK_ID\" ] && [ -n \"$RESULT_ID\" ] && exit 0\nexit 1",
    );
    fixture.script("network/legacy.sh", "exit 0");
}

async fn run_catalog<S: Storage + 'static>(storage: Arc<S>, fixture: &ScriptFixture) {
    let catalog = YamlLoader::parse_catalog_config(CATALOG).unwrap();
    seed_catalog(storage.as_ref(), &catalog).await.unwrap();

    let request = SubmitRequest::new(TargetAddr::parse("192.0.2.10").unwrap(), UserId::new(7))
        .with_description("nightly");
    let (task, units) = submit_task(storage.as_ref(), request).await.unwrap();
    assert_eq!(task.total, 2);

    let orchestrator = Orchestrator::new(
        storage.clone(),
        fixture.runner(Duration::from_secs(10)),
        EventSender::disconnected(),
    );
    let (dispatch, join) = Dispatcher::new(orchestrator).with_concurrency(2).start();
    assert_eq!(dispatch.enqueue(task.id).await.unwrap(), EnqueueOutcome::Queued);

    let done = wait_for_task_status(
        storage.as_ref(),
        task.id,
        TaskStatus::Completed,
        Duration::from_secs(10),
    )
    .await;
    assert_eq!((done.passed, done.failed, done.errors), (1, 1, 0));

    // Network sorts first, so its case is the first unit.
    let first = storage.get_unit(units[0].id).await.unwrap();
    let case = storage.get_case(first.case_id).await.unwrap();
    assert_eq!(case.name, "target env");
    assert_eq!(first.status, UnitStatus::Pass);
    let log = std::fs::read_to_string(first.log_path.unwrap()).unwrap();
    assert!(log.contains("=== Script Execution Log ==="));

    dispatch.shutdown().await.unwrap();
    join.await.unwrap();
}

/// Test: catalog seeding, submission and dispatch with in-memory storage.
#[tokio::test]
async fn test_catalog_to_completion_in_memory() {
    let fixture = ScriptFixture::new();
    write_scripts(&fixture);
    run_catalog(Arc::new(InMemoryStorage::new()), &fixture).await;
}

/// Test: the same flow against SQLite, surviving a reopen.
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_catalog_to_completion_sqlite() {
    use secdet::SqliteStorage;

    let fixture = ScriptFixture::new();
    write_scripts(&fixture);
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("secdet.db");

    let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
    run_catalog(storage.clone(), &fixture).await;
    storage.close().await;

    let reopened = SqliteStorage::new(&path).await.unwrap();
    let task = reopened.get_task(secdet::TaskId::new(1)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.description.as_deref(), Some("nightly"));
    assert_eq!(reopened.list_enabled_cases().await.unwrap().len(), 2);
}
