//! Common test utilities shared across integration tests.

use secdet::core::case::{Case, RiskLevel, SortOrder};
use secdet::testing::TestHarness;
use secdet::{CaseId, ExecutionUnit, Storage, Task, TaskId, TaskStatus, UnitId, UnitStatus};
use std::time::Duration;

/// Wait for a task to reach an expected status, polling storage.
///
/// Polls every 10ms and panics once `timeout` has passed.
pub async fn wait_for_task_status(
    storage: &dyn Storage,
    task_id: TaskId,
    expected: TaskStatus,
    timeout: Duration,
) -> Task {
    let start = tokio::time::Instant::now();
    loop {
        let task = storage.get_task(task_id).await.unwrap();
        if task.status == expected {
            return task;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for task {} to reach {}, current status: {}",
                task_id, expected, task.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a unit to reach an expected status, polling storage.
pub async fn wait_for_unit_status(
    storage: &dyn Storage,
    unit_id: UnitId,
    expected: UnitStatus,
    timeout: Duration,
) -> ExecutionUnit {
    let start = tokio::time::Instant::now();
    loop {
        let unit = storage.get_unit(unit_id).await.unwrap();
        if unit.status == expected {
            return unit;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for unit {} to reach {}, current status: {}",
                unit_id, expected, unit.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Add an enabled shell case to the harness catalog.
pub async fn seed_case(h: &TestHarness, name: &str, body: &str) -> CaseId {
    let category = match h.storage.list_categories().await.unwrap().into_iter().next() {
        Some(category) => category,
        None => h
            .storage
            .save_category("seeded", SortOrder::Unset)
            .await
            .unwrap(),
    };
    let script = h.fixture.script(&format!("{}.sh", name.replace(' ', "_")), body);
    h.storage
        .save_case(Case::new(name, category.id, RiskLevel::Medium, script))
        .await
        .unwrap()
        .id
}
