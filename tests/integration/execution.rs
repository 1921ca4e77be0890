//! Task execution integration tests.
//!
//! Tests that drive whole tasks through the orchestrator with real scripts,
//! covering unit ordering under stop and timeout, retry cycles and the
//! counter invariants.

use secdet::core::task::STOPPED_BY_USER;
use secdet::testing::{ManualStopSignal, TestHarness};
use secdet::{Dispatcher, Storage, TaskStatus, UnitStatus};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{wait_for_task_status, wait_for_unit_status};

const WAIT: Duration = Duration::from_secs(5);

/// Test: a stop observed while unit 2 hangs lets the timeout resolve unit 2
/// and never starts unit 3.
#[tokio::test]
async fn test_hanging_unit_then_stop_signal() {
    let h = TestHarness::with_timeout(Duration::from_millis(500));
    let task = h
        .task_with_scripts(&["exit 0", "sleep 30", "exit 0"])
        .await;
    let units = h.storage.list_units(task.id).await.unwrap();

    let signal = Arc::new(ManualStopSignal::new());
    let orchestrator = h.orchestrator.clone().with_stop_signal(signal.clone());
    let task_id = task.id;
    let run = tokio::spawn(async move { orchestrator.run_task(task_id).await });

    wait_for_unit_status(h.storage.as_ref(), units[1].id, UnitStatus::Running, WAIT).await;
    signal.stop(task.id);

    let summary = run.await.unwrap().unwrap();
    assert!(summary.halted_by_stop);

    let first = h.storage.get_unit(units[0].id).await.unwrap();
    assert_eq!(first.status, UnitStatus::Pass);

    let second = h.storage.get_unit(units[1].id).await.unwrap();
    assert_eq!(second.status, UnitStatus::Error);
    assert!(
        second
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("script timeout after")
    );
    let elapsed = second.end_time.unwrap() - second.start_time.unwrap();
    assert!(elapsed.num_milliseconds() >= 500);

    let third = h.storage.get_unit(units[2].id).await.unwrap();
    assert_eq!(third.status, UnitStatus::Pending);
    assert!(third.start_time.is_none());
    assert_eq!(h.fixture.log_count(), 2);

    let stored = h.storage.get_task(task.id).await.unwrap();
    assert_eq!((stored.completed, stored.total), (2, 3));
}

/// Test: stop() while unit 2 hangs moves every open unit to error and the
/// late timeout verdict is discarded.
#[tokio::test]
async fn test_hanging_unit_then_stop_operation() {
    let h = TestHarness::with_timeout(Duration::from_millis(500));
    let task = h
        .task_with_scripts(&["exit 0", "sleep 30", "exit 0"])
        .await;
    let units = h.storage.list_units(task.id).await.unwrap();

    let orchestrator = h.orchestrator.clone();
    let task_id = task.id;
    let run = tokio::spawn(async move { orchestrator.run_task(task_id).await });

    wait_for_unit_status(h.storage.as_ref(), units[1].id, UnitStatus::Running, WAIT).await;
    h.orchestrator.stop(task.id).await.unwrap();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.status, TaskStatus::Stopped);
    assert!(summary.halted_by_stop);

    let listed = h.storage.list_units(task.id).await.unwrap();
    assert_eq!(listed[0].status, UnitStatus::Pass);
    assert_eq!(listed[1].status, UnitStatus::Error);
    assert_eq!(listed[1].error_message.as_deref(), Some(STOPPED_BY_USER));
    assert_eq!(listed[2].status, UnitStatus::Error);
    assert_eq!(listed[2].error_message.as_deref(), Some(STOPPED_BY_USER));
    assert!(listed[2].start_time.is_none());
    assert_eq!(h.fixture.log_count(), 2);

    let stored = h.storage.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Stopped);
    assert_eq!(
        (stored.completed, stored.passed, stored.failed, stored.errors),
        (3, 1, 0, 2)
    );
}

/// Test: counters add up and exit codes map to verdicts.
#[tokio::test]
async fn test_counters_and_exit_codes() {
    let h = TestHarness::new();
    let task = h
        .task_with_scripts(&["exit 0", "exit 1", "exit 5", "echo hi; exit 0"])
        .await;

    let summary = h.orchestrator.run_task(task.id).await.unwrap();
    assert_eq!(summary.status, TaskStatus::Completed);

    let stored = h.storage.get_task(task.id).await.unwrap();
    assert_eq!(stored.completed, stored.passed + stored.failed + stored.errors);
    assert_eq!(stored.completed, stored.total);
    assert_eq!((stored.passed, stored.failed, stored.errors), (2, 1, 1));

    let statuses: Vec<_> = h
        .storage
        .list_units(task.id)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            UnitStatus::Pass,
            UnitStatus::Fail,
            UnitStatus::Error,
            UnitStatus::Pass
        ]
    );

    let stats = h.orchestrator.stats(task.id).await.unwrap();
    assert_eq!(stats.progress_percent, 100.0);
}

/// Test: a flaky unit passes after one retry and the task completes again.
#[tokio::test]
async fn test_retry_cycle() {
    let h = TestHarness::new();
    let flaky = "if [ -f flaky.marker ]; then exit 0; fi\ntouch flaky.marker\nexit 9";
    let task = h.task_with_scripts(&["exit 0", flaky]).await;

    let first = h.orchestrator.run_task(task.id).await.unwrap();
    assert_eq!(first.errors, 1);

    assert_eq!(h.orchestrator.retry(task.id, 3).await.unwrap(), 1);
    let second = h.orchestrator.run_task(task.id).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!((second.passed, second.errors), (2, 0));

    let units = h.storage.list_units(task.id).await.unwrap();
    assert_eq!(units[1].retry_count, 1);
    assert!(units[1].error_message.is_none());

    // Nothing left to retry.
    assert_eq!(h.orchestrator.retry(task.id, 3).await.unwrap(), 0);
}

/// Test: the retry limit is per unit.
#[tokio::test]
async fn test_retry_limit_reached() {
    let h = TestHarness::new();
    let task = h.task_with_scripts(&["exit 4"]).await;
    h.orchestrator.run_task(task.id).await.unwrap();

    assert_eq!(h.orchestrator.retry(task.id, 1).await.unwrap(), 1);
    h.orchestrator.run_task(task.id).await.unwrap();

    let before = h.storage.get_task(task.id).await.unwrap();
    assert_eq!(h.orchestrator.retry(task.id, 1).await.unwrap(), 0);
    let after = h.storage.get_task(task.id).await.unwrap();
    assert_eq!(before, after);
}

/// Test: stop then retry while a script is still running; the stale pass
/// gives way and the re-dispatched pass runs every unit again.
#[tokio::test]
async fn test_stop_then_retry_with_script_in_flight() {
    let h = TestHarness::new();
    let task = h.task_with_scripts(&["sleep 0.8\nexit 0", "exit 0"]).await;
    let units = h.storage.list_units(task.id).await.unwrap();

    let (dispatch, _worker) = Dispatcher::new(h.orchestrator.clone()).start();
    dispatch.enqueue(task.id).await.unwrap();
    wait_for_unit_status(h.storage.as_ref(), units[0].id, UnitStatus::Running, WAIT).await;

    h.orchestrator.stop(task.id).await.unwrap();
    assert_eq!(h.orchestrator.retry(task.id, 3).await.unwrap(), 2);
    dispatch.enqueue(task.id).await.unwrap();

    wait_for_task_status(h.storage.as_ref(), task.id, TaskStatus::Completed, WAIT).await;

    let listed = h.storage.list_units(task.id).await.unwrap();
    for unit in &listed {
        assert_eq!(unit.status, UnitStatus::Pass);
        assert_eq!(unit.retry_count, 1);
        assert!(unit.start_time.is_some());
    }
    let stored = h.storage.get_task(task.id).await.unwrap();
    assert_eq!((stored.completed, stored.passed, stored.errors), (2, 2, 0));
    // Two attempts of the first unit, one of the second.
    assert_eq!(h.fixture.log_count(), 3);
}
