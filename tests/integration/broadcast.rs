//! Live event fan-out integration tests.

use secdet::testing::{RecordingSubscriber, TestHarness};
use secdet::{Broadcaster, TaskEvent, TaskStatus, UnitStatus};
use std::sync::Arc;
use std::time::Duration;

fn finished_results(events: &[TaskEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TaskEvent::Result(u) if u.status.is_terminal()))
        .count()
}

/// Test: two subscribers watch a task; one disconnects midway. The other
/// keeps receiving every event and the dead one is dropped from the registry.
#[tokio::test]
async fn test_two_subscribers_one_disconnects() {
    let mut h = TestHarness::new();
    let task = h
        .task_with_scripts(&["exit 0", "sleep 0.3\nexit 1", "exit 0"])
        .await;

    let broadcaster = Broadcaster::new();
    let stays = Arc::new(RecordingSubscriber::new());
    let leaves = Arc::new(RecordingSubscriber::new());
    broadcaster.subscribe(stays.clone(), task.id).await;
    broadcaster.subscribe(leaves.clone(), task.id).await;

    let (sender, receiver) = secdet::EventSender::channel();
    let pump = broadcaster.spawn_pump(receiver);
    let orchestrator = secdet::Orchestrator::new(
        h.storage.clone(),
        h.fixture.runner(Duration::from_secs(10)),
        sender,
    );

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_task(task.id).await })
    };

    // Disconnect once the first unit's verdict has been delivered.
    for _ in 0..500 {
        if finished_results(&leaves.events()) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    leaves.disconnect();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.status, TaskStatus::Completed);
    drop(orchestrator);
    pump.await.unwrap();

    let all = stays.events();
    assert_eq!(all.first().map(TaskEvent::kind), Some("status"));
    assert_eq!(all.last().map(TaskEvent::kind), Some("complete"));
    assert_eq!(finished_results(&all), 3);
    let running = all
        .iter()
        .filter(|e| matches!(e, TaskEvent::Result(u) if u.status == UnitStatus::Running))
        .count();
    assert_eq!(running, 3);

    let partial = leaves.events();
    assert!(partial.len() < all.len());
    assert_eq!(partial[..], all[..partial.len()]);
    assert_eq!(broadcaster.subscriber_count(task.id).await, 1);

    // The harness's own channel saw nothing: this orchestrator had its own.
    assert!(h.drain().is_empty());
}

/// Test: events for other tasks are not delivered.
#[tokio::test]
async fn test_subscriber_sees_only_its_task() {
    let h = TestHarness::new();
    let watched = h.task_with_scripts(&["exit 0"]).await;
    let other = h.task_with_scripts(&["exit 0"]).await;

    let broadcaster = Broadcaster::new();
    let sub = Arc::new(RecordingSubscriber::new());
    broadcaster.subscribe(sub.clone(), watched.id).await;

    let (sender, receiver) = secdet::EventSender::channel();
    let pump = broadcaster.spawn_pump(receiver);
    let orchestrator = secdet::Orchestrator::new(
        h.storage.clone(),
        h.fixture.runner(Duration::from_secs(10)),
        sender,
    );
    orchestrator.run_task(other.id).await.unwrap();
    orchestrator.run_task(watched.id).await.unwrap();
    drop(orchestrator);
    pump.await.unwrap();

    let events = sub.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.task_id() == watched.id));
}
