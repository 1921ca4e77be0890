//! Testing utilities for users of the secdet library.
//!
//! - [`ScriptFixture`]: temporary script and log directories
//! - [`ManualStopSignal`]: a stop signal flipped by the test
//! - [`RecordingSubscriber`]: a subscriber that keeps what it receives
//! - [`TestHarness`]: an orchestrator over in-memory storage

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::broadcast::{SendError, Subscriber};
use crate::core::case::{Case, RiskLevel, SortOrder};
use crate::core::task::Task;
use crate::core::types::{SubscriberId, TargetAddr, TaskId, UserId};
use crate::events::{EventReceiver, EventSender, TaskEvent};
use crate::execution::{Orchestrator, ScriptRunner, StopSignal};
use crate::storage::{InMemoryStorage, Storage, StorageError};

/// Temporary scripts and logs directories, removed on drop.
///
/// # Example
///
/// ```
/// use secdet::testing::ScriptFixture;
/// use std::time::Duration;
///
/// let fixture = ScriptFixture::new();
/// let path = fixture.script("checks/ping.sh", "exit 0");
/// assert_eq!(path, std::path::PathBuf::from("checks/ping.sh"));
/// let runner = fixture.runner(Duration::from_secs(5));
/// assert_eq!(runner.scripts_dir(), fixture.scripts_dir());
/// ```
pub struct ScriptFixture {
    scripts: TempDir,
    logs: TempDir,
}

impl ScriptFixture {
    pub fn new() -> Self {
        Self {
            scripts: TempDir::new().expect("failed to create scripts dir"),
            logs: TempDir::new().expect("failed to create logs dir"),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        self.scripts.path()
    }

    pub fn logs_dir(&self) -> &Path {
        self.logs.path()
    }

    /// Write a script and return its path relative to the scripts dir.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.scripts.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create script parent");
        }
        std::fs::write(&path, body).expect("failed to write script");
        PathBuf::from(name)
    }

    /// A runner rooted at the fixture directories.
    pub fn runner(&self, timeout: Duration) -> ScriptRunner {
        ScriptRunner::builder(self.scripts.path(), self.logs.path())
            .timeout(timeout)
            .build()
    }

    /// Number of log files written so far.
    pub fn log_count(&self) -> usize {
        std::fs::read_dir(self.logs.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for ScriptFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop signal controlled directly by a test.
#[derive(Default)]
pub struct ManualStopSignal {
    stopped: Mutex<HashSet<TaskId>>,
}

impl ManualStopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a task as stopped.
    pub fn stop(&self, task_id: TaskId) {
        self.stopped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id);
    }
}

#[async_trait]
impl StopSignal for ManualStopSignal {
    async fn is_stopped(&self, task_id: TaskId) -> Result<bool, StorageError> {
        Ok(self
            .stopped
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains(&task_id))
    }
}

/// Subscriber that records every event until disconnected.
pub struct RecordingSubscriber {
    id: SubscriberId,
    events: Mutex<Vec<TaskEvent>>,
    connected: AtomicBool,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self {
            id: SubscriberId::new(),
            events: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every further send fail.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for RecordingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    async fn send(&self, event: &TaskEvent) -> Result<(), SendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SendError {
                subscriber_id: self.id,
                reason: "disconnected".to_string(),
            });
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Orchestrator over in-memory storage with fixture scripts.
///
/// Events emitted by the orchestrator stay in `receiver` until drained.
pub struct TestHarness {
    pub storage: Arc<InMemoryStorage>,
    pub fixture: ScriptFixture,
    pub orchestrator: Orchestrator<InMemoryStorage>,
    pub receiver: EventReceiver,
    cases_created: AtomicUsize,
}

impl TestHarness {
    /// Harness with a 10 second script timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let fixture = ScriptFixture::new();
        let (events, receiver) = EventSender::channel();
        let orchestrator = Orchestrator::new(storage.clone(), fixture.runner(timeout), events);
        Self {
            storage,
            fixture,
            orchestrator,
            receiver,
            cases_created: AtomicUsize::new(0),
        }
    }

    /// Create a pending task with one shell case per script body.
    pub async fn task_with_scripts(&self, bodies: &[&str]) -> Task {
        let category = match self
            .storage
            .list_categories()
            .await
            .expect("failed to list categories")
            .into_iter()
            .next()
        {
            Some(category) => category,
            None => self
                .storage
                .save_category("general", SortOrder::Unset)
                .await
                .expect("failed to save category"),
        };

        let mut case_ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            let n = self.cases_created.fetch_add(1, Ordering::SeqCst);
            let script = self.fixture.script(&format!("case_{}.sh", n), body);
            let case = self
                .storage
                .save_case(Case::new(
                    format!("case {}", n),
                    category.id,
                    RiskLevel::Low,
                    script,
                ))
                .await
                .expect("failed to save case");
            case_ids.push(case.id);
        }

        let task = Task::new(
            TargetAddr::parse("127.0.0.1").expect("valid target"),
            UserId::new(1),
            case_ids.len() as u32,
        );
        self.storage
            .create_task(task, &case_ids)
            .await
            .expect("failed to create task")
            .0
    }

    /// Take every event emitted so far.
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
