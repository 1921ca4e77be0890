//! Live subscriber registry.
//!
//! A [`Broadcaster`] maps task ids to the subscribers watching them and
//! relays [`TaskEvent`]s to each. It is created once at service start and
//! handed to whoever needs it; clones share the same registry. Delivery is
//! best-effort: a subscriber whose send fails is dropped after the pass, and
//! nothing is replayed.

pub mod ws;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::core::types::{SubscriberId, TaskId};
use crate::events::{self, EventHandler, EventReceiver, TaskEvent};

/// A subscriber could not take a message.
#[derive(Debug, Clone, Error)]
#[error("subscriber {subscriber_id} unreachable: {reason}")]
pub struct SendError {
    pub subscriber_id: SubscriberId,
    pub reason: String,
}

/// A live observer of one task.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Deliver one event. An error marks the subscriber dead.
    async fn send(&self, event: &TaskEvent) -> Result<(), SendError>;
}

type Registry = HashMap<TaskId, HashMap<SubscriberId, Arc<dyn Subscriber>>>;

/// Registry of live subscribers keyed by task.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<RwLock<Registry>>,
}

impl Broadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a task.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>, task_id: TaskId) {
        let id = subscriber.id();
        let mut registry = self.registry.write().await;
        registry.entry(task_id).or_default().insert(id, subscriber);
        tracing::debug!(task_id = %task_id, subscriber_id = %id, "subscriber registered");
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub async fn unsubscribe(&self, subscriber_id: SubscriberId, task_id: TaskId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(subscribers) = registry.get_mut(&task_id) else {
            return false;
        };
        let removed = subscribers.remove(&subscriber_id).is_some();
        if subscribers.is_empty() {
            registry.remove(&task_id);
        }
        if removed {
            tracing::debug!(task_id = %task_id, subscriber_id = %subscriber_id, "subscriber removed");
        }
        removed
    }

    /// Send an event to every subscriber of a task.
    ///
    /// Returns the number of successful deliveries.
    pub async fn publish(&self, task_id: TaskId, event: &TaskEvent) -> usize {
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let registry = self.registry.read().await;
            match registry.get(&task_id) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for subscriber in subscribers {
            match subscriber.send(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(task_id = %task_id, error = %e, "dropping subscriber");
                    dead.push(subscriber.id());
                }
            }
        }

        for id in dead {
            self.unsubscribe(id, task_id).await;
        }
        delivered
    }

    /// Number of subscribers currently watching a task.
    pub async fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.registry
            .read()
            .await
            .get(&task_id)
            .map_or(0, HashMap::len)
    }

    /// Relay every event from `receiver` until all senders are gone.
    pub async fn run_pump(self, receiver: EventReceiver) {
        events::pump(receiver, vec![Arc::new(self) as Arc<dyn EventHandler>]).await;
    }

    /// Spawn [`run_pump`](Self::run_pump) on the runtime.
    pub fn spawn_pump(&self, receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_pump(receiver))
    }
}

#[async_trait]
impl EventHandler for Broadcaster {
    async fn handle(&self, event: &TaskEvent) {
        self.publish(event.task_id(), event).await;
    }
}
