//! WebSocket transport for task subscribers.
//!
//! One connection watches one task. Outgoing events travel through a
//! bounded per-connection queue; a full or closed queue makes the
//! subscriber fail its next delivery, which drops it from the registry.
//!
//! Liveness: the client may send `ping` at any time and gets `pong`. When no
//! client traffic arrives for one heartbeat interval the server sends `ping`;
//! a second silent interval closes the connection.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use super::{Broadcaster, SendError, Subscriber};
use crate::core::task::LiveStats;
use crate::core::types::{SubscriberId, TaskId};
use crate::events::TaskEvent;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

const OUTBOUND_CAPACITY: usize = 256;

/// Subscriber half of a WebSocket connection.
pub struct WsSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<String>,
}

impl WsSubscriber {
    /// Create a subscriber and the queue its connection drains.
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            Self {
                id: SubscriberId::new(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    async fn send(&self, event: &TaskEvent) -> Result<(), SendError> {
        let text = event.to_json().map_err(|e| SendError {
            subscriber_id: self.id,
            reason: e.to_string(),
        })?;
        self.tx.try_send(text).map_err(|e| SendError {
            subscriber_id: self.id,
            reason: match e {
                mpsc::error::TrySendError::Full(_) => "outbound queue full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "connection closed".to_string(),
            },
        })
    }
}

/// Bidirectional message transport of one subscriber.
///
/// `recv` must be cancel-safe: it is raced against outgoing traffic.
#[async_trait]
pub trait Connection: Send {
    async fn recv(&mut self) -> Option<Result<Message, axum::Error>>;
    async fn send(&mut self, message: Message) -> Result<(), axum::Error>;
}

#[async_trait]
impl Connection for WebSocket {
    async fn recv(&mut self) -> Option<Result<Message, axum::Error>> {
        WebSocket::recv(self).await
    }

    async fn send(&mut self, message: Message) -> Result<(), axum::Error> {
        WebSocket::send(self, message).await
    }
}

/// Serve one upgraded connection until it closes or goes silent.
///
/// `snapshot` is awaited after registration so no event can fall between
/// the snapshot and the live stream.
pub async fn serve_socket<C, F, Fut>(
    mut socket: C,
    task_id: TaskId,
    broadcaster: Broadcaster,
    heartbeat: Duration,
    snapshot: F,
) where
    C: Connection,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Option<LiveStats>> + Send,
{
    let (subscriber, mut outbound) = WsSubscriber::channel();
    let subscriber_id = subscriber.id();
    broadcaster.subscribe(Arc::new(subscriber), task_id).await;

    if let Some(stats) = snapshot().await {
        match TaskEvent::Status(stats).to_json() {
            Ok(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    broadcaster.unsubscribe(subscriber_id, task_id).await;
                    return;
                }
            }
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "failed to encode snapshot"),
        }
    }

    let mut deadline = Instant::now() + heartbeat;
    let mut pinged = false;

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(text) = outgoing else { break };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!(task_id = %task_id, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                };
                deadline = Instant::now() + heartbeat;
                pinged = false;
                match message {
                    Message::Text(text) if text.as_str() == "ping" => {
                        if socket.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = sleep_until(deadline) => {
                if pinged {
                    tracing::debug!(task_id = %task_id, subscriber_id = %subscriber_id, "heartbeat expired");
                    break;
                }
                pinged = true;
                deadline = Instant::now() + heartbeat;
                if socket.send(Message::Text("ping".into())).await.is_err() {
                    break;
                }
            }
        }
    }

    broadcaster.unsubscribe(subscriber_id, task_id).await;
}
