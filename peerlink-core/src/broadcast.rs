//! Gossip broadcast: one fixed topic, one listener task, an append-only message log.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::transport::{GossipEvent, Subscription, Transport};
use crate::types::Message;

/// Received messages in arrival order.
#[derive(Default)]
pub struct MessageLog {
    entries: RwLock<Vec<Message>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, message: Message) {
        self.entries.write().await.push(message);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.entries.read().await.clone()
    }
}

/// Health of the background listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Running,
    /// Subscription failed fatally; no more messages will be logged.
    Stopped { reason: String },
}

impl ListenerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ListenerState::Running)
    }
}

#[derive(Clone)]
pub struct BroadcastChannel {
    transport: Arc<dyn Transport>,
    topic: String,
    local_id: NodeId,
    state: watch::Receiver<ListenerState>,
}

impl BroadcastChannel {
    /// Subscribe to `topic` and spawn the listener feeding `log`.
    pub async fn start(
        transport: Arc<dyn Transport>,
        topic: &str,
        log: Arc<MessageLog>,
    ) -> Result<Self> {
        let subscription = transport
            .subscribe(topic)
            .await
            .map_err(|source| Error::Subscribe {
                topic: topic.to_string(),
                source,
            })?;
        let local_id = transport.local_id();
        let (state_tx, state_rx) = watch::channel(ListenerState::Running);
        tokio::spawn(listen(subscription, local_id, log, state_tx));
        tracing::debug!(%topic, "gossip listener started");
        Ok(Self {
            transport,
            topic: topic.to_string(),
            local_id,
            state: state_rx,
        })
    }

    /// Publish `content` as this node. The local log is not touched.
    pub async fn broadcast(&self, content: &str) -> Result<()> {
        let message = Message {
            from: self.local_id.to_string(),
            content: content.to_string(),
        };
        let data = message.encode().map_err(|e| Error::PublishError {
            reason: format!("encode: {e}"),
        })?;
        self.transport
            .publish(&self.topic, data)
            .await
            .map_err(|e| Error::PublishError {
                reason: e.to_string(),
            })
    }

    pub fn listener_state(&self) -> ListenerState {
        self.state.borrow().clone()
    }

    /// Resolves once the listener has stopped.
    pub async fn stopped(&self) -> ListenerState {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            if !current.is_running() {
                return current;
            }
            if state.changed().await.is_err() {
                return state.borrow().clone();
            }
        }
    }
}

async fn listen(
    mut subscription: Subscription,
    local_id: NodeId,
    log: Arc<MessageLog>,
    state: watch::Sender<ListenerState>,
) {
    loop {
        let event = match subscription.next().await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "gossip subscription ended; no further messages");
                let _ = state.send(ListenerState::Stopped {
                    reason: e.to_string(),
                });
                return;
            }
        };
        if let Some(message) = accept_event(local_id, &event) {
            log.append(message).await;
        }
    }
}

/// Filter one topic event: drop our own publications and undecodable payloads.
fn accept_event(local_id: NodeId, event: &GossipEvent) -> Option<Message> {
    if event.origin == local_id {
        return None;
    }
    match Message::decode(&event.data) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(origin = %event.origin, error = %e, "dropping malformed gossip payload");
            None
        }
    }
}
