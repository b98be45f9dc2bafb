//! In-process signaling relay.
//!
//! Fans every message out to the current subscribers of its topic. Shared by
//! all peers of a process (loopback runs, tests); cloning yields a handle to
//! the same relay.

use super::{Delivery, SignalingChannel, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

#[derive(Debug, Default, Clone)]
pub struct LocalRelay {
    state: Arc<Mutex<RelayState>>,
}

#[derive(Debug, Default)]
struct RelayState {
    next_id: u64,
    topics: HashMap<String, Vec<Subscriber>>,
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sink: mpsc::UnboundedSender<Delivery>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state.topics.get(topic).map_or(0, |subs| subs.len())
    }
}

#[async_trait]
impl SignalingChannel for LocalRelay {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let Some(subs) = state.topics.get_mut(topic) else {
            debug!(event = "relay_drop", topic, "No subscriber, message dropped");
            return Ok(());
        };

        // Sinks whose receiver is gone are pruned on the way.
        subs.retain(|s| {
            s.sink
                .send(Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
        trace!(event = "relay_send", topic, receivers = subs.len());

        if subs.is_empty() {
            state.topics.remove(topic);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        sink: mpsc::UnboundedSender<Delivery>,
    ) -> anyhow::Result<SubscriptionId> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sink });
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock().await;
        state.topics.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
    }
}
