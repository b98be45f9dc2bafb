//! Signaling: room-scoped publish/subscribe used only for connection setup.
//!
//! The channel carries requests, replies and WebRTC negotiation between
//! peers; file bytes never travel over it. Delivery is at-most-once and
//! ordered per topic only. A message to a topic nobody listens on is lost.

pub mod messages;
pub mod relay;
pub mod room;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;

pub use messages::{LinkTarget, PeerIdentity, Roster, Signal, SignalKind};
pub use relay::LocalRelay;
pub use room::{Inbound, RoomSignals};

// ── Peer identifier ──────────────────────────────────────────────────────────

/// Stable participant identifier, unique within a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Channel contract ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A payload received on a subscribed topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Pub/sub transport for signaling. Several subscriptions may share one
/// sink, which is how a coordinator funnels every topic it cares about into
/// a single ordered queue.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()>;

    async fn subscribe(
        &self,
        topic: &str,
        sink: mpsc::UnboundedSender<Delivery>,
    ) -> anyhow::Result<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId);
}
