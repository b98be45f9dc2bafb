//! Room-scoped view of a signaling channel.
//!
//! Topic layout:
//! - `room:<room>`: roster snapshots
//! - `transition:<room>:<kind>:<peer>`: signals addressed to `<peer>`

use super::messages::{Roster, Signal, SignalKind};
use super::{Delivery, PeerId, SignalingChannel, SubscriptionId};
use crate::core::error::ProtocolViolation;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A decoded delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Signal(Signal),
    Roster(Roster),
}

#[derive(Clone)]
pub struct RoomSignals {
    channel: Arc<dyn SignalingChannel>,
    room: String,
    local: PeerId,
}

impl RoomSignals {
    pub fn new(channel: Arc<dyn SignalingChannel>, room: impl Into<String>, local: PeerId) -> Self {
        Self {
            channel,
            room: room.into(),
            local,
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn roster_topic(&self) -> String {
        format!("room:{}", self.room)
    }

    fn transition_prefix(&self) -> String {
        format!("transition:{}:", self.room)
    }

    pub fn topic(&self, kind: SignalKind, target: &PeerId) -> String {
        format!("{}{}:{}", self.transition_prefix(), kind, target)
    }

    pub async fn publish(&self, target: &PeerId, signal: &Signal) -> Result<()> {
        let payload = signal
            .to_payload()
            .with_context(|| format!("encoding {} signal", signal.kind()))?;
        self.channel
            .send(&self.topic(signal.kind(), target), payload)
            .await
    }

    pub async fn publish_roster(&self, roster: &Roster) -> Result<()> {
        let payload = serde_json::to_value(roster).context("encoding roster")?;
        self.channel.send(&self.roster_topic(), payload).await
    }

    /// Subscribe `sink` to the roster and to every signal kind addressed to
    /// the local peer.
    pub async fn subscribe_inbox(
        &self,
        sink: mpsc::UnboundedSender<Delivery>,
    ) -> Result<Vec<SubscriptionId>> {
        let mut ids = Vec::with_capacity(SignalKind::ALL.len() + 1);
        ids.push(self.channel.subscribe(&self.roster_topic(), sink.clone()).await?);
        for kind in SignalKind::ALL {
            let topic = self.topic(kind, &self.local);
            match self.channel.subscribe(&topic, sink.clone()).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.unsubscribe_all(ids).await;
                    return Err(e.context(format!("subscribing to {topic}")));
                }
            }
        }
        Ok(ids)
    }

    pub async fn unsubscribe_all(&self, ids: Vec<SubscriptionId>) {
        for id in ids {
            self.channel.unsubscribe(id).await;
        }
    }

    /// Decode a delivery from one of this room's topics.
    pub fn decode(&self, delivery: Delivery) -> Result<Inbound, ProtocolViolation> {
        if delivery.topic == self.roster_topic() {
            return serde_json::from_value(delivery.payload)
                .map(Inbound::Roster)
                .map_err(|e| ProtocolViolation::Malformed(format!("roster: {e}")));
        }

        let rest = delivery
            .topic
            .strip_prefix(&self.transition_prefix())
            .ok_or_else(|| ProtocolViolation::Malformed(format!("foreign topic {}", delivery.topic)))?;
        let (kind, target) = rest
            .split_once(':')
            .ok_or_else(|| ProtocolViolation::Malformed(format!("bad topic {}", delivery.topic)))?;
        if target != self.local.as_str() {
            return Err(ProtocolViolation::Malformed(format!(
                "signal addressed to {target}"
            )));
        }

        let kind: SignalKind = kind.parse().map_err(ProtocolViolation::Malformed)?;
        Signal::from_payload(kind, delivery.payload)
            .map(Inbound::Signal)
            .map_err(|e| ProtocolViolation::Malformed(format!("{kind}: {e}")))
    }
}
