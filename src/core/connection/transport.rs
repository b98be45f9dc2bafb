//! Seam between a [`PeerLink`](super::link::PeerLink) and the connection
//! that actually moves bytes.
//!
//! A transport is one peer connection with one ordered, reliable data
//! channel. It reports everything that happens to it as
//! [`TransportEvent`]s on the receiver returned by [`Connector::open`].

use super::types::{IceCandidate, Role, SessionDescription, TransportEvent};
use crate::core::protocol::frame::WirePayload;
use crate::core::signaling::PeerId;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Create an offer and set it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Apply a remote offer and return the local answer.
    async fn apply_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn send(&self, payload: WirePayload) -> Result<()>;

    /// Bytes accepted by `send` but not yet handed to the network.
    async fn buffered_amount(&self) -> usize;

    /// Close the channel and connection and stop reporting events.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, peer: &PeerId, role: Role) -> Result<(Arc<dyn Transport>, TransportEvents)>;
}
