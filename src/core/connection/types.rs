//! Shared connection types: roles, states, session descriptions, candidates
//! and the events a transport reports.

use crate::core::protocol::frame::{Frame, WirePayload};
use crate::core::signaling::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

// ── Roles and states ─────────────────────────────────────────────────────────

/// Negotiation role. The offerer creates the data channel and the offer;
/// the answerer waits for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Offerer => Role::Answerer,
            Role::Answerer => Role::Offerer,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Offerer => "offerer",
            Role::Answerer => "answerer",
        })
    }
}

/// Externally observable link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Negotiating,
    Connected,
    /// Terminal.
    Failed,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LinkState::Negotiating => "negotiating",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
        })
    }
}

/// Where a link is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Nothing exchanged yet.
    New,
    /// Offerer only: local offer out, waiting for the answer.
    OfferSent,
    /// Both descriptions applied.
    Stable,
    /// Answerer only: ICE failed, waiting for the peer's restart offer.
    Restarting,
}

impl Display for NegotiationPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NegotiationPhase::New => "new",
            NegotiationPhase::OfferSent => "offer-sent",
            NegotiationPhase::Stable => "stable",
            NegotiationPhase::Restarting => "restarting",
        })
    }
}

/// ICE connectivity as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

// ── SDP / ICE wire shapes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Everything a transport reports to its link, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ChannelOpen,
    ChannelClosed,
    /// Buffered amount dropped below the low-water threshold.
    BufferedAmountLow,
    Message(WirePayload),
    LocalCandidate(IceCandidate),
    Ice(IceState),
}

/// What a link reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotice {
    State(LinkState),
    Frame(Frame),
    /// Locally gathered candidate, to be relayed to the peer.
    Candidate(IceCandidate),
    /// ICE-restart offer, to be relayed to the peer.
    Offer(SessionDescription),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub peer: PeerId,
    /// Identifies the link instance; notices from a replaced link are stale.
    pub link_id: Uuid,
    pub role: Role,
    pub notice: LinkNotice,
}
