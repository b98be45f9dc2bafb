//! Typed signaling payloads.
//!
//! The topic names the kind of message and its addressee; the payload names
//! the sender (`fromPeer`) plus kind-specific fields. All payloads are
//! camelCase JSON.

use super::PeerId;
use crate::core::connection::types::{IceCandidate, Role, SessionDescription};
use crate::core::protocol::manifest::FileDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

// ── Identity / roster ────────────────────────────────────────────────────────

/// Requester identity attached to every transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub id: PeerId,
    pub display_name: String,
    pub platform: String,
    pub browser: String,
    pub is_mobile: bool,
}

impl PeerIdentity {
    /// Identity for a native peer running on this machine.
    pub fn native(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            platform: std::env::consts::OS.to_string(),
            browser: concat!("roomdrop/", env!("CARGO_PKG_VERSION")).to_string(),
            is_mobile: false,
        }
    }
}

/// Full participant set, republished by the presence service on every
/// membership change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub participants: Vec<PeerIdentity>,
}

impl Roster {
    pub fn ids(&self) -> HashSet<PeerId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }
}

// ── Kinds and targets ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Request,
    Accept,
    Reject,
    Ice,
    Offer,
    Answer,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::Request,
        SignalKind::Accept,
        SignalKind::Reject,
        SignalKind::Ice,
        SignalKind::Offer,
        SignalKind::Answer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Request => "request",
            SignalKind::Accept => "accept",
            SignalKind::Reject => "reject",
            SignalKind::Ice => "ice",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
        }
    }
}

impl Display for SignalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown signal kind `{s}`"))
    }
}

/// Which of the addressee's links a candidate belongs to: `host` is the
/// offerer's link, `client` the answerer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkTarget {
    Host,
    Client,
}

impl LinkTarget {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Offerer => LinkTarget::Host,
            Role::Answerer => LinkTarget::Client,
        }
    }

    pub fn role(self) -> Role {
        match self {
            LinkTarget::Host => Role::Offerer,
            LinkTarget::Client => Role::Answerer,
        }
    }
}

// ── Signals ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Request {
        from: PeerId,
        identity: PeerIdentity,
        files: Vec<FileDescriptor>,
    },
    Accept {
        from: PeerId,
    },
    Reject {
        from: PeerId,
    },
    Ice {
        from: PeerId,
        target: LinkTarget,
        candidate: IceCandidate,
    },
    Offer {
        from: PeerId,
        offer: SessionDescription,
    },
    Answer {
        from: PeerId,
        answer: SessionDescription,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    from_peer: PeerId,
    identity: PeerIdentity,
    files: Vec<FileDescriptor>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody {
    from_peer: PeerId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceBody {
    from_peer: PeerId,
    target: LinkTarget,
    candidate: IceCandidate,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferBody {
    from_peer: PeerId,
    offer: SessionDescription,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerBody {
    from_peer: PeerId,
    answer: SessionDescription,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Request { .. } => SignalKind::Request,
            Signal::Accept { .. } => SignalKind::Accept,
            Signal::Reject { .. } => SignalKind::Reject,
            Signal::Ice { .. } => SignalKind::Ice,
            Signal::Offer { .. } => SignalKind::Offer,
            Signal::Answer { .. } => SignalKind::Answer,
        }
    }

    pub fn from_peer(&self) -> &PeerId {
        match self {
            Signal::Request { from, .. }
            | Signal::Accept { from }
            | Signal::Reject { from }
            | Signal::Ice { from, .. }
            | Signal::Offer { from, .. }
            | Signal::Answer { from, .. } => from,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self.clone() {
            Signal::Request {
                from,
                identity,
                files,
            } => serde_json::to_value(RequestBody {
                from_peer: from,
                identity,
                files,
            }),
            Signal::Accept { from } | Signal::Reject { from } => {
                serde_json::to_value(ReplyBody { from_peer: from })
            }
            Signal::Ice {
                from,
                target,
                candidate,
            } => serde_json::to_value(IceBody {
                from_peer: from,
                target,
                candidate,
            }),
            Signal::Offer { from, offer } => serde_json::to_value(OfferBody {
                from_peer: from,
                offer,
            }),
            Signal::Answer { from, answer } => serde_json::to_value(AnswerBody {
                from_peer: from,
                answer,
            }),
        }
    }

    pub fn from_payload(kind: SignalKind, payload: Value) -> serde_json::Result<Self> {
        fn body<T: DeserializeOwned>(v: Value) -> serde_json::Result<T> {
            serde_json::from_value(v)
        }

        Ok(match kind {
            SignalKind::Request => {
                let b: RequestBody = body(payload)?;
                Signal::Request {
                    from: b.from_peer,
                    identity: b.identity,
                    files: b.files,
                }
            }
            SignalKind::Accept => Signal::Accept {
                from: body::<ReplyBody>(payload)?.from_peer,
            },
            SignalKind::Reject => Signal::Reject {
                from: body::<ReplyBody>(payload)?.from_peer,
            },
            SignalKind::Ice => {
                let b: IceBody = body(payload)?;
                Signal::Ice {
                    from: b.from_peer,
                    target: b.target,
                    candidate: b.candidate,
                }
            }
            SignalKind::Offer => {
                let b: OfferBody = body(payload)?;
                Signal::Offer {
                    from: b.from_peer,
                    offer: b.offer,
                }
            }
            SignalKind::Answer => {
                let b: AnswerBody = body(payload)?;
                Signal::Answer {
                    from: b.from_peer,
                    answer: b.answer,
                }
            }
        })
    }
}
