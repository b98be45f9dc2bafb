//! Per-peer transfer state.
//!
//! One [`TransferState`] per remote peer, owned by the coordinator:
//!
//! ```text
//! idle ──request──▶ pending ──accept──▶ accepted ──transfer done──▶ idle
//!                      │
//!                      └──reject──▶ rejected ──follow-up──▶ idle
//! ```
//!
//! `pending` is entered optimistically when the request is published, with
//! no confirmation that the peer received it.

use crate::core::error::TransferError;
use crate::core::pipeline::source::OutgoingFile;
use crate::core::protocol::manifest::FileDescriptor;
use crate::core::signaling::{PeerId, PeerIdentity};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Initial and resting state.
    #[default]
    Idle,
    /// Request published, waiting for accept or reject.
    Pending,
    /// Peer accepted; files are being sent.
    Accepted,
    /// Peer rejected; returns to idle once reported.
    Rejected,
}

impl TransferState {
    /// Busy peers take no new request.
    pub fn is_busy(self) -> bool {
        self != TransferState::Idle
    }

    /// `idle → pending` on `request`.
    pub fn on_request(&mut self, peer: &PeerId) -> Result<(), TransferError> {
        if *self != TransferState::Idle {
            return Err(TransferError::InvalidState {
                peer: peer.clone(),
                state: *self,
            });
        }
        *self = TransferState::Pending;
        Ok(())
    }

    /// `pending → accepted`. Returns `None` (and leaves the state alone) when
    /// no request is pending.
    pub fn on_accept(&mut self) -> Option<TransferState> {
        self.settle_pending(TransferState::Accepted)
    }

    /// `pending → rejected`.
    pub fn on_reject(&mut self) -> Option<TransferState> {
        self.settle_pending(TransferState::Rejected)
    }

    /// Back to `idle` after a transfer ends, a reject is reported, or the
    /// peer is torn down.
    pub fn settle(&mut self) {
        *self = TransferState::Idle;
    }

    fn settle_pending(&mut self, next: TransferState) -> Option<TransferState> {
        if *self != TransferState::Pending {
            return None;
        }
        *self = next;
        Some(next)
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransferState::Idle => "idle",
            TransferState::Pending => "pending",
            TransferState::Accepted => "accepted",
            TransferState::Rejected => "rejected",
        })
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// A request received from a peer, waiting for the local user's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub from: PeerId,
    pub identity: PeerIdentity,
    pub files: Vec<FileDescriptor>,
    pub received_at: Instant,
}

impl TransferRequest {
    pub fn new(from: PeerId, identity: PeerIdentity, files: Vec<FileDescriptor>) -> Self {
        Self {
            from,
            identity,
            files,
            received_at: Instant::now(),
        }
    }
}

/// Files recorded by `request`, held until the peer answers.
#[derive(Debug, Clone)]
pub struct OutboundBatch {
    pub sid: Uuid,
    pub files: Vec<OutgoingFile>,
    /// Cleared once the peer accepts; a batch with a clock can expire.
    pub requested_at: Option<Instant>,
}

impl OutboundBatch {
    pub fn new(files: Vec<OutgoingFile>) -> Self {
        Self {
            sid: Uuid::new_v4(),
            files,
            requested_at: Some(Instant::now()),
        }
    }

    pub fn descriptors(&self) -> Vec<FileDescriptor> {
        self.files.iter().map(|f| f.descriptor.clone()).collect()
    }

    pub fn stop_clock(&mut self) {
        self.requested_at = None;
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.requested_at
            .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn peer() -> PeerId {
        PeerId::new("bob")
    }

    #[test]
    fn test_only_idle_accepts_request() {
        let mut state = TransferState::Idle;
        state.on_request(&peer()).unwrap();
        assert_eq!(state, TransferState::Pending);

        for busy in [TransferState::Pending, TransferState::Accepted, TransferState::Rejected] {
            let mut s = busy;
            let err = s.on_request(&peer()).unwrap_err();
            assert!(matches!(err, TransferError::InvalidState { state, .. } if state == busy));
            assert_eq!(s, busy);
        }
    }

    #[test]
    fn test_only_pending_takes_answers() {
        let mut state = TransferState::Pending;
        assert_eq!(state.on_accept(), Some(TransferState::Accepted));
        assert_eq!(state.on_reject(), None);
        assert_eq!(state, TransferState::Accepted);

        let mut idle = TransferState::Idle;
        assert_eq!(idle.on_accept(), None);
        assert_eq!(idle.on_reject(), None);
        assert_eq!(idle, TransferState::Idle);

        let mut pending = TransferState::Pending;
        assert_eq!(pending.on_reject(), Some(TransferState::Rejected));
        pending.settle();
        assert_eq!(pending, TransferState::Idle);
        assert!(!pending.is_busy());
    }

    #[test]
    fn test_state_display_matches_status_names() {
        assert_eq!(TransferState::Pending.to_string(), "pending");
        assert_eq!(serde_json::to_value(TransferState::Rejected).unwrap(), "rejected");
    }

    #[test]
    fn test_batch_expiry_stops_with_clock() {
        let mut batch = OutboundBatch::new(vec![OutgoingFile::from_bytes(
            "a.txt",
            "text/plain",
            Bytes::from_static(b"abc"),
        )]);
        let later = Instant::now() + Duration::from_secs(5);
        assert!(batch.is_expired(later, Duration::from_secs(1)));
        assert!(!batch.is_expired(later, Duration::from_secs(60)));

        batch.stop_clock();
        assert!(!batch.is_expired(later, Duration::ZERO));
        assert_eq!(batch.descriptors()[0].size, 3);
    }
}
