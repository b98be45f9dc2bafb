//! Error taxonomy for the transfer protocol.
//!
//! Transport and application plumbing use `anyhow`; these typed errors mark
//! the places where callers are expected to branch on what went wrong.

use crate::core::connection::types::{NegotiationPhase, Role};
use crate::core::signaling::PeerId;
use crate::core::transaction::TransferState;
use thiserror::Error;
use uuid::Uuid;

/// A session description or candidate was applied out of protocol order or
/// by the wrong side. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("{op} is only valid on the {expected} side")]
    WrongRole { op: &'static str, expected: Role },

    #[error("{op} called while negotiation is {phase}")]
    OutOfOrder {
        op: &'static str,
        phase: NegotiationPhase,
    },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("link is closed")]
    Closed,

    #[error("link failed")]
    Failed,

    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),
}

/// Unexpected frame type or order on the data channel. The offending frame
/// is dropped and the session continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolViolation {
    #[error("data frame received with no open file")]
    DataWithoutFile,

    #[error("{0} frame received out of order")]
    UnexpectedFrame(&'static str),

    #[error("frame for session {got} while session {expected} is active")]
    SessionMismatch { expected: Uuid, got: Uuid },

    #[error("file-end for {got} while {expected} is open")]
    FileMismatch { expected: String, got: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("{name} is incomplete: {received} of {expected} bytes")]
    Incomplete {
        name: String,
        received: u64,
        expected: u64,
    },

    #[error("{len} byte frame overflows {name}: {received} of {expected} bytes already received")]
    Overflow {
        name: String,
        len: usize,
        received: u64,
        expected: u64,
    },
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("source ended after {read} of {expected} bytes")]
    Truncated { read: u64, expected: u64 },

    #[error("source is longer than its declared {expected} bytes")]
    Oversized { expected: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of coordinator commands.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("peer {peer} is {state}; a new request needs idle")]
    InvalidState { peer: PeerId, state: TransferState },

    #[error("no pending request from {0}")]
    NoPendingRequest(PeerId),

    #[error("a request needs at least one file")]
    EmptyRequest,

    #[error("coordinator has stopped")]
    Shutdown,

    #[error("signaling failed: {0:#}")]
    Signaling(anyhow::Error),
}
