//! Centralized configuration constants for roomdrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format names (frame tags, topic prefixes) stay
//! in their respective modules.

use serde::Deserialize;
use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Default chunk size in bytes.
///
/// Kept below the 64 KiB SCTP message size that every WebRTC stack accepts
/// without `a=max-message-size` negotiation.
pub const CHUNK_SIZE: usize = 64_000;

// ── Data channel flow control ────────────────────────────────────────────────

/// Label of the single ordered data channel carried by every link.
pub const DATA_CHANNEL_LABEL: &str = "data-channel";

/// Sends are queued instead of transmitted once the transport's buffered
/// amount reaches this mark.
pub const DC_BUFFERED_AMOUNT_HIGH: usize = 64 * 1024;

/// The transport raises a "buffered amount low" event when it drains below
/// this mark; the outbound queue is flushed on that event.
pub const DC_BUFFERED_AMOUNT_LOW: usize = 16 * 1024;

// ── Timeouts ─────────────────────────────────────────────────────────────────

/// A link that has not reached `connected` within this window is failed.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// A request that was neither accepted nor rejected within this window
/// expires and the sender returns to idle.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on how often pending requests are checked for expiry.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ── ICE ──────────────────────────────────────────────────────────────────────

/// STUN server used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Gather loopback host candidates. Needed when both peers live on one host
/// that has no other usable interface (containers, CI).
pub const ICE_INCLUDE_LOOPBACK: bool = false;

// ── Runtime configuration ────────────────────────────────────────────────────

/// Tunables shared by the coordinator and every link it opens.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub high_water: usize,
    pub low_water: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water: DC_BUFFERED_AMOUNT_HIGH,
            low_water: DC_BUFFERED_AMOUNT_LOW,
            connect_timeout: CONNECTION_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl TransferConfig {
    /// How often the coordinator looks for expired requests.
    pub fn sweep_interval(&self) -> Duration {
        (self.request_timeout / 4)
            .min(EXPIRY_SWEEP_INTERVAL)
            .max(Duration::from_millis(10))
    }
}

/// One STUN or TURN server entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Peer-connection settings for the WebRTC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    pub include_loopback: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            include_loopback: ICE_INCLUDE_LOOPBACK,
        }
    }
}
