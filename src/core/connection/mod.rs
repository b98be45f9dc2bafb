//! Peer links: one WebRTC connection and data channel per remote peer,
//! with negotiation ordering, trickle ICE, backpressure and one ICE restart.

pub mod link;
pub mod transport;
pub mod types;
pub mod webrtc;

pub use link::PeerLink;
pub use transport::{Connector, Transport, TransportEvents};
pub use types::{IceCandidate, LinkEvent, LinkNotice, LinkState, Role, SessionDescription};
pub use webrtc::RtcConnector;
