//! Callback wiring: translate webrtc-rs peer connection and data channel
//! callbacks into [`TransportEvent`]s.

use super::{candidate_from_init, EventSink};
use crate::core::connection::types::{IceState, TransportEvent};
use crate::core::protocol::frame::WirePayload;
use crate::core::signaling::PeerId;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

fn ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => Some(IceState::Connected),
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        _ => None,
    }
}

// ── Peer connection ──────────────────────────────────────────────────────────

pub(super) fn attach_pc_handlers(pc: &Arc<RTCPeerConnection>, peer: &PeerId, sink: EventSink) {
    let ice_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = ice_sink.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => sink.emit(TransportEvent::LocalCandidate(candidate_from_init(init))),
                Err(e) => warn!(event = "ice_candidate_encode_failure", error = %e),
            }
        })
    }));

    let peer_id = peer.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let sink = sink.clone();
        let peer = peer_id.clone();
        Box::pin(async move {
            debug!(event = "ice_state", peer = %peer, state = %state);
            if let Some(state) = ice_state(state) {
                sink.emit(TransportEvent::Ice(state));
            }
        })
    }));

    let peer_id = peer.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let peer = peer_id.clone();
        Box::pin(async move {
            match state {
                RTCPeerConnectionState::Connected => {
                    info!(event = "webrtc_connected", peer = %peer, "WebRTC connection established");
                }
                RTCPeerConnectionState::Failed => {
                    error!(event = "webrtc_failed", peer = %peer, "WebRTC connection failed");
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!(
                        event = "webrtc_disconnected",
                        peer = %peer,
                        "WebRTC transient disconnect (ICE may recover)"
                    );
                }
                RTCPeerConnectionState::Closed => {
                    info!(event = "webrtc_closed", peer = %peer);
                }
                _ => {}
            }
        })
    }));
}

// ── Data channel ─────────────────────────────────────────────────────────────

/// Attach `on_open`, `on_close`, `on_error`, `on_message` and the low-water
/// callback to `dc`.
pub(super) async fn attach_dc_handlers(dc: &Arc<RTCDataChannel>, peer: &PeerId, sink: EventSink, low_water: usize) {
    let open_sink = sink.clone();
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        let sink = open_sink.clone();
        let label = label.clone();
        Box::pin(async move {
            info!(event = "dc_open", channel = %label);
            sink.emit(TransportEvent::ChannelOpen);
        })
    }));

    let close_sink = sink.clone();
    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        let sink = close_sink.clone();
        let label = label.clone();
        Box::pin(async move {
            warn!(event = "dc_closed", channel = %label, "DataChannel closed by transport");
            sink.emit(TransportEvent::ChannelClosed);
        })
    }));

    let peer_id = peer.clone();
    dc.on_error(Box::new(move |err| {
        let peer = peer_id.clone();
        Box::pin(async move {
            error!(event = "dc_error", peer = %peer, %err, "DataChannel transport error");
        })
    }));

    let msg_sink = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = msg_sink.clone();
        Box::pin(async move {
            let payload = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => WirePayload::Text(text),
                    Err(e) => {
                        warn!(event = "dc_invalid_text", error = %e);
                        return;
                    }
                }
            } else {
                WirePayload::Binary(msg.data)
            };
            sink.emit(TransportEvent::Message(payload));
        })
    }));

    dc.set_buffered_amount_low_threshold(low_water).await;
    let low_sink = sink.clone();
    dc.on_buffered_amount_low(Box::new(move || {
        let sink = low_sink.clone();
        Box::pin(async move {
            sink.emit(TransportEvent::BufferedAmountLow);
        })
    }))
    .await;

    // A channel handed over by `on_data_channel` may already be open.
    if dc.ready_state() == RTCDataChannelState::Open {
        sink.emit(TransportEvent::ChannelOpen);
    }
}
