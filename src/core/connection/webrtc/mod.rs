//! WebRTC transport built on webrtc-rs.
//!
//! # Protocol Overview
//!
//! - One peer connection per link, one ordered + reliable data channel
//! - Trickle ICE: local candidates are reported as soon as they are gathered
//! - JSON control frames go out as text messages, file chunks as binary
//! - Flow control via the channel's buffered amount and its low-water event
//! - ICE restart through `RTCOfferOptions { ice_restart: true }`

mod control;
mod initializer;

use super::transport::Transport;
use super::types::{IceCandidate, SdpKind, SessionDescription, TransportEvent};
use crate::core::protocol::frame::WirePayload;
use crate::core::signaling::PeerId;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub use initializer::RtcConnector;

// ── Event sink ───────────────────────────────────────────────────────────────

/// Where webrtc callbacks report to. Detaching it on close silences every
/// callback still registered on the connection and its channel.
#[derive(Clone)]
pub(crate) struct EventSink(Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>);

impl EventSink {
    fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self(Arc::new(std::sync::Mutex::new(Some(tx))))
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Ok(guard) = self.0.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    fn detach(&self) {
        if let Ok(mut guard) = self.0.lock() {
            guard.take();
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub struct RtcTransport {
    peer: PeerId,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    sink: EventSink,
}

#[async_trait]
impl Transport for RtcTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then_some(RTCOfferOptions {
            ice_restart: true,
            voice_activity_detection: false,
        });
        let offer = self.pc.create_offer(options).await?;
        self.pc.set_local_description(offer.clone()).await?;
        debug!(event = "webrtc_offer", peer = %self.peer, ice_restart);
        Ok(from_rtc(offer))
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.pc.set_remote_description(to_rtc(offer)?).await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        debug!(event = "webrtc_answer", peer = %self.peer);
        Ok(from_rtc(answer))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(answer)?).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn send(&self, payload: WirePayload) -> Result<()> {
        let dc = self
            .channel
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("data channel to {} not ready", self.peer))?;
        match payload {
            WirePayload::Text(text) => dc.send_text(text).await?,
            WirePayload::Binary(bytes) => dc.send(&bytes).await?,
        };
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        match self.channel.read().await.as_ref() {
            Some(dc) => dc.buffered_amount().await,
            None => 0,
        }
    }

    async fn close(&self) -> Result<()> {
        self.sink.detach();
        if let Some(dc) = self.channel.write().await.take() {
            dc.close().await?;
        }
        self.pc.close().await?;
        Ok(())
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    let kind = match desc.sdp_type {
        RTCSdpType::Answer | RTCSdpType::Pranswer => SdpKind::Answer,
        _ => SdpKind::Offer,
    };
    SessionDescription::new(kind, desc.sdp)
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    })
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
