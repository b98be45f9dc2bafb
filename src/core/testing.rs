//! In-memory transports for exercising links and coordinators without a
//! network.
//!
//! A [`MockHub`] pairs transports by `(local, remote)`. Applying the answer
//! on the offerer side "connects" the pair: both ends see ICE connected and
//! the channel open, and sends on one end arrive as messages on the other.

use crate::core::connection::transport::{Connector, Transport, TransportEvents};
use crate::core::connection::types::{
    IceCandidate, IceState, Role, SdpKind, SessionDescription, TransportEvent,
};
use crate::core::protocol::frame::WirePayload;
use crate::core::signaling::PeerId;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn candidate(n: usize) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host", 5000 + n),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub(crate) struct MockTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    buffered: AtomicUsize,
    sent: Mutex<Vec<WirePayload>>,
    applied: Mutex<Vec<IceCandidate>>,
    /// `ice_restart` flag of every offer created.
    offers: Mutex<Vec<bool>>,
    closed: AtomicBool,
    wire: Option<Wire>,
}

struct Wire {
    hub: MockHub,
    local: PeerId,
    remote: PeerId,
}

impl MockTransport {
    fn build(wire: Option<Wire>) -> (Arc<Self>, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events,
            buffered: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            offers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            wire,
        });
        (transport, rx)
    }

    /// A transport driven entirely by the test.
    pub(crate) fn standalone() -> (Arc<Self>, TransportEvents) {
        Self::build(None)
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn set_buffered(&self, amount: usize) {
        self.buffered.store(amount, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<WirePayload> {
        lock(&self.sent).clone()
    }

    pub(crate) fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.applied).clone()
    }

    pub(crate) fn restart_offers(&self) -> usize {
        lock(&self.offers).iter().filter(|r| **r).count()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let n = {
            let mut offers = lock(&self.offers);
            offers.push(ice_restart);
            offers.len()
        };
        self.emit(TransportEvent::LocalCandidate(candidate(n)));
        Ok(SessionDescription::new(SdpKind::Offer, format!("mock-offer-{n}")))
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.kind != SdpKind::Offer {
            bail!("expected an offer");
        }
        self.emit(TransportEvent::LocalCandidate(candidate(100)));
        Ok(SessionDescription::new(SdpKind::Answer, "mock-answer"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            bail!("expected an answer");
        }
        if let Some(wire) = &self.wire {
            wire.hub.connect(&wire.local, &wire.remote);
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        lock(&self.applied).push(candidate);
        Ok(())
    }

    async fn send(&self, payload: WirePayload) -> Result<()> {
        if self.is_closed() {
            bail!("transport closed");
        }
        lock(&self.sent).push(payload.clone());
        if let Some(wire) = &self.wire {
            wire.hub.deliver(&wire.local, &wire.remote, payload);
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Hub / connector ──────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub(crate) struct MockHub {
    transports: Arc<Mutex<HashMap<(PeerId, PeerId), Arc<MockTransport>>>>,
    opened: Arc<AtomicUsize>,
}

impl MockHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self, local: &str) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            local: PeerId::new(local),
            hub: self.clone(),
        })
    }

    /// Transports opened so far, across all peers.
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn transport(&self, local: &str, remote: &str) -> Option<Arc<MockTransport>> {
        lock(&self.transports)
            .get(&(PeerId::new(local), PeerId::new(remote)))
            .cloned()
    }

    fn pair(&self, a: &PeerId, b: &PeerId) -> Vec<Arc<MockTransport>> {
        let map = lock(&self.transports);
        [(a, b), (b, a)]
            .into_iter()
            .filter_map(|(x, y)| map.get(&(x.clone(), y.clone())).cloned())
            .collect()
    }

    fn connect(&self, a: &PeerId, b: &PeerId) {
        for t in self.pair(a, b) {
            t.emit(TransportEvent::ChannelOpen);
            t.emit(TransportEvent::Ice(IceState::Connected));
        }
    }

    /// Report an ICE state on both ends of a pair.
    pub(crate) fn set_ice(&self, a: &str, b: &str, state: IceState) {
        for t in self.pair(&PeerId::new(a), &PeerId::new(b)) {
            t.emit(TransportEvent::Ice(state));
        }
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, payload: WirePayload) {
        let target = lock(&self.transports).get(&(to.clone(), from.clone())).cloned();
        if let Some(t) = target.filter(|t| !t.is_closed()) {
            t.emit(TransportEvent::Message(payload));
        }
    }
}

pub(crate) struct MockConnector {
    local: PeerId,
    hub: MockHub,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, peer: &PeerId, _role: Role) -> Result<(Arc<dyn Transport>, TransportEvents)> {
        let (transport, events) = MockTransport::build(Some(Wire {
            hub: self.hub.clone(),
            local: self.local.clone(),
            remote: peer.clone(),
        }));
        lock(&self.hub.transports).insert((self.local.clone(), peer.clone()), transport.clone());
        self.hub.opened.fetch_add(1, Ordering::SeqCst);
        Ok((transport as Arc<dyn Transport>, events))
    }
}
