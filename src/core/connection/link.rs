//! PeerLink: one connection to one remote peer.
//!
//! Owns the transport, the negotiation role, the ICE restart budget and the
//! outbound queue. Everything the link observes is reported to its owner as
//! [`LinkEvent`]s; the owner never touches the transport directly.
//!
//! Flow control:
//! - `send` transmits immediately only when the channel is open, nothing is
//!   queued, and the transport's buffered amount is below the high-water
//!   mark. Otherwise the frame joins a FIFO queue. `send` never waits.
//! - The queue is drained on channel open and on every "buffered amount low"
//!   event, until it is empty or the buffer is full again.
//! - `writable` waits for the queue to drain. Senders call it between chunks
//!   so memory stays bounded.
//!
//! Recovery: the first ICE failure triggers one restart. The offerer
//! re-offers; the answerer waits for that offer, or takes an offer that
//! arrives while it still looks healthy as the peer's restart (its own
//! late report of that failure is then absorbed). Either way the restart is
//! spent. A second failure before the link reconnects is
//! terminal, and so is a restart that does not reconnect within the
//! connect timeout.

use super::transport::{Connector, Transport, TransportEvents};
use super::types::{
    IceCandidate, IceState, LinkEvent, LinkNotice, LinkState, NegotiationPhase, Role,
    SessionDescription, TransportEvent,
};
use crate::core::config::TransferConfig;
use crate::core::error::{LinkError, NegotiationError};
use crate::core::protocol::frame::{Frame, WirePayload};
use crate::core::signaling::PeerId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub struct PeerLink {
    inner: Arc<LinkInner>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct LinkInner {
    id: Uuid,
    peer: PeerId,
    role: Role,
    transport: Arc<dyn Transport>,
    high_water: usize,
    connect_timeout: Duration,
    shared: Mutex<LinkShared>,
    state: watch::Sender<LinkState>,
    drained: Notify,
    /// Wakes the pump when the deadline changes from outside it.
    rearm: Notify,
    notices: mpsc::UnboundedSender<LinkEvent>,
}

struct LinkShared {
    phase: NegotiationPhase,
    channel_open: bool,
    closed: bool,
    connected_once: bool,
    restart_attempted: bool,
    /// The restart came from the peer's offer, so our own report of the
    /// same failure may still be on its way.
    peer_restart: bool,
    /// Connect (or reconnect) deadline; `None` while connected.
    deadline: Option<Instant>,
    outbound: VecDeque<WirePayload>,
    /// Remote candidates that arrived before the remote description.
    pending_candidates: Vec<IceCandidate>,
}

impl PeerLink {
    /// Open a transport through `connector` and start driving it.
    pub async fn connect(
        connector: &dyn Connector,
        peer: PeerId,
        role: Role,
        config: &TransferConfig,
        notices: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<Self>, LinkError> {
        let (transport, events) = connector
            .open(&peer, role)
            .await
            .map_err(LinkError::Transport)?;
        Ok(Self::start(peer, role, transport, events, config, notices))
    }

    pub fn start(
        peer: PeerId,
        role: Role,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: &TransferConfig,
        notices: mpsc::UnboundedSender<LinkEvent>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Negotiating);
        let inner = Arc::new(LinkInner {
            id: Uuid::new_v4(),
            peer,
            role,
            transport,
            high_water: config.high_water,
            connect_timeout: config.connect_timeout,
            shared: Mutex::new(LinkShared {
                phase: NegotiationPhase::New,
                channel_open: false,
                closed: false,
                connected_once: false,
                restart_attempted: false,
                peer_restart: false,
                deadline: Some(Instant::now() + config.connect_timeout),
                outbound: VecDeque::new(),
                pending_candidates: Vec::new(),
            }),
            state,
            drained: Notify::new(),
            rearm: Notify::new(),
            notices,
        });

        debug!(event = "link_created", peer = %inner.peer, role = %role, link = %inner.id);
        let pump = tokio::spawn(pump(inner.clone(), events));

        Arc::new(Self {
            inner,
            pump: std::sync::Mutex::new(Some(pump)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.inner.peer
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> LinkState {
        self.inner.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    pub async fn phase(&self) -> NegotiationPhase {
        self.inner.shared.lock().await.phase
    }

    /// Frames waiting in the outbound queue.
    pub async fn queued(&self) -> usize {
        self.inner.shared.lock().await.outbound.len()
    }

    // ── Negotiation ──────────────────────────────────────────────────────

    pub async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        const OP: &str = "create_offer";
        self.expect_role(OP, Role::Offerer)?;

        let mut shared = self.inner.shared.lock().await;
        shared.ensure_usable()?;
        if shared.phase != NegotiationPhase::New {
            return Err(out_of_order(OP, shared.phase));
        }

        let offer = self
            .inner
            .transport
            .create_offer(false)
            .await
            .map_err(LinkError::Transport)?;
        shared.phase = NegotiationPhase::OfferSent;
        debug!(event = "offer_created", peer = %self.inner.peer);
        Ok(offer)
    }

    pub async fn accept_answer(&self, answer: SessionDescription) -> Result<(), LinkError> {
        const OP: &str = "accept_answer";
        self.expect_role(OP, Role::Offerer)?;

        let mut shared = self.inner.shared.lock().await;
        shared.ensure_usable()?;
        if shared.phase != NegotiationPhase::OfferSent {
            return Err(out_of_order(OP, shared.phase));
        }

        self.inner
            .transport
            .apply_answer(answer)
            .await
            .map_err(LinkError::Transport)?;
        shared.phase = NegotiationPhase::Stable;
        self.inner.drain_candidates(&mut shared).await;
        debug!(event = "answer_applied", peer = %self.inner.peer);
        Ok(())
    }

    /// Apply the peer's offer and return our answer.
    ///
    /// Accepted initially, after a local ICE failure, and on a stable link
    /// that has connected and still has its restart: the peer saw ICE fail
    /// first and this is its restart offer.
    pub async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, LinkError> {
        const OP: &str = "accept_offer";
        self.expect_role(OP, Role::Answerer)?;

        let mut shared = self.inner.shared.lock().await;
        shared.ensure_usable()?;
        match shared.phase {
            NegotiationPhase::New | NegotiationPhase::Restarting => {}
            NegotiationPhase::Stable if shared.connected_once && !shared.restart_attempted => {
                warn!(event = "ice_restart", peer = %self.inner.peer, role = %self.inner.role, "Peer restarted ICE");
                shared.peer_restart = true;
                self.inner.begin_restart(&mut shared);
            }
            phase => return Err(out_of_order(OP, phase)),
        }

        let answer = self
            .inner
            .transport
            .apply_offer(offer)
            .await
            .map_err(LinkError::Transport)?;
        shared.phase = NegotiationPhase::Stable;
        self.inner.drain_candidates(&mut shared).await;
        debug!(event = "offer_applied", peer = %self.inner.peer);
        Ok(answer)
    }

    /// Apply a remote candidate, or hold it until the remote description is
    /// in place.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        let mut shared = self.inner.shared.lock().await;
        shared.ensure_usable()?;
        if shared.phase != NegotiationPhase::Stable {
            shared.pending_candidates.push(candidate);
            trace!(
                event = "ice_candidate_buffered",
                peer = %self.inner.peer,
                buffered = shared.pending_candidates.len()
            );
            return Ok(());
        }
        self.inner
            .transport
            .add_candidate(candidate)
            .await
            .map_err(LinkError::Transport)
    }

    fn expect_role(&self, op: &'static str, expected: Role) -> Result<(), NegotiationError> {
        if self.inner.role == expected {
            Ok(())
        } else {
            Err(NegotiationError::WrongRole { op, expected })
        }
    }

    // ── Data ─────────────────────────────────────────────────────────────

    pub async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        let payload = frame
            .encode()
            .map_err(|e| LinkError::Transport(e.into()))?;
        let inner = &self.inner;

        let mut shared = inner.shared.lock().await;
        shared.ensure_usable()?;
        if inner.current_state() == LinkState::Failed {
            return Err(LinkError::Failed);
        }

        if shared.channel_open
            && shared.outbound.is_empty()
            && inner.transport.buffered_amount().await < inner.high_water
        {
            inner
                .transport
                .send(payload)
                .await
                .map_err(LinkError::Transport)?;
        } else {
            shared.outbound.push_back(payload);
            trace!(event = "dc_queued", peer = %inner.peer, queued = shared.outbound.len());
        }
        Ok(())
    }

    /// Resolve once every queued frame has been handed to the transport.
    pub async fn writable(&self) -> Result<(), LinkError> {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let shared = self.inner.shared.lock().await;
                shared.ensure_usable()?;
                if self.inner.current_state() == LinkState::Failed {
                    return Err(LinkError::Failed);
                }
                if shared.outbound.is_empty() {
                    return Ok(());
                }
            }

            drained.await;
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    /// Close the transport, drop queued frames and stop reporting events.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        {
            let mut shared = self.inner.shared.lock().await;
            if shared.closed {
                return;
            }
            shared.closed = true;
            shared.channel_open = false;
            shared.outbound.clear();
            shared.pending_candidates.clear();
        }
        self.inner.drained.notify_waiters();
        self.stop_pump();

        if let Err(e) = self.inner.transport.close().await {
            warn!(event = "link_close_failure", peer = %self.inner.peer, error = %format!("{e:#}"));
        }
        info!(event = "link_closed", peer = %self.inner.peer, role = %self.inner.role);
    }

    fn stop_pump(&self) {
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

fn out_of_order(op: &'static str, phase: NegotiationPhase) -> LinkError {
    NegotiationError::OutOfOrder { op, phase }.into()
}

impl LinkShared {
    fn ensure_usable(&self) -> Result<(), LinkError> {
        if self.closed {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }
}

// ── Event pump ───────────────────────────────────────────────────────────────

async fn pump(inner: Arc<LinkInner>, mut events: TransportEvents) {
    loop {
        let deadline = inner.shared.lock().await.deadline;

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => inner.handle(event).await,
                None => {
                    debug!(event = "transport_events_closed", peer = %inner.peer);
                    break;
                }
            },
            _ = inner.rearm.notified() => {}
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                inner.on_deadline().await;
            }
        }
    }
}

impl LinkInner {
    fn current_state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn notify(&self, notice: LinkNotice) {
        let _ = self.notices.send(LinkEvent {
            peer: self.peer.clone(),
            link_id: self.id,
            role: self.role,
            notice,
        });
    }

    /// Move to `next` and report it. `Failed` is terminal.
    fn set_state(&self, next: LinkState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next || *current == LinkState::Failed {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.notify(LinkNotice::State(next));
        }
        changed
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::ChannelOpen => {
                self.shared.lock().await.channel_open = true;
                debug!(event = "dc_open", peer = %self.peer);
                self.flush().await;
            }
            TransportEvent::ChannelClosed => {
                let closed_locally = {
                    let mut shared = self.shared.lock().await;
                    shared.channel_open = false;
                    shared.closed
                };
                if !closed_locally {
                    warn!(event = "dc_closed", peer = %self.peer, "DataChannel closed by transport");
                    self.fail().await;
                }
            }
            TransportEvent::BufferedAmountLow => self.flush().await,
            TransportEvent::Message(payload) => match Frame::decode(payload) {
                Ok(frame) => self.notify(LinkNotice::Frame(frame)),
                Err(violation) => {
                    warn!(event = "protocol_violation", peer = %self.peer, %violation, "Dropping frame");
                }
            },
            TransportEvent::LocalCandidate(candidate) => {
                self.notify(LinkNotice::Candidate(candidate));
            }
            TransportEvent::Ice(state) => self.on_ice(state).await,
        }
    }

    async fn on_ice(&self, state: IceState) {
        match state {
            IceState::Connected => {
                {
                    let mut shared = self.shared.lock().await;
                    shared.connected_once = true;
                    shared.deadline = None;
                    shared.peer_restart = false;
                    // Reconnecting re-arms the restart for the next failure.
                    shared.restart_attempted = false;
                }
                if self.set_state(LinkState::Connected) {
                    info!(event = "webrtc_connected", peer = %self.peer, role = %self.role);
                }
            }
            IceState::Failed => self.on_ice_failed().await,
            IceState::Disconnected => {
                warn!(
                    event = "webrtc_disconnected",
                    peer = %self.peer,
                    "ICE transient disconnect (may recover)"
                );
            }
            IceState::Checking | IceState::Closed => {
                trace!(event = "ice_state", peer = %self.peer, ?state);
            }
        }
    }

    async fn on_ice_failed(&self) {
        let mut shared = self.shared.lock().await;
        if shared.closed || self.current_state() == LinkState::Failed {
            return;
        }

        if shared.restart_attempted && shared.peer_restart {
            shared.peer_restart = false;
            debug!(event = "ice_failed_during_peer_restart", peer = %self.peer);
            return;
        }

        if shared.restart_attempted {
            drop(shared);
            error!(event = "webrtc_failed", peer = %self.peer, "ICE failed again after restart");
            self.fail().await;
            return;
        }

        warn!(event = "ice_restart", peer = %self.peer, role = %self.role, "ICE failed, restarting");
        self.begin_restart(&mut shared);

        match self.role {
            Role::Offerer => match self.transport.create_offer(true).await {
                Ok(offer) => {
                    shared.phase = NegotiationPhase::OfferSent;
                    drop(shared);
                    self.notify(LinkNotice::Offer(offer));
                }
                Err(e) => {
                    drop(shared);
                    error!(event = "ice_restart_failure", peer = %self.peer, error = %format!("{e:#}"));
                    self.fail().await;
                }
            },
            Role::Answerer => shared.phase = NegotiationPhase::Restarting,
        }
    }

    /// Spend the restart and give it `connect_timeout` to reconnect.
    fn begin_restart(&self, shared: &mut LinkShared) {
        shared.restart_attempted = true;
        shared.deadline = Some(Instant::now() + self.connect_timeout);
        self.rearm.notify_one();
        self.set_state(LinkState::Negotiating);
    }

    async fn on_deadline(&self) {
        let connected_once = {
            let mut shared = self.shared.lock().await;
            shared.deadline = None;
            if shared.closed || self.current_state() != LinkState::Negotiating {
                return;
            }
            shared.connected_once
        };

        let timeout_ms = self.connect_timeout.as_millis() as u64;
        if connected_once {
            error!(event = "webrtc_restart_timeout", peer = %self.peer, timeout_ms, "ICE restart did not reconnect");
        } else {
            error!(event = "webrtc_connect_timeout", peer = %self.peer, timeout_ms, "Link never connected");
        }
        self.fail().await;
    }

    /// Terminal failure: drop queued frames and wake every writer.
    async fn fail(&self) {
        {
            let mut shared = self.shared.lock().await;
            shared.outbound.clear();
            shared.pending_candidates.clear();
        }
        self.set_state(LinkState::Failed);
        self.drained.notify_waiters();
    }

    async fn flush(&self) {
        let mut shared = self.shared.lock().await;
        if shared.closed || !shared.channel_open {
            return;
        }

        let mut sent = 0usize;
        while let Some(payload) = shared.outbound.front().cloned() {
            if self.transport.buffered_amount().await >= self.high_water {
                break;
            }
            if let Err(e) = self.transport.send(payload).await {
                warn!(event = "dc_send_failure", peer = %self.peer, error = %format!("{e:#}"));
                break;
            }
            shared.outbound.pop_front();
            sent += 1;
        }

        if sent > 0 {
            trace!(event = "dc_flushed", peer = %self.peer, sent, left = shared.outbound.len());
        }
        if shared.outbound.is_empty() {
            self.drained.notify_waiters();
        }
    }

    async fn drain_candidates(&self, shared: &mut LinkShared) {
        for candidate in std::mem::take(&mut shared.pending_candidates) {
            if let Err(e) = self.transport.add_candidate(candidate).await {
                warn!(event = "ice_candidate_rejected", peer = %self.peer, error = %format!("{e:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::types::SdpKind;
    use crate::core::protocol::frame::ControlFrame;
    use crate::core::testing::{candidate, MockTransport};
    use bytes::Bytes;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> TransferConfig {
        TransferConfig {
            high_water: 1_000,
            ..TransferConfig::default()
        }
    }

    fn link(
        role: Role,
        config: &TransferConfig,
    ) -> (Arc<PeerLink>, Arc<MockTransport>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (transport, events) = MockTransport::standalone();
        let (tx, rx) = mpsc::unbounded_channel();
        let link = PeerLink::start(
            PeerId::new("remote"),
            role,
            transport.clone(),
            events,
            config,
            tx,
        );
        (link, transport, rx)
    }

    fn answer() -> SessionDescription {
        SessionDescription::new(SdpKind::Answer, "answer")
    }

    fn offer() -> SessionDescription {
        SessionDescription::new(SdpKind::Offer, "offer")
    }

    fn data(tag: u8) -> Frame {
        Frame::Data(Bytes::from(vec![tag; 10]))
    }

    async fn wait_state(link: &PeerLink, want: LinkState) {
        let mut rx = link.subscribe_state();
        timeout(WAIT, rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn next_notice(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkNotice {
        timeout(WAIT, rx.recv()).await.expect("no notice").unwrap().notice
    }

    /// Next notice that is not a locally gathered candidate.
    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkNotice {
        loop {
            match next_notice(rx).await {
                LinkNotice::Candidate(_) => continue,
                other => return other,
            }
        }
    }

    async fn connected_offerer(
        config: &TransferConfig,
    ) -> (Arc<PeerLink>, Arc<MockTransport>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link, transport, mut rx) = link(Role::Offerer, config);
        link.create_offer().await.unwrap();
        link.accept_answer(answer()).await.unwrap();
        transport.emit(TransportEvent::ChannelOpen);
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;
        // The mock reports one local candidate per offer.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event.notice, LinkNotice::State(LinkState::Failed)));
        }
        (link, transport, rx)
    }

    // ── Negotiation order ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_offerer_sequence() {
        let (link, _t, _rx) = link(Role::Offerer, &config());

        let err = link.accept_answer(answer()).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::Negotiation(NegotiationError::OutOfOrder { phase: NegotiationPhase::New, .. })
        ));

        link.create_offer().await.unwrap();
        assert_eq!(link.phase().await, NegotiationPhase::OfferSent);
        assert!(matches!(
            link.create_offer().await,
            Err(LinkError::Negotiation(NegotiationError::OutOfOrder { .. }))
        ));

        link.accept_answer(answer()).await.unwrap();
        assert_eq!(link.phase().await, NegotiationPhase::Stable);
        assert!(link.accept_answer(answer()).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_role_is_rejected() {
        let (answerer, _t, _rx) = link(Role::Answerer, &config());
        assert!(matches!(
            answerer.create_offer().await,
            Err(LinkError::Negotiation(NegotiationError::WrongRole { expected: Role::Offerer, .. }))
        ));
        assert!(answerer.accept_answer(answer()).await.is_err());

        let (offerer, _t, _rx) = link(Role::Offerer, &config());
        assert!(matches!(
            offerer.accept_offer(offer()).await,
            Err(LinkError::Negotiation(NegotiationError::WrongRole { expected: Role::Answerer, .. }))
        ));
    }

    #[tokio::test]
    async fn test_answerer_accepts_one_offer() {
        let (link, _t, _rx) = link(Role::Answerer, &config());
        let reply = link.accept_offer(offer()).await.unwrap();
        assert_eq!(reply.kind, SdpKind::Answer);
        assert!(matches!(
            link.accept_offer(offer()).await,
            Err(LinkError::Negotiation(NegotiationError::OutOfOrder { phase: NegotiationPhase::Stable, .. }))
        ));
    }

    #[tokio::test]
    async fn test_candidates_wait_for_remote_description() {
        let (link, transport, _rx) = link(Role::Answerer, &config());
        link.add_remote_candidate(candidate(1)).await.unwrap();
        link.add_remote_candidate(candidate(2)).await.unwrap();
        assert!(transport.applied_candidates().is_empty());

        link.accept_offer(offer()).await.unwrap();
        assert_eq!(transport.applied_candidates(), vec![candidate(1), candidate(2)]);

        link.add_remote_candidate(candidate(3)).await.unwrap();
        assert_eq!(transport.applied_candidates().len(), 3);
    }

    #[tokio::test]
    async fn test_local_candidates_are_reported() {
        let (link, _transport, mut rx) = link(Role::Offerer, &config());
        link.create_offer().await.unwrap();
        assert!(matches!(next_notice(&mut rx).await, LinkNotice::Candidate(_)));
    }

    // ── Flow control ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_before_open_is_queued_then_flushed() {
        let (link, transport, _rx) = link(Role::Offerer, &config());
        link.send(data(1)).await.unwrap();
        link.send(data(2)).await.unwrap();
        assert_eq!(link.queued().await, 2);
        assert!(transport.sent().is_empty());

        transport.emit(TransportEvent::ChannelOpen);
        timeout(WAIT, link.writable()).await.unwrap().unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], data(1).encode().unwrap());
        assert_eq!(sent[1], data(2).encode().unwrap());
    }

    #[tokio::test]
    async fn test_open_channel_below_high_water_sends_immediately() {
        let (link, transport, _rx) = connected_offerer(&config()).await;
        link.send(data(1)).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(link.queued().await, 0);
        link.writable().await.unwrap();
    }

    #[tokio::test]
    async fn test_backpressure_keeps_fifo_order() {
        let cfg = config();
        let (link, transport, _rx) = connected_offerer(&cfg).await;

        transport.set_buffered(cfg.high_water);
        link.send(data(1)).await.unwrap();
        link.send(data(2)).await.unwrap();
        assert!(transport.sent().is_empty());

        // Room in the buffer again, but earlier frames are still queued:
        // a new frame must not jump ahead of them.
        transport.set_buffered(0);
        link.send(data(3)).await.unwrap();
        assert!(transport.sent().is_empty());
        assert_eq!(link.queued().await, 3);

        transport.emit(TransportEvent::BufferedAmountLow);
        timeout(WAIT, link.writable()).await.unwrap().unwrap();

        let expected: Vec<_> = [1, 2, 3].map(|t| data(t).encode().unwrap()).into();
        assert_eq!(transport.sent(), expected);
    }

    #[tokio::test]
    async fn test_writable_waits_for_drain() {
        let cfg = config();
        let (link, transport, _rx) = connected_offerer(&cfg).await;
        transport.set_buffered(cfg.high_water);
        link.send(data(1)).await.unwrap();

        assert!(timeout(Duration::from_millis(50), link.writable()).await.is_err());

        transport.set_buffered(0);
        transport.emit(TransportEvent::BufferedAmountLow);
        timeout(WAIT, link.writable()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_incoming_messages_become_frames() {
        let (_link, transport, mut rx) = connected_offerer(&config()).await;
        let sid = Uuid::new_v4();

        transport.emit(TransportEvent::Message(WirePayload::Text("{garbage".into())));
        transport.emit(TransportEvent::Message(
            Frame::from(ControlFrame::Start { sid }).encode().unwrap(),
        ));

        // The malformed message is dropped; the next notice is the good one.
        assert_eq!(
            next_signal(&mut rx).await,
            LinkNotice::Frame(Frame::Control(ControlFrame::Start { sid }))
        );
    }

    // ── ICE restart ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_single_failure_restarts_and_recovers() {
        let (link, transport, mut rx) = connected_offerer(&config()).await;

        transport.emit(TransportEvent::Ice(IceState::Failed));
        assert_eq!(next_signal(&mut rx).await, LinkNotice::State(LinkState::Negotiating));
        assert!(matches!(next_signal(&mut rx).await, LinkNotice::Offer(_)));
        assert_eq!(transport.restart_offers(), 1);

        link.accept_answer(answer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        assert_eq!(next_signal(&mut rx).await, LinkNotice::State(LinkState::Connected));
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(transport.restart_offers(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_restart_is_terminal() {
        let (link, transport, _rx) = connected_offerer(&config()).await;

        transport.emit(TransportEvent::Ice(IceState::Failed));
        transport.emit(TransportEvent::Ice(IceState::Failed));
        wait_state(&link, LinkState::Failed).await;
        assert_eq!(transport.restart_offers(), 1);

        // Terminal: a late recovery does not resurrect the link.
        transport.emit(TransportEvent::Ice(IceState::Connected));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.state(), LinkState::Failed);

        assert!(matches!(link.send(data(1)).await, Err(LinkError::Failed)));
        assert!(matches!(link.writable().await, Err(LinkError::Failed)));
    }

    #[tokio::test]
    async fn test_answerer_rearms_for_restart_offer() {
        let (link, transport, mut rx) = link(Role::Answerer, &config());
        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        transport.emit(TransportEvent::Ice(IceState::Failed));
        wait_state(&link, LinkState::Negotiating).await;
        assert_eq!(link.phase().await, NegotiationPhase::Restarting);

        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        // The answerer never offers.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event.notice, LinkNotice::Offer(_)));
        }
        assert_eq!(transport.restart_offers(), 0);
    }

    #[tokio::test]
    async fn test_stable_answerer_takes_peer_restart_offer() {
        let (link, transport, _rx) = link(Role::Answerer, &config());
        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        // Only the offerer saw ICE fail; its restart offer lands here first.
        link.accept_offer(offer()).await.unwrap();
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(link.phase().await, NegotiationPhase::Stable);

        // The restart is spent until the link reconnects.
        assert!(matches!(
            link.accept_offer(offer()).await,
            Err(LinkError::Negotiation(NegotiationError::OutOfOrder { .. }))
        ));

        // Our own report of the failure the peer restarted for is absorbed.
        transport.emit(TransportEvent::Ice(IceState::Failed));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.state(), LinkState::Negotiating);

        transport.emit(TransportEvent::Ice(IceState::Failed));
        wait_state(&link, LinkState::Failed).await;
    }

    #[tokio::test]
    async fn test_stable_answerer_restart_recovers() {
        let (link, transport, _rx) = link(Role::Answerer, &config());
        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        // Reconnecting restores the restart.
        link.accept_offer(offer()).await.unwrap();
        assert_eq!(link.state(), LinkState::Negotiating);
    }

    #[tokio::test]
    async fn test_lone_answerer_failure_times_out() {
        let cfg = TransferConfig {
            connect_timeout: Duration::from_millis(50),
            ..config()
        };
        let (link, transport, _rx) = link(Role::Answerer, &cfg);
        link.accept_offer(offer()).await.unwrap();
        transport.emit(TransportEvent::Ice(IceState::Connected));
        wait_state(&link, LinkState::Connected).await;

        // The peer never sends a restart offer.
        transport.emit(TransportEvent::Ice(IceState::Failed));
        wait_state(&link, LinkState::Failed).await;
        assert_eq!(link.phase().await, NegotiationPhase::Restarting);
    }

    #[tokio::test]
    async fn test_unanswered_restart_offer_times_out() {
        let cfg = TransferConfig {
            connect_timeout: Duration::from_millis(50),
            ..config()
        };
        let (link, transport, mut rx) = connected_offerer(&cfg).await;

        transport.emit(TransportEvent::Ice(IceState::Failed));
        assert_eq!(next_signal(&mut rx).await, LinkNotice::State(LinkState::Negotiating));
        assert!(matches!(next_signal(&mut rx).await, LinkNotice::Offer(_)));
        assert_eq!(next_signal(&mut rx).await, LinkNotice::State(LinkState::Failed));
        assert_eq!(link.phase().await, NegotiationPhase::OfferSent);
    }

    #[tokio::test]
    async fn test_failure_discards_queue() {
        let cfg = config();
        let (link, transport, _rx) = connected_offerer(&cfg).await;
        transport.set_buffered(cfg.high_water);
        link.send(data(1)).await.unwrap();

        let waiter = {
            let link = link.clone();
            tokio::spawn(async move { link.writable().await })
        };
        transport.emit(TransportEvent::ChannelClosed);

        let result = timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(LinkError::Failed)));
        assert_eq!(link.queued().await, 0);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails_link() {
        let cfg = TransferConfig {
            connect_timeout: Duration::from_millis(30),
            ..config()
        };
        let (link, _transport, mut rx) = link(Role::Offerer, &cfg);
        assert_eq!(next_notice(&mut rx).await, LinkNotice::State(LinkState::Failed));
        assert_eq!(link.state(), LinkState::Failed);
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (link, transport, _rx) = connected_offerer(&config()).await;
        link.close().await;
        link.close().await;

        assert!(transport.is_closed());
        assert!(matches!(link.send(data(1)).await, Err(LinkError::Closed)));
        assert!(matches!(link.writable().await, Err(LinkError::Closed)));
        assert!(matches!(
            link.add_remote_candidate(candidate(1)).await,
            Err(LinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_detaches_listeners() {
        let (link, transport, mut rx) = connected_offerer(&config()).await;
        link.close().await;

        transport.emit(TransportEvent::Message(WirePayload::Binary(Bytes::from_static(b"x"))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
