//! TransferCoordinator: the per-room actor that drives every transfer.
//!
//! One task per room owns the [`Registry`]. It is the only writer of
//! transfer state and of the peer → link mapping, and it serializes:
//! - commands from [`Coordinator`] handles (request / accept / reject / ...)
//! - signaling deliveries (requests, answers to them, SDP and ICE relay, roster)
//! - link notices (state changes, frames, local candidates, restart offers)
//! - reports from outgoing transfer tasks
//!
//! What the coordinator observes is published as [`CoordinatorEvent`]s.
//!
//! **Link rule**: at most one [`PeerLink`] per remote peer. Accepting a
//! request and receiving an accept both reuse an existing live link; only a
//! missing or failed one is replaced.

pub mod inbound;
pub mod outgoing;
pub mod registry;

use crate::core::config::TransferConfig;
use crate::core::connection::types::{LinkEvent, LinkNotice, LinkState, Role, SessionDescription};
use crate::core::connection::{Connector, PeerLink};
use crate::core::error::{LinkError, TransferError};
use crate::core::pipeline::assembler::Artifact;
use crate::core::pipeline::source::OutgoingFile;
use crate::core::protocol::frame::Frame;
use crate::core::signaling::{
    Delivery, Inbound, LinkTarget, PeerId, PeerIdentity, RoomSignals, Roster, Signal, SignalingChannel,
    SubscriptionId,
};
use crate::core::transaction::{OutboundBatch, TransferRequest, TransferState};
use crate::utils::sos::SignalOfStop;
use anyhow::Context;
use inbound::InboundOutcome;
use outgoing::OutgoingReport;
use registry::{PeerSlot, Registry};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub use registry::{CoordinatorSnapshot, PeerSnapshot};

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        })
    }
}

/// What a coordinator reports to its owner. `None` statuses and progress
/// mean "absent": idle, no link, nothing in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    RequestReceived(TransferRequest),
    RequestCleared {
        peer: PeerId,
    },
    TransferStatus {
        peer: PeerId,
        state: Option<TransferState>,
    },
    Progress {
        peer: PeerId,
        direction: Direction,
        progress: Option<f64>,
    },
    ConnectionStatus {
        peer: PeerId,
        status: Option<ConnectionStatus>,
    },
    FileReceived {
        peer: PeerId,
        artifact: Artifact,
    },
    RequestExpired {
        peer: PeerId,
    },
}

// ── Handle ───────────────────────────────────────────────────────────────────

enum Command {
    Request {
        target: PeerId,
        files: Vec<OutgoingFile>,
        reply: oneshot::Sender<Result<Uuid, TransferError>>,
    },
    Accept {
        source: PeerId,
        reply: oneshot::Sender<Result<(), TransferError>>,
    },
    Reject {
        source: PeerId,
        reply: oneshot::Sender<Result<(), TransferError>>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running room actor.
#[derive(Clone)]
pub struct Coordinator {
    local: PeerId,
    commands: mpsc::UnboundedSender<Command>,
}

impl Coordinator {
    /// Subscribe to the room's signaling topics and start the actor. The
    /// subscriptions are in place when this returns.
    pub async fn spawn(
        identity: PeerIdentity,
        room: impl Into<String>,
        signaling: Arc<dyn SignalingChannel>,
        connector: Arc<dyn Connector>,
        config: TransferConfig,
        sos: SignalOfStop,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<CoordinatorEvent>)> {
        let local = identity.id.clone();
        let signals = RoomSignals::new(signaling, room, local.clone());

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let subscriptions = signals
            .subscribe_inbox(delivery_tx)
            .await
            .context("subscribing to room signals")?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        info!(event = "coordinator_started", peer = %local, room = %signals.room());
        let actor = RoomActor {
            signals,
            identity,
            connector,
            config,
            registry: Registry::new(),
            events: event_tx,
            link_tx,
            report_tx,
            subscriptions,
        };
        tokio::spawn(actor.run(command_rx, delivery_rx, link_rx, report_rx, sos));

        Ok((
            Self {
                local,
                commands: command_tx,
            },
            event_rx,
        ))
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Offer `files` to `target`. Returns the batch's session id.
    pub async fn request(&self, target: &PeerId, files: Vec<OutgoingFile>) -> Result<Uuid, TransferError> {
        self.call(|reply| Command::Request {
            target: target.clone(),
            files,
            reply,
        })
        .await?
    }

    pub async fn accept(&self, source: &PeerId) -> Result<(), TransferError> {
        self.call(|reply| Command::Accept {
            source: source.clone(),
            reply,
        })
        .await?
    }

    pub async fn reject(&self, source: &PeerId) -> Result<(), TransferError> {
        self.call(|reply| Command::Reject {
            source: source.clone(),
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, TransferError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    /// Unsubscribe, close every link and stop the actor. Safe to call on a
    /// stopped coordinator.
    pub async fn shutdown(&self) {
        let _ = self.call(|reply| Command::Shutdown { reply }).await;
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, TransferError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| TransferError::Shutdown)?;
        rx.await.map_err(|_| TransferError::Shutdown)
    }
}

// ── Actor ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    LinkFailed,
    Departed,
    Shutdown,
}

struct RoomActor {
    signals: RoomSignals,
    identity: PeerIdentity,
    connector: Arc<dyn Connector>,
    config: TransferConfig,
    registry: Registry,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    report_tx: mpsc::UnboundedSender<OutgoingReport>,
    subscriptions: Vec<SubscriptionId>,
}

impl RoomActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut deliveries: mpsc::UnboundedReceiver<Delivery>,
        mut links: mpsc::UnboundedReceiver<LinkEvent>,
        mut reports: mpsc::UnboundedReceiver<OutgoingReport>,
        sos: SignalOfStop,
    ) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                _ = sos.wait() => break,
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(delivery) = deliveries.recv() => self.on_delivery(delivery).await,
                Some(event) = links.recv() => self.on_link_event(event).await,
                Some(report) = reports.recv() => self.on_report(report),
                _ = sweep.tick() => self.expire_requests(),
            }
        }

        self.teardown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn local(&self) -> &PeerId {
        self.signals.local()
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    async fn publish(&self, to: &PeerId, signal: Signal) {
        if let Err(e) = self.signals.publish(to, &signal).await {
            warn!(
                event = "signal_send_failure",
                peer = %to,
                kind = %signal.kind(),
                error = %format!("{e:#}")
            );
        }
    }

    fn set_connection(&mut self, peer: &PeerId, status: Option<ConnectionStatus>) {
        let slot = self.registry.slot_mut(peer);
        if slot.connection == status {
            return;
        }
        slot.connection = status;
        self.emit(CoordinatorEvent::ConnectionStatus {
            peer: peer.clone(),
            status,
        });
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Request { target, files, reply } => {
                let _ = reply.send(self.request(target, files).await);
            }
            Command::Accept { source, reply } => {
                let _ = reply.send(self.accept(source).await);
            }
            Command::Reject { source, reply } => {
                let _ = reply.send(self.reject(source).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot(self.local()));
            }
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn request(&mut self, target: PeerId, files: Vec<OutgoingFile>) -> Result<Uuid, TransferError> {
        if files.is_empty() {
            return Err(TransferError::EmptyRequest);
        }
        let mut state = self.registry.state(&target);
        state.on_request(&target)?;

        let batch = OutboundBatch::new(files);
        let signal = Signal::Request {
            from: self.local().clone(),
            identity: self.identity.clone(),
            files: batch.descriptors(),
        };
        self.signals
            .publish(&target, &signal)
            .await
            .map_err(TransferError::Signaling)?;

        let sid = batch.sid;
        info!(event = "transfer_requested", peer = %target, %sid, files = batch.files.len());
        let slot = self.registry.slot_mut(&target);
        slot.state = state;
        slot.outbound = Some(batch);
        self.emit(CoordinatorEvent::TransferStatus {
            peer: target,
            state: Some(TransferState::Pending),
        });
        Ok(sid)
    }

    async fn accept(&mut self, source: PeerId) -> Result<(), TransferError> {
        self.pending_request(&source)?;

        let signal = Signal::Accept {
            from: self.local().clone(),
        };
        self.signals
            .publish(&source, &signal)
            .await
            .map_err(TransferError::Signaling)?;

        // Only a delivered answer retires the request; a failed publish
        // leaves it for the user to retry.
        let files = self.clear_request(&source).map_or(0, |r| r.files.len());
        info!(event = "transfer_accepted", peer = %source, files);

        if let Err(e) = self.ensure_link(&source, Role::Answerer).await {
            self.link_open_failed(&source, e);
        }
        Ok(())
    }

    async fn reject(&mut self, source: PeerId) -> Result<(), TransferError> {
        self.pending_request(&source)?;

        let signal = Signal::Reject {
            from: self.local().clone(),
        };
        self.signals
            .publish(&source, &signal)
            .await
            .map_err(TransferError::Signaling)?;

        self.clear_request(&source);
        info!(event = "transfer_rejected", peer = %source);
        Ok(())
    }

    fn pending_request(&self, source: &PeerId) -> Result<&TransferRequest, TransferError> {
        self.registry
            .get(source)
            .and_then(|s| s.incoming.as_ref())
            .ok_or_else(|| TransferError::NoPendingRequest(source.clone()))
    }

    /// Drop the surfaced request from `source`, telling the UI if there was one.
    fn clear_request(&mut self, source: &PeerId) -> Option<TransferRequest> {
        let request = self.registry.get_mut(source).and_then(|s| s.incoming.take())?;
        self.emit(CoordinatorEvent::RequestCleared { peer: source.clone() });
        Some(request)
    }

    // ── Links ────────────────────────────────────────────────────────────

    /// The peer's live link, or a new one in `role`. The flag tells whether
    /// the link was just created.
    async fn ensure_link(&mut self, peer: &PeerId, role: Role) -> Result<(Arc<PeerLink>, bool), LinkError> {
        if let Some(link) = self.registry.get(peer).and_then(PeerSlot::live_link) {
            debug!(event = "link_reused", peer = %peer, role = %link.role());
            return Ok((link, false));
        }
        if let Some(stale) = self.registry.get_mut(peer).and_then(|s| s.link.take()) {
            stale.close().await;
        }

        let link = PeerLink::connect(
            self.connector.as_ref(),
            peer.clone(),
            role,
            &self.config,
            self.link_tx.clone(),
        )
        .await?;
        self.registry.slot_mut(peer).link = Some(link.clone());
        self.set_connection(peer, Some(ConnectionStatus::Connecting));
        Ok((link, true))
    }

    fn link_open_failed(&mut self, peer: &PeerId, e: LinkError) {
        error!(event = "link_open_failure", peer = %peer, error = %e);
        self.set_connection(peer, Some(ConnectionStatus::Error));
    }

    async fn answer_offer(&mut self, link: &PeerLink, offer: SessionDescription) {
        match link.accept_offer(offer).await {
            Ok(answer) => {
                let signal = Signal::Answer {
                    from: self.local().clone(),
                    answer,
                };
                self.publish(link.peer(), signal).await;
            }
            Err(e) => warn!(event = "offer_apply_failure", peer = %link.peer(), error = %e),
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        let LinkEvent {
            peer,
            link_id,
            role,
            notice,
        } = event;
        if self.registry.get(&peer).and_then(|s| s.current_link(link_id)).is_none() {
            trace!(event = "stale_link_notice", peer = %peer, link = %link_id);
            return;
        }

        match notice {
            LinkNotice::State(LinkState::Connected) => {
                self.set_connection(&peer, Some(ConnectionStatus::Connected));
            }
            LinkNotice::State(LinkState::Negotiating) => {
                self.set_connection(&peer, Some(ConnectionStatus::Connecting));
            }
            LinkNotice::State(LinkState::Failed) => {
                error!(event = "link_failed", peer = %peer, role = %role);
                self.teardown_peer(&peer, Teardown::LinkFailed).await;
            }
            LinkNotice::Frame(frame) => self.on_frame(&peer, frame),
            LinkNotice::Candidate(candidate) => {
                // Candidates we gather apply to the peer's side of the link.
                let signal = Signal::Ice {
                    from: self.local().clone(),
                    target: LinkTarget::for_role(role.opposite()),
                    candidate,
                };
                self.publish(&peer, signal).await;
            }
            LinkNotice::Offer(offer) => {
                info!(event = "ice_restart_offer", peer = %peer);
                let signal = Signal::Offer {
                    from: self.local().clone(),
                    offer,
                };
                self.publish(&peer, signal).await;
            }
        }
    }

    fn on_frame(&mut self, peer: &PeerId, frame: Frame) {
        let Some(slot) = self.registry.get_mut(peer) else {
            return;
        };
        let outcomes = match slot.inbound.handle(frame) {
            Ok(outcomes) => outcomes,
            Err(violation) => {
                warn!(event = "protocol_violation", peer = %peer, %violation, "Dropping frame");
                return;
            }
        };

        for outcome in outcomes {
            let event = match outcome {
                InboundOutcome::Progress(p) => CoordinatorEvent::Progress {
                    peer: peer.clone(),
                    direction: Direction::Incoming,
                    progress: Some(p),
                },
                InboundOutcome::FileReceived(artifact) => {
                    info!(
                        event = "file_received",
                        peer = %peer,
                        name = %artifact.name(),
                        size = artifact.data.len()
                    );
                    CoordinatorEvent::FileReceived {
                        peer: peer.clone(),
                        artifact,
                    }
                }
                InboundOutcome::Finished => CoordinatorEvent::Progress {
                    peer: peer.clone(),
                    direction: Direction::Incoming,
                    progress: None,
                },
            };
            self.emit(event);
        }
    }

    // ── Signaling ────────────────────────────────────────────────────────

    async fn on_delivery(&mut self, delivery: Delivery) {
        match self.signals.decode(delivery) {
            Ok(Inbound::Signal(signal)) => self.on_signal(signal).await,
            Ok(Inbound::Roster(roster)) => self.on_roster(roster).await,
            Err(violation) => warn!(event = "signal_dropped", %violation),
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        if signal.from_peer() == self.local() {
            debug!(event = "own_signal_ignored", kind = %signal.kind());
            return;
        }
        trace!(event = "signal_received", kind = %signal.kind(), peer = %signal.from_peer());

        match signal {
            Signal::Request { from, identity, files } => {
                let request = TransferRequest::new(from.clone(), identity, files);
                let replaced = self
                    .registry
                    .slot_mut(&from)
                    .incoming
                    .replace(request.clone())
                    .is_some();
                info!(
                    event = "transfer_request_received",
                    peer = %from,
                    files = request.files.len(),
                    replaced
                );
                self.emit(CoordinatorEvent::RequestReceived(request));
            }
            Signal::Accept { from } => self.on_remote_accept(from).await,
            Signal::Reject { from } => self.on_remote_reject(from),
            Signal::Ice {
                from,
                target,
                candidate,
            } => {
                let Some(link) = self.registry.get(&from).and_then(|s| s.link.clone()) else {
                    debug!(event = "ice_candidate_dropped", peer = %from, "No link for candidate");
                    return;
                };
                if link.role() != target.role() {
                    warn!(
                        event = "ice_target_mismatch",
                        peer = %from,
                        target = ?target,
                        role = %link.role(),
                        "Dropping candidate"
                    );
                    return;
                }
                if let Err(e) = link.add_remote_candidate(candidate).await {
                    warn!(event = "ice_candidate_failure", peer = %from, error = %e);
                }
            }
            Signal::Offer { from, offer } => self.on_remote_offer(from, offer).await,
            Signal::Answer { from, answer } => {
                let Some(link) = self.registry.get(&from).and_then(|s| s.link.clone()) else {
                    warn!(event = "answer_without_link", peer = %from);
                    return;
                };
                if let Err(e) = link.accept_answer(answer).await {
                    warn!(event = "answer_apply_failure", peer = %from, error = %e);
                }
            }
        }
    }

    async fn on_remote_accept(&mut self, from: PeerId) {
        let Some(slot) = self.registry.get_mut(&from) else {
            warn!(event = "unexpected_accept", peer = %from, "No request outstanding");
            return;
        };
        if slot.state.on_accept().is_none() {
            warn!(event = "unexpected_accept", peer = %from, state = %slot.state);
            return;
        }
        let Some(batch) = slot.outbound.as_mut() else {
            slot.state.settle();
            warn!(event = "accept_without_files", peer = %from);
            return;
        };
        batch.stop_clock();
        let (sid, files) = (batch.sid, batch.files.clone());
        slot.progress = Some(0.0);
        // Their answer to our request also settles any request they sent us.
        let mirror_cleared = slot.incoming.take().is_some();

        info!(event = "transfer_request_accepted", peer = %from, %sid);
        if mirror_cleared {
            self.emit(CoordinatorEvent::RequestCleared { peer: from.clone() });
        }
        self.emit(CoordinatorEvent::TransferStatus {
            peer: from.clone(),
            state: Some(TransferState::Accepted),
        });
        self.emit(CoordinatorEvent::Progress {
            peer: from.clone(),
            direction: Direction::Outgoing,
            progress: Some(0.0),
        });

        let link = match self.ensure_link(&from, Role::Offerer).await {
            Ok((link, created)) => {
                if created && link.role() == Role::Offerer {
                    match link.create_offer().await {
                        Ok(offer) => {
                            let signal = Signal::Offer {
                                from: self.local().clone(),
                                offer,
                            };
                            self.publish(&from, signal).await;
                        }
                        Err(e) => {
                            error!(event = "offer_create_failure", peer = %from, error = %e);
                            self.teardown_peer(&from, Teardown::LinkFailed).await;
                            return;
                        }
                    }
                }
                link
            }
            Err(e) => {
                self.link_open_failed(&from, e);
                self.abandon_outgoing(&from);
                return;
            }
        };

        let sending = outgoing::spawn(link, sid, files, self.config.chunk_size, self.report_tx.clone());
        self.registry.slot_mut(&from).sending = Some(sending);
    }

    fn on_remote_reject(&mut self, from: PeerId) {
        let Some(slot) = self.registry.get_mut(&from) else {
            warn!(event = "unexpected_reject", peer = %from, "No request outstanding");
            return;
        };
        if slot.state.on_reject().is_none() {
            warn!(event = "unexpected_reject", peer = %from, state = %slot.state);
            return;
        }
        let discarded = slot.outbound.take().map(|b| b.files.len()).unwrap_or(0);
        slot.state.settle();

        info!(event = "transfer_request_rejected", peer = %from, discarded);
        self.emit(CoordinatorEvent::TransferStatus {
            peer: from.clone(),
            state: Some(TransferState::Rejected),
        });
        self.emit(CoordinatorEvent::TransferStatus {
            peer: from,
            state: None,
        });
    }

    async fn on_remote_offer(&mut self, from: PeerId, offer: SessionDescription) {
        // Answerer links are opened by `accept`; an offer nobody asked for
        // must not open a connection.
        let Some(link) = self.registry.get(&from).and_then(PeerSlot::live_link) else {
            warn!(event = "offer_without_link", peer = %from, "Dropping unsolicited offer");
            return;
        };
        if link.role() != Role::Answerer {
            warn!(event = "offer_glare", peer = %from, "Offer received on the offering side");
            return;
        }
        self.answer_offer(&link, offer).await;
    }

    async fn on_roster(&mut self, roster: Roster) {
        let departed = self.registry.update_roster(roster.ids());
        debug!(event = "roster_updated", participants = roster.participants.len(), departed = departed.len());
        for peer in departed {
            info!(event = "peer_departed", peer = %peer);
            self.teardown_peer(&peer, Teardown::Departed).await;
        }
        self.registry.prune();
    }

    // ── Outgoing reports ─────────────────────────────────────────────────

    fn on_report(&mut self, report: OutgoingReport) {
        match report {
            OutgoingReport::Progress { peer, sid, progress } => {
                let Some(slot) = self.registry.get_mut(&peer) else {
                    return;
                };
                if slot.sending.as_ref().map(|s| s.sid) != Some(sid) {
                    return;
                }
                slot.progress = Some(progress);
                self.emit(CoordinatorEvent::Progress {
                    peer,
                    direction: Direction::Outgoing,
                    progress: Some(progress),
                });
            }
            OutgoingReport::Finished { peer, sid } => self.finish_outgoing(&peer, sid),
            OutgoingReport::Failed { peer, sid, error } => {
                warn!(event = "transfer_failed", peer = %peer, %sid, %error);
                self.finish_outgoing(&peer, sid);
            }
        }
    }

    fn finish_outgoing(&mut self, peer: &PeerId, sid: Uuid) {
        let is_current = self
            .registry
            .get(peer)
            .and_then(|s| s.sending.as_ref())
            .is_some_and(|s| s.sid == sid);
        if is_current {
            self.abandon_outgoing(peer);
        }
    }

    /// Back to idle: stop sending, drop the recorded files, clear progress.
    fn abandon_outgoing(&mut self, peer: &PeerId) {
        let Some(slot) = self.registry.get_mut(peer) else {
            return;
        };
        if let Some(sending) = slot.sending.take() {
            sending.abort();
        }
        slot.outbound = None;
        let had_progress = slot.progress.take().is_some();
        let was_busy = slot.state.is_busy();
        slot.state.settle();

        if had_progress {
            self.emit(CoordinatorEvent::Progress {
                peer: peer.clone(),
                direction: Direction::Outgoing,
                progress: None,
            });
        }
        if was_busy {
            self.emit(CoordinatorEvent::TransferStatus {
                peer: peer.clone(),
                state: None,
            });
        }
    }

    // ── Expiry and teardown ──────────────────────────────────────────────

    fn expire_requests(&mut self) {
        let now = Instant::now();
        let timeout = self.config.request_timeout;
        let mut expired = Vec::new();
        let mut stale = Vec::new();

        for (peer, slot) in self.registry.iter_mut() {
            let outbound_expired = slot.state == TransferState::Pending
                && slot.outbound.as_ref().is_some_and(|b| b.is_expired(now, timeout));
            if outbound_expired {
                slot.state.settle();
                slot.outbound = None;
                expired.push(peer.clone());
            }
            let incoming_stale = slot
                .incoming
                .as_ref()
                .is_some_and(|r| now.saturating_duration_since(r.received_at) >= timeout);
            if incoming_stale {
                slot.incoming = None;
                stale.push(peer.clone());
            }
        }

        for peer in expired {
            warn!(
                event = "request_expired",
                peer = %peer,
                timeout_ms = timeout.as_millis() as u64,
                "No answer to transfer request"
            );
            self.emit(CoordinatorEvent::RequestExpired { peer: peer.clone() });
            self.emit(CoordinatorEvent::TransferStatus { peer, state: None });
        }
        for peer in stale {
            debug!(event = "incoming_request_expired", peer = %peer);
            self.emit(CoordinatorEvent::RequestCleared { peer });
        }
        self.registry.prune();
    }

    /// Release everything held for `peer`. A failed link only ends an
    /// accepted transfer; departure and shutdown end pending ones too.
    async fn teardown_peer(&mut self, peer: &PeerId, reason: Teardown) {
        let Some(slot) = self.registry.get_mut(peer) else {
            return;
        };

        let abandon = match reason {
            Teardown::LinkFailed => slot.state == TransferState::Accepted,
            Teardown::Departed | Teardown::Shutdown => slot.state.is_busy(),
        };
        let inbound_aborted = slot.inbound.abort();
        let request_cleared = reason != Teardown::LinkFailed && slot.incoming.take().is_some();
        let link = slot.link.take();

        if abandon {
            self.abandon_outgoing(peer);
        }
        if inbound_aborted {
            warn!(event = "inbound_aborted", peer = %peer, "Partial transfer discarded");
            self.emit(CoordinatorEvent::Progress {
                peer: peer.clone(),
                direction: Direction::Incoming,
                progress: None,
            });
        }
        if request_cleared {
            self.emit(CoordinatorEvent::RequestCleared { peer: peer.clone() });
        }

        let status = (reason == Teardown::LinkFailed).then_some(ConnectionStatus::Error);
        self.set_connection(peer, status);
        if let Some(link) = link {
            link.close().await;
        }
    }

    async fn teardown(&mut self) {
        let subscriptions = std::mem::take(&mut self.subscriptions);
        self.signals.unsubscribe_all(subscriptions).await;
        for peer in self.registry.peers() {
            self.teardown_peer(&peer, Teardown::Shutdown).await;
        }
        info!(event = "coordinator_stopped", peer = %self.local());
    }
}
