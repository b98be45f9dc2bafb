//! Per-room registry: everything the coordinator knows about each remote
//! peer, keyed by [`PeerId`]. Owned by the room actor; nothing else touches
//! it.

use super::inbound::InboundSession;
use super::outgoing::Sending;
use super::ConnectionStatus;
use crate::core::connection::types::{LinkState, Role};
use crate::core::connection::PeerLink;
use crate::core::protocol::manifest::FileDescriptor;
use crate::core::signaling::PeerId;
use crate::core::transaction::{OutboundBatch, TransferRequest, TransferState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
pub struct PeerSlot {
    pub state: TransferState,
    /// Outgoing progress while a batch is in flight.
    pub progress: Option<f64>,
    /// Files recorded by `request`, until sent, rejected or expired.
    pub outbound: Option<OutboundBatch>,
    pub sending: Option<Sending>,
    pub link: Option<Arc<PeerLink>>,
    pub connection: Option<ConnectionStatus>,
    pub inbound: InboundSession,
    /// Last request received from this peer, awaiting accept or reject.
    pub incoming: Option<TransferRequest>,
}

impl PeerSlot {
    /// The link, if `link_id` still names it.
    pub fn current_link(&self, link_id: Uuid) -> Option<Arc<PeerLink>> {
        self.link.as_ref().filter(|l| l.id() == link_id).cloned()
    }

    /// A link that can still carry traffic.
    pub fn live_link(&self) -> Option<Arc<PeerLink>> {
        self.link
            .as_ref()
            .filter(|l| l.state() != LinkState::Failed)
            .cloned()
    }

    fn snapshot(&self, peer: &PeerId) -> PeerSnapshot {
        PeerSnapshot {
            peer: peer.clone(),
            state: self.state,
            progress: self.progress,
            link: self.link.as_ref().map(|l| (l.role(), l.state())),
            connection: self.connection,
            incoming: self.incoming.as_ref().map(|r| r.files.clone()),
            receiving: self.inbound.is_active(),
        }
    }
}

/// Read-only view of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub peer: PeerId,
    pub state: TransferState,
    pub progress: Option<f64>,
    pub link: Option<(Role, LinkState)>,
    pub connection: Option<ConnectionStatus>,
    /// Files of the surfaced request from this peer.
    pub incoming: Option<Vec<FileDescriptor>>,
    pub receiving: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub local: PeerId,
    /// Sorted by peer id.
    pub peers: Vec<PeerSnapshot>,
    pub roster: Vec<PeerId>,
}

impl CoordinatorSnapshot {
    pub fn peer(&self, id: &PeerId) -> Option<&PeerSnapshot> {
        self.peers.iter().find(|p| &p.peer == id)
    }

    /// Number of peers with a link, live or failed.
    pub fn link_count(&self) -> usize {
        self.peers.iter().filter(|p| p.link.is_some()).count()
    }
}

#[derive(Default)]
pub struct Registry {
    slots: HashMap<PeerId, PeerSlot>,
    roster: HashSet<PeerId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&PeerSlot> {
        self.slots.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut PeerSlot> {
        self.slots.get_mut(peer)
    }

    pub fn slot_mut(&mut self, peer: &PeerId) -> &mut PeerSlot {
        self.slots.entry(peer.clone()).or_default()
    }

    pub fn state(&self, peer: &PeerId) -> TransferState {
        self.slots.get(peer).map(|s| s.state).unwrap_or_default()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PeerId, &mut PeerSlot)> {
        self.slots.iter_mut()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.slots.keys().cloned().collect()
    }

    pub fn in_roster(&self, peer: &PeerId) -> bool {
        self.roster.contains(peer)
    }

    /// Replace the roster and return the peers that left.
    pub fn update_roster(&mut self, present: HashSet<PeerId>) -> Vec<PeerId> {
        let mut departed: Vec<PeerId> = self.roster.difference(&present).cloned().collect();
        departed.sort();
        self.roster = present;
        departed
    }

    /// Drop slots that hold nothing worth keeping.
    pub fn prune(&mut self) {
        self.slots.retain(|_, s| {
            s.state.is_busy()
                || s.link.is_some()
                || s.incoming.is_some()
                || s.outbound.is_some()
                || s.inbound.is_active()
        });
    }

    pub fn snapshot(&self, local: &PeerId) -> CoordinatorSnapshot {
        let mut peers: Vec<PeerSnapshot> = self
            .slots
            .iter()
            .map(|(peer, slot)| slot.snapshot(peer))
            .collect();
        peers.sort_by(|a, b| a.peer.cmp(&b.peer));
        let mut roster: Vec<PeerId> = self.roster.iter().cloned().collect();
        roster.sort();
        CoordinatorSnapshot {
            local: local.clone(),
            peers,
            roster,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> HashSet<PeerId> {
        names.iter().map(|n| PeerId::new(*n)).collect()
    }

    #[test]
    fn test_roster_departures() {
        let mut reg = Registry::new();
        assert!(reg.update_roster(ids(&["a", "b", "c"])).is_empty());
        assert!(reg.in_roster(&PeerId::new("b")));

        let left = reg.update_roster(ids(&["a", "d"]));
        assert_eq!(left, vec![PeerId::new("b"), PeerId::new("c")]);
        assert!(!reg.in_roster(&PeerId::new("b")));
    }

    #[test]
    fn test_prune_keeps_busy_slots() {
        let mut reg = Registry::new();
        reg.slot_mut(&PeerId::new("idle"));
        reg.slot_mut(&PeerId::new("busy")).state = TransferState::Pending;

        reg.prune();
        assert_eq!(reg.peers(), vec![PeerId::new("busy")]);
        assert_eq!(reg.state(&PeerId::new("busy")), TransferState::Pending);
        assert_eq!(reg.state(&PeerId::new("idle")), TransferState::Idle);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let mut reg = Registry::new();
        for name in ["zed", "amy", "kim"] {
            reg.slot_mut(&PeerId::new(name)).state = TransferState::Pending;
        }
        let snap = reg.snapshot(&PeerId::new("me"));
        let order: Vec<&str> = snap.peers.iter().map(|p| p.peer.as_str()).collect();
        assert_eq!(order, vec!["amy", "kim", "zed"]);
        assert_eq!(snap.link_count(), 0);
    }
}
