//! Per-peer connection state

use crate::transport::PeerId;
use homeasst_shared::LineAssembler;
use std::collections::BTreeMap;
use std::time::Instant;

/// Lifecycle of one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Active,
    Disconnected,
}

/// One connected peer
#[derive(Debug)]
pub struct PeerConnection {
    pub id: PeerId,
    /// Transport-provided label (address)
    pub label: String,
    pub state: PeerState,
    pub connected_at: Instant,
    /// Inbound bytes not yet forming a line
    pub assembler: LineAssembler,
}

impl PeerConnection {
    pub fn new(id: PeerId, label: String, max_line: usize) -> Self {
        Self {
            id,
            label,
            state: PeerState::Connecting,
            connected_at: Instant::now(),
            assembler: LineAssembler::new(max_line),
        }
    }
}

/// Connected peers, keyed by id (no duplicates)
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, PeerConnection>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer in `Connecting` state; false if the id is taken
    pub fn connect(&mut self, id: PeerId, label: String, max_line: usize) -> bool {
        if self.peers.contains_key(&id) {
            return false;
        }
        self.peers
            .insert(id, PeerConnection::new(id, label, max_line));
        true
    }

    /// Promote a connecting peer to `Active`
    pub fn activate(&mut self, id: PeerId) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.state == PeerState::Connecting => {
                peer.state = PeerState::Active;
                true
            }
            _ => false,
        }
    }

    /// Mark a peer whose link is known to be gone
    pub fn mark_disconnected(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.state = PeerState::Disconnected;
        }
    }

    /// Destroy a peer entry
    pub fn remove(&mut self, id: PeerId) -> Option<PeerConnection> {
        self.peers.remove(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&id)
    }

    #[cfg(test)]
    pub fn state(&self, id: PeerId) -> Option<PeerState> {
        self.peers.get(&id).map(|p| p.state)
    }

    /// Ids of all `Active` peers, in id order
    pub fn active(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.state == PeerState::Active)
            .map(|p| p.id)
            .collect()
    }

    /// Drop entries already marked `Disconnected`, returning how many
    pub fn purge_disconnected(&mut self) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, p| p.state != PeerState::Disconnected);
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut table = PeerTable::new();
        let id = PeerId(1);

        assert!(table.connect(id, "aa:bb".into(), 64));
        assert_eq!(table.state(id), Some(PeerState::Connecting));
        assert!(table.active().is_empty());

        assert!(table.activate(id));
        assert_eq!(table.active(), vec![id]);
        assert!(!table.activate(id));

        assert!(table.remove(id).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_no_duplicate_ids() {
        let mut table = PeerTable::new();
        assert!(table.connect(PeerId(7), "first".into(), 64));
        assert!(!table.connect(PeerId(7), "second".into(), 64));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_mut(PeerId(7)).map(|p| p.label.clone()), Some("first".into()));
    }

    #[test]
    fn test_purge_disconnected() {
        let mut table = PeerTable::new();
        for n in 1..=3 {
            table.connect(PeerId(n), format!("peer {}", n), 64);
            table.activate(PeerId(n));
        }
        table.mark_disconnected(PeerId(2));

        assert_eq!(table.active(), vec![PeerId(1), PeerId(3)]);
        assert_eq!(table.purge_disconnected(), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.state(PeerId(2)), None);
    }
}
