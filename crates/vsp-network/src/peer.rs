//! Peer records and the peer store.
//!
//! Every peer record sits behind its own mutex so callers can compose
//! multi-field updates atomically; the store's id → record map is guarded
//! separately. Peer-lock critical sections must never perform network I/O.

use crate::types::{Direction, PeerId, ServiceSet};
use crate::{NetworkError, NetworkResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Handshake / lifecycle state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Record created, nothing exchanged yet.
    New,
    /// We sent `Version` and wait for `Verack`.
    AwaitingVerack,
    /// We sent `Verack` and wait for `Ack`.
    AwaitingAck,
    /// Handshake complete.
    Connected,
    /// Terminal.
    Closed,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::AwaitingVerack => "awaiting_verack",
            PeerState::AwaitingAck => "awaiting_ack",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        }
    }

    /// Whether `self -> next` is one of the permitted arrows.
    ///
    /// Initiators go `new -> awaiting_verack -> connected`, responders go
    /// `new -> awaiting_ack -> connected`; any live state may close.
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (New, AwaitingVerack)
                | (New, AwaitingAck)
                | (AwaitingVerack, Connected)
                | (AwaitingAck, Connected)
                | (New, Closed)
                | (AwaitingVerack, Closed)
                | (AwaitingAck, Closed)
                | (Connected, Closed)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable peer record.
#[derive(Debug, Clone)]
pub struct Peer {
    id: PeerId,
    direction: Direction,
    state: PeerState,
    version: String,
    services: ServiceSet,
    services_set: bool,
    last_seen: Instant,
}

impl Peer {
    fn new(id: PeerId, direction: Direction) -> Self {
        Self {
            id,
            direction,
            state: PeerState::New,
            version: String::new(),
            services: ServiceSet::new(),
            services_set: false,
            last_seen: Instant::now(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn supported_services(&self) -> &ServiceSet {
        &self.services
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    /// Advance the state machine, refusing skips and regressions.
    pub fn transition(&mut self, next: PeerState) -> NetworkResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(NetworkError::InvalidTransition {
                peer: self.id.clone(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        debug!(peer = %self.id, from = %self.state, to = %next, "Peer state transition");
        self.state = next;
        Ok(())
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Record the services learnt from the handshake.
    ///
    /// The first call sets the set; later calls only add tags.
    pub fn add_services(&mut self, services: &ServiceSet) {
        self.services.extend(services.iter().copied());
        self.services_set = true;
    }

    /// Whether the service set has been populated by a handshake message.
    pub fn has_services(&self) -> bool {
        self.services_set
    }

    /// Refresh `last_seen` to now.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Override `last_seen`; used when replaying observed activity.
    pub fn set_last_seen(&mut self, at: Instant) {
        self.last_seen = at;
    }

    /// Time since the last received message.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// `last_seen` as wall-clock unix seconds.
    pub fn last_active_unix(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_sub(self.last_seen.elapsed().as_secs())
    }
}

/// Shared handle to a peer record.
pub type SharedPeer = Arc<Mutex<Peer>>;

/// Concurrent map of peer records keyed by peer id.
#[derive(Default)]
pub struct PeerStore {
    peers: DashMap<PeerId, SharedPeer>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and insert a record in state `new`.
    pub fn new_peer(&self, direction: Direction) -> PeerId {
        let id = PeerId::random();
        let peer = Arc::new(Mutex::new(Peer::new(id.clone(), direction)));
        self.peers.insert(id.clone(), peer);
        debug!(peer = %id, direction = %direction, "Created peer");
        id
    }

    /// Look up a peer record. Unknown ids are simply absent.
    pub fn get_peer(&self, id: &PeerId) -> Option<SharedPeer> {
        self.peers.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Copy of the current record.
    pub fn snapshot(&self, id: &PeerId) -> Option<Peer> {
        self.get_peer(id).map(|p| p.lock().clone())
    }

    /// Move the peer to `closed` and drop it. Removing twice is a no-op.
    pub fn remove_peer(&self, id: &PeerId) {
        if let Some((_, peer)) = self.peers.remove(id) {
            let mut peer = peer.lock();
            if peer.state != PeerState::Closed {
                // Every live state may close.
                let _ = peer.transition(PeerState::Closed);
            }
            debug!(peer = %id, "Removed peer");
        }
    }

    /// Refresh `last_seen` for a peer if it exists.
    pub fn touch(&self, id: &PeerId) {
        if let Some(peer) = self.get_peer(id) {
            peer.lock().touch();
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of every peer record.
    pub fn all(&self) -> Vec<Peer> {
        // Collect handles first so no shard lock is held while locking peers.
        let handles: Vec<SharedPeer> = self.peers.iter().map(|r| Arc::clone(r.value())).collect();
        handles.iter().map(|p| p.lock().clone()).collect()
    }

    /// Ids of peers in the given state.
    pub fn ids_in_state(&self, state: PeerState) -> Vec<PeerId> {
        self.all()
            .into_iter()
            .filter(|p| p.state == state)
            .map(|p| p.id)
            .collect()
    }

    /// Ids of peers that completed the handshake.
    pub fn connected_ids(&self) -> Vec<PeerId> {
        self.ids_in_state(PeerState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceType;

    #[test]
    fn test_new_peer_starts_new() {
        let store = PeerStore::new();
        let id = store.new_peer(Direction::Outbound);

        let peer = store.snapshot(&id).unwrap();
        assert_eq!(peer.state(), PeerState::New);
        assert_eq!(peer.direction(), Direction::Outbound);
        assert!(peer.version().is_empty());
        assert!(!peer.has_services());
    }

    #[test]
    fn test_unknown_peer_not_found() {
        let store = PeerStore::new();
        assert!(store.get_peer(&PeerId::random()).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = PeerStore::new();
        let id = store.new_peer(Direction::Inbound);
        let handle = store.get_peer(&id).unwrap();

        store.remove_peer(&id);
        store.remove_peer(&id);

        assert!(store.get_peer(&id).is_none());
        assert_eq!(handle.lock().state(), PeerState::Closed);
    }

    #[test]
    fn test_transitions_follow_arrows() {
        let store = PeerStore::new();
        let id = store.new_peer(Direction::Outbound);
        let handle = store.get_peer(&id).unwrap();
        let mut peer = handle.lock();

        // No skipping straight to connected.
        assert!(peer.transition(PeerState::Connected).is_err());
        peer.transition(PeerState::AwaitingVerack).unwrap();
        // No regression.
        assert!(peer.transition(PeerState::New).is_err());
        assert!(peer.transition(PeerState::AwaitingAck).is_err());
        peer.transition(PeerState::Connected).unwrap();
        peer.transition(PeerState::Closed).unwrap();
        assert!(peer.transition(PeerState::Connected).is_err());
    }

    #[test]
    fn test_services_are_append_only() {
        let store = PeerStore::new();
        let id = store.new_peer(Direction::Inbound);
        let handle = store.get_peer(&id).unwrap();
        let mut peer = handle.lock();

        peer.add_services(&[ServiceType::Wallet].into_iter().collect());
        peer.add_services(&[ServiceType::Miner].into_iter().collect());

        assert!(peer.has_services());
        assert_eq!(peer.supported_services().len(), 2);
    }

    #[test]
    fn test_connected_ids() {
        let store = PeerStore::new();
        let a = store.new_peer(Direction::Outbound);
        let _b = store.new_peer(Direction::Inbound);

        {
            let handle = store.get_peer(&a).unwrap();
            let mut peer = handle.lock();
            peer.transition(PeerState::AwaitingVerack).unwrap();
            peer.transition(PeerState::Connected).unwrap();
        }

        assert_eq!(store.connected_ids(), vec![a]);
        assert_eq!(store.len(), 2);
    }
}
