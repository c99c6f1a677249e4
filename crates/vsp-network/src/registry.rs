//! Address registry: the bidirectional map between endpoints and peer ids.
//!
//! Three structures are kept under one lock so every operation is atomic:
//! listening endpoint → peer, observed inbound socket → peer, and
//! peer → entry. The registry is also the only owner of outbound
//! connection handles.

use crate::connection::ConnectionHandle;
use crate::peer::PeerStore;
use crate::types::{Direction, PeerId};
use crate::{NetworkError, NetworkResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cap on remembered inbound sockets per peer; the oldest are forgotten.
const MAX_INBOUND_ADDRS: usize = 16;

#[derive(Debug, Default)]
struct Entry {
    listening: Option<SocketAddr>,
    /// Unverified endpoint from envelope metadata, used only to reply
    /// before the handshake has set `listening`.
    reply_to: Option<SocketAddr>,
    inbound: Vec<SocketAddr>,
    connection: Option<ConnectionHandle>,
}

#[derive(Default)]
struct Inner {
    by_listening: HashMap<SocketAddr, PeerId>,
    by_inbound: HashMap<SocketAddr, PeerId>,
    entries: HashMap<PeerId, Entry>,
}

impl Inner {
    fn lookup(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.by_listening
            .get(addr)
            .or_else(|| self.by_inbound.get(addr))
            .cloned()
    }

    fn record_inbound(&mut self, id: &PeerId, addr: SocketAddr) {
        if self.by_listening.get(&addr) == Some(id) || self.by_inbound.contains_key(&addr) {
            return;
        }
        let entry = self.entries.entry(id.clone()).or_default();
        entry.inbound.push(addr);
        if entry.inbound.len() > MAX_INBOUND_ADDRS {
            let evicted = entry.inbound.remove(0);
            self.by_inbound.remove(&evicted);
        }
        self.by_inbound.insert(addr, id.clone());
    }

    fn note_reply_to(&mut self, id: &PeerId, advertised: Option<SocketAddr>) {
        if let (Some(addr), Some(entry)) = (advertised, self.entries.get_mut(id)) {
            if entry.listening.is_none() {
                entry.reply_to = Some(addr);
            }
        }
    }
}

/// Debug view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub peer_id: PeerId,
    pub listening_endpoint: Option<SocketAddr>,
    pub inbound_addrs: Vec<SocketAddr>,
    pub has_outbound: bool,
}

/// Bidirectional endpoint ↔ peer-id registry.
pub struct AddressRegistry {
    store: Arc<PeerStore>,
    inner: Mutex<Inner>,
}

impl AddressRegistry {
    pub fn new(store: Arc<PeerStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The peer store records are created in.
    pub fn store(&self) -> &Arc<PeerStore> {
        &self.store
    }

    /// Resolve an address, checking listening endpoints before inbound sockets.
    pub fn lookup_by_address(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.inner.lock().lookup(addr)
    }

    /// Resolve or register the peer listening at `addr`.
    ///
    /// Returns `created = false` when the address is already known, which
    /// means we are already connecting or connected to it.
    pub fn get_or_create_outbound(&self, addr: SocketAddr) -> (PeerId, bool) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.lookup(&addr) {
            return (id, false);
        }

        let id = self.store.new_peer(Direction::Outbound);
        inner.by_listening.insert(addr, id.clone());
        inner.entries.insert(
            id.clone(),
            Entry {
                listening: Some(addr),
                ..Default::default()
            },
        );
        debug!(peer = %id, addr = %addr, "Registered outbound peer");
        (id, true)
    }

    /// Resolve or register the peer behind an accepted inbound socket.
    pub fn get_or_create_inbound(&self, addr: SocketAddr) -> PeerId {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.lookup(&addr) {
            return id;
        }

        let id = self.store.new_peer(Direction::Inbound);
        inner.entries.insert(id.clone(), Entry::default());
        inner.record_inbound(&id, addr);
        debug!(peer = %id, addr = %addr, "Registered inbound peer");
        id
    }

    /// Resolve the peer behind a received message.
    ///
    /// `advertised` is the sender's listening endpoint as carried in the
    /// message metadata, `observed` the socket the message arrived from.
    /// A known advertised endpoint wins; the observed socket is then
    /// remembered as one of that peer's inbound addresses. An unknown
    /// advertised endpoint is kept as the peer's reply address until the
    /// handshake records a listening endpoint.
    pub fn resolve_sender(&self, observed: SocketAddr, advertised: Option<SocketAddr>) -> PeerId {
        let mut inner = self.inner.lock();
        if let Some(id) = advertised.and_then(|a| inner.by_listening.get(&a).cloned()) {
            inner.record_inbound(&id, observed);
            return id;
        }
        if let Some(id) = inner.lookup(&observed) {
            inner.note_reply_to(&id, advertised);
            return id;
        }

        let id = self.store.new_peer(Direction::Inbound);
        inner.entries.insert(
            id.clone(),
            Entry {
                reply_to: advertised,
                ..Default::default()
            },
        );
        inner.record_inbound(&id, observed);
        debug!(peer = %id, addr = %observed, "Registered inbound peer");
        id
    }

    /// Record the endpoint a peer advertised in its `Version`/`Verack`.
    ///
    /// Re-setting the same endpoint is a no-op; an endpoint owned by
    /// another peer is refused.
    pub fn set_listening_endpoint(&self, id: &PeerId, endpoint: SocketAddr) -> NetworkResult<()> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(id) {
            return Err(NetworkError::PeerNotFound(id.clone()));
        }

        match inner.by_listening.get(&endpoint) {
            Some(owner) if owner == id => return Ok(()),
            Some(owner) => {
                return Err(NetworkError::EndpointConflict {
                    endpoint,
                    owner: owner.clone(),
                })
            }
            None => {}
        }

        let old = inner.entries.get_mut(id).and_then(|entry| {
            entry.reply_to = None;
            // A reply connection to some other address is not the peer's.
            if entry
                .connection
                .as_ref()
                .is_some_and(|c| c.peer_addr() != endpoint)
            {
                entry.connection = None;
            }
            entry.listening.replace(endpoint)
        });
        if let Some(old) = old {
            inner.by_listening.remove(&old);
        }
        // An inbound socket can turn out to be the listening endpoint.
        if inner.by_inbound.get(&endpoint) == Some(id) {
            inner.by_inbound.remove(&endpoint);
            if let Some(entry) = inner.entries.get_mut(id) {
                entry.inbound.retain(|a| *a != endpoint);
            }
        }
        inner.by_listening.insert(endpoint, id.clone());
        debug!(peer = %id, endpoint = %endpoint, "Set listening endpoint");
        Ok(())
    }

    /// Fold a duplicate peer into the peer that owns its endpoint.
    ///
    /// Used when an inbound session turns out to come from a peer we already
    /// know: its inbound sockets move to `into` and its record is dropped.
    pub fn absorb(&self, from: &PeerId, into: &PeerId) {
        if from == into {
            return;
        }
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries.remove(from) else {
                return;
            };
            if let Some(listening) = entry.listening {
                inner.by_listening.remove(&listening);
            }
            for addr in entry.inbound {
                inner.by_inbound.remove(&addr);
                inner.record_inbound(into, addr);
            }
        }
        self.store.remove_peer(from);
        info!(duplicate = %from, owner = %into, "Collapsed duplicate peer session");
    }

    /// Install the outbound connection handle for a peer.
    ///
    /// A peer has at most one outbound connection; setting a second one is
    /// refused.
    pub fn set_connection(&self, id: &PeerId, handle: ConnectionHandle) -> NetworkResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| NetworkError::PeerNotFound(id.clone()))?;
        if entry.connection.is_some() {
            warn!(peer = %id, "Outbound connection already set");
            return Err(NetworkError::ConnectionAlreadySet(id.clone()));
        }
        entry.connection = Some(handle);
        Ok(())
    }

    /// The peer's outbound connection, if one is open.
    pub fn connection(&self, id: &PeerId) -> Option<ConnectionHandle> {
        self.inner
            .lock()
            .entries
            .get(id)
            .and_then(|e| e.connection.clone())
    }

    /// Forget a dead outbound connection so the next send reopens it.
    pub fn clear_connection(&self, id: &PeerId) -> Option<ConnectionHandle> {
        self.inner
            .lock()
            .entries
            .get_mut(id)
            .and_then(|e| e.connection.take())
    }

    pub fn listening_endpoint(&self, id: &PeerId) -> Option<SocketAddr> {
        self.inner.lock().entries.get(id).and_then(|e| e.listening)
    }

    /// Where to send to a peer: its listening endpoint, else the endpoint
    /// its messages claimed to come from.
    pub fn reply_endpoint(&self, id: &PeerId) -> Option<SocketAddr> {
        self.inner
            .lock()
            .entries
            .get(id)
            .and_then(|e| e.listening.or(e.reply_to))
    }

    /// Peers with a known listening endpoint.
    pub fn endpoints(&self) -> Vec<(PeerId, SocketAddr)> {
        self.inner
            .lock()
            .by_listening
            .iter()
            .map(|(addr, id)| (id.clone(), *addr))
            .collect()
    }

    /// Drop every mapping for a peer and remove it from the store.
    pub fn remove_peer(&self, id: &PeerId) {
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.remove(id) {
                if let Some(listening) = entry.listening {
                    inner.by_listening.remove(&listening);
                }
                for addr in entry.inbound {
                    inner.by_inbound.remove(&addr);
                }
            }
        }
        self.store.remove_peer(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dump every entry, for debugging interfaces.
    pub fn enumerate(&self) -> Vec<RegistryEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .map(|(id, entry)| RegistryEntry {
                peer_id: id.clone(),
                listening_endpoint: entry.listening,
                inbound_addrs: entry.inbound.clone(),
                has_outbound: entry.connection.is_some(),
            })
            .collect();
        entries.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn registry() -> AddressRegistry {
        AddressRegistry::new(Arc::new(PeerStore::new()))
    }

    #[test]
    fn test_outbound_dedup() {
        let reg = registry();
        let (a, created_a) = reg.get_or_create_outbound(test_addr(9000));
        let (b, created_b) = reg.get_or_create_outbound(test_addr(9000));

        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a, b);
        assert_eq!(reg.store().len(), 1);
        assert_eq!(reg.listening_endpoint(&a), Some(test_addr(9000)));
    }

    #[test]
    fn test_concurrent_outbound_same_addr() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.get_or_create_outbound(test_addr(9000)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ids: HashSet<_> = results.iter().map(|(id, _)| id.clone()).collect();
        let created = results.iter().filter(|(_, c)| *c).count();

        assert_eq!(ids.len(), 1);
        assert_eq!(created, 1);
    }

    #[test]
    fn test_inbound_lookup() {
        let reg = registry();
        let id = reg.get_or_create_inbound(test_addr(40001));
        assert_eq!(reg.get_or_create_inbound(test_addr(40001)), id);
        assert_eq!(reg.lookup_by_address(&test_addr(40001)), Some(id.clone()));

        let peer = reg.store().snapshot(&id).unwrap();
        assert_eq!(peer.direction(), Direction::Inbound);
    }

    #[test]
    fn test_set_listening_endpoint() {
        let reg = registry();
        let id = reg.get_or_create_inbound(test_addr(40001));

        reg.set_listening_endpoint(&id, test_addr(9000)).unwrap();
        // Same endpoint again is a no-op.
        reg.set_listening_endpoint(&id, test_addr(9000)).unwrap();
        assert_eq!(reg.lookup_by_address(&test_addr(9000)), Some(id.clone()));

        // Moving the endpoint re-indexes.
        reg.set_listening_endpoint(&id, test_addr(9001)).unwrap();
        assert_eq!(reg.lookup_by_address(&test_addr(9000)), None);
        assert_eq!(reg.lookup_by_address(&test_addr(9001)), Some(id));
    }

    #[test]
    fn test_listening_endpoint_conflict() {
        let reg = registry();
        let (owner, _) = reg.get_or_create_outbound(test_addr(9000));
        let other = reg.get_or_create_inbound(test_addr(40001));

        let err = reg.set_listening_endpoint(&other, test_addr(9000)).unwrap_err();
        assert!(matches!(err, NetworkError::EndpointConflict { owner: o, .. } if o == owner));
        assert_eq!(reg.listening_endpoint(&other), None);
    }

    #[test]
    fn test_resolve_sender_prefers_advertised() {
        let reg = registry();
        let (id, _) = reg.get_or_create_outbound(test_addr(9000));

        let resolved = reg.resolve_sender(test_addr(40001), Some(test_addr(9000)));
        assert_eq!(resolved, id);
        // The ephemeral socket is now attributed to the same peer.
        assert_eq!(reg.lookup_by_address(&test_addr(40001)), Some(id));
        assert_eq!(reg.store().len(), 1);
    }

    #[test]
    fn test_resolve_sender_mints_inbound() {
        let reg = registry();
        let id = reg.resolve_sender(test_addr(40001), Some(test_addr(9000)));
        let peer = reg.store().snapshot(&id).unwrap();
        assert_eq!(peer.direction(), Direction::Inbound);
        // Unverified metadata is not recorded as a listening endpoint.
        assert_eq!(reg.listening_endpoint(&id), None);
        assert_eq!(reg.lookup_by_address(&test_addr(9000)), None);
        // It is still where replies go until the handshake says otherwise.
        assert_eq!(reg.reply_endpoint(&id), Some(test_addr(9000)));
    }

    #[test]
    fn test_listening_endpoint_replaces_reply_address() {
        let reg = registry();
        let id = reg.resolve_sender(test_addr(40001), Some(test_addr(9000)));
        let (tx, _rx) = mpsc::channel(1);
        reg.set_connection(&id, ConnectionHandle::new(test_addr(9000), tx))
            .unwrap();

        reg.set_listening_endpoint(&id, test_addr(9005)).unwrap();

        assert_eq!(reg.reply_endpoint(&id), Some(test_addr(9005)));
        // The reply connection pointed elsewhere and is dropped.
        assert!(reg.connection(&id).is_none());
    }

    #[test]
    fn test_absorb_moves_inbound() {
        let reg = registry();
        let (owner, _) = reg.get_or_create_outbound(test_addr(9000));
        let dup = reg.get_or_create_inbound(test_addr(40001));

        reg.absorb(&dup, &owner);

        assert_eq!(reg.lookup_by_address(&test_addr(40001)), Some(owner));
        assert!(reg.store().get_peer(&dup).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_connection_set_once() {
        let reg = registry();
        let (id, _) = reg.get_or_create_outbound(test_addr(9000));
        let (tx, _rx) = mpsc::channel(1);

        reg.set_connection(&id, ConnectionHandle::new(test_addr(9000), tx.clone()))
            .unwrap();
        assert!(reg.connection(&id).is_some());
        assert!(matches!(
            reg.set_connection(&id, ConnectionHandle::new(test_addr(9000), tx)),
            Err(NetworkError::ConnectionAlreadySet(_))
        ));

        assert!(reg.clear_connection(&id).is_some());
        assert!(reg.connection(&id).is_none());
    }

    #[test]
    fn test_remove_and_enumerate() {
        let reg = registry();
        let (a, _) = reg.get_or_create_outbound(test_addr(9000));
        let b = reg.get_or_create_inbound(test_addr(40001));

        let entries = reg.enumerate();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.has_outbound));

        reg.remove_peer(&a);
        assert_eq!(reg.lookup_by_address(&test_addr(9000)), None);
        assert!(reg.store().get_peer(&a).is_none());
        assert_eq!(reg.enumerate()[0].peer_id, b);
    }
}
