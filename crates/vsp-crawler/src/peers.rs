//! Crawler-side peer table with TTL-governed verification.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Verification state of a crawled peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    /// Discovered, never verified.
    New,
    /// Verification in flight.
    Connecting,
    /// Verified reachable.
    Known,
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrawlState::New => "new",
            CrawlState::Connecting => "connecting",
            CrawlState::Known => "known",
        };
        f.write_str(s)
    }
}

/// A crawled peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub state: CrawlState,
    pub discovered_at: Instant,
    pub last_seen: Instant,
}

impl PeerInfo {
    fn new(ip: Ipv4Addr, port: u16, now: Instant) -> Self {
        Self {
            ip,
            port,
            state: CrawlState::New,
            discovered_at: now,
            last_seen: now,
        }
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= ttl
    }
}

/// Peers keyed by IP string.
#[derive(Debug, Default)]
pub struct PeerManager {
    peers: Mutex<BTreeMap<String, PeerInfo>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly discovered peer. Existing entries are left alone.
    pub fn insert_new(&self, ip: Ipv4Addr, port: u16, now: Instant) -> bool {
        let mut peers = self.peers.lock();
        let key = ip.to_string();
        if peers.contains_key(&key) {
            return false;
        }
        debug!(ip = %ip, port, "New crawl candidate");
        peers.insert(key, PeerInfo::new(ip, port, now));
        true
    }

    /// Pick a peer to verify and move it to `Connecting`.
    ///
    /// New peers come first (lowest IP), then the known peer whose TTL
    /// expired longest ago.
    pub fn begin_verification(&self, now: Instant, ttl: Duration) -> Option<PeerInfo> {
        let mut peers = self.peers.lock();

        let key = peers
            .iter()
            .find(|(_, p)| p.state == CrawlState::New)
            .map(|(k, _)| k.clone())
            .or_else(|| {
                peers
                    .iter()
                    .filter(|(_, p)| p.state == CrawlState::Known && p.expired(now, ttl))
                    .min_by_key(|(_, p)| p.last_seen)
                    .map(|(k, _)| k.clone())
            })?;

        let peer = peers.get_mut(&key)?;
        peer.state = CrawlState::Connecting;
        Some(peer.clone())
    }

    /// Record a successful verification.
    pub fn mark_known(&self, ip: Ipv4Addr, now: Instant) -> bool {
        match self.peers.lock().get_mut(&ip.to_string()) {
            Some(peer) => {
                peer.state = CrawlState::Known;
                peer.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, ip: Ipv4Addr) -> Option<PeerInfo> {
        self.peers.lock().remove(&ip.to_string())
    }

    /// Drop known peers not seen for `2 * ttl`. Returns how many went.
    pub fn gc(&self, now: Instant, ttl: Duration) -> usize {
        let horizon = ttl.saturating_mul(2);
        let mut peers = self.peers.lock();
        let before = peers.len();
        peers.retain(|_, p| !(p.state == CrawlState::Known && p.expired(now, horizon)));
        before - peers.len()
    }

    /// Known peers listening on `port`, in IP string order.
    pub fn known_with_port(&self, port: u16) -> Vec<Ipv4Addr> {
        self.peers
            .lock()
            .values()
            .filter(|p| p.state == CrawlState::Known && p.port == port)
            .map(|p| p.ip)
            .collect()
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<PeerInfo> {
        self.peers.lock().get(&ip.to_string()).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Count per state, for tick summaries.
    pub fn counts(&self) -> (usize, usize, usize) {
        let peers = self.peers.lock();
        peers.values().fold((0, 0, 0), |(n, c, k), p| match p.state {
            CrawlState::New => (n + 1, c, k),
            CrawlState::Connecting => (n, c + 1, k),
            CrawlState::Known => (n, c, k + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(15 * 60);

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_insert_is_idempotent() {
        let manager = PeerManager::new();
        let now = Instant::now();
        assert!(manager.insert_new(ip(1), 50051, now));
        assert!(!manager.insert_new(ip(1), 50052, now));
        assert_eq!(manager.get(ip(1)).unwrap().port, 50051);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_new_peers_verified_before_expired_known() {
        let manager = PeerManager::new();
        let t0 = Instant::now();
        manager.insert_new(ip(1), 50051, t0);
        manager.begin_verification(t0, TTL).unwrap();
        manager.mark_known(ip(1), t0);

        let later = t0 + TTL + Duration::from_secs(1);
        manager.insert_new(ip(2), 50051, later);

        let picked = manager.begin_verification(later, TTL).unwrap();
        assert_eq!(picked.ip, ip(2));
        assert_eq!(picked.state, CrawlState::Connecting);

        let picked = manager.begin_verification(later, TTL).unwrap();
        assert_eq!(picked.ip, ip(1));
        assert!(manager.begin_verification(later, TTL).is_none());
    }

    #[test]
    fn test_known_not_reselected_within_ttl() {
        let manager = PeerManager::new();
        let t0 = Instant::now();
        manager.insert_new(ip(1), 50051, t0);
        manager.begin_verification(t0, TTL);
        manager.mark_known(ip(1), t0);

        assert!(manager
            .begin_verification(t0 + TTL - Duration::from_secs(1), TTL)
            .is_none());
        assert!(manager.begin_verification(t0 + TTL, TTL).is_some());
    }

    #[test]
    fn test_gc_after_twice_ttl() {
        let manager = PeerManager::new();
        let t0 = Instant::now();
        manager.insert_new(ip(1), 50051, t0);
        manager.insert_new(ip(2), 50051, t0);
        manager.mark_known(ip(1), t0);

        assert_eq!(manager.gc(t0 + TTL, TTL), 0);
        assert_eq!(manager.gc(t0 + TTL * 2, TTL), 1);
        // New peers are not aged out.
        assert!(manager.get(ip(2)).is_some());
    }

    #[test]
    fn test_known_with_port_filters() {
        let manager = PeerManager::new();
        let now = Instant::now();
        for (last, port) in [(3, 50051), (1, 50051), (2, 50052)] {
            manager.insert_new(ip(last), port, now);
            manager.mark_known(ip(last), now);
        }
        manager.insert_new(ip(4), 50051, now);

        assert_eq!(manager.known_with_port(50051), vec![ip(1), ip(3)]);
        assert_eq!(manager.counts(), (1, 0, 3));
    }
}
