//! Peer discovery: bootstrap resolution, GetAddr/Addr exchange and the
//! gossip loop.

use crate::handshake::HandshakeEngine;
use crate::peer::PeerState;
use crate::registry::AddressRegistry;
use crate::sender::PeerSender;
use crate::types::{Direction, NetAddress, PeerId};
use crate::worker::PeriodicTask;
use futures::FutureExt;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Most entries returned in one `Addr` reply.
pub const MAX_ADDR_REPLY: usize = 1000;

/// Most new candidates registered from one `Addr` message.
pub const MAX_ADDR_CANDIDATES: usize = 100;

/// Default timeout for resolving one bootstrap entry.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Split a `host[:port]` entry, applying `default_port` when none is given.
///
/// IPv6 literals need brackets when a port is present (`[::1]:9000`).
pub fn split_host_port(entry: &str, default_port: u16) -> Option<(String, u16)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some((addr.ip().to_string(), addr.port()));
    }
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, port) = rest.split_once(']')?;
        let port = match port.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if port.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match entry.rsplit_once(':') {
        // A bare IPv6 literal has several colons and no port.
        Some((host, _)) if host.contains(':') => Some((entry.to_string(), default_port)),
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((entry.to_string(), default_port)),
    }
}

/// Resolve a single `host[:port]` entry.
pub async fn resolve_entry(
    entry: &str,
    default_port: u16,
    resolve_timeout: Duration,
) -> Result<Vec<SocketAddr>, std::io::Error> {
    let (host, port) = split_host_port(entry, default_port).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid endpoint: {:?}", entry),
        )
    })?;

    if let Ok(ip) = host.parse() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let result = timeout(
        resolve_timeout,
        tokio::task::spawn_blocking(move || {
            (host.as_str(), port)
                .to_socket_addrs()
                .map(|iter| iter.collect::<Vec<_>>())
        }),
    )
    .await;

    match result {
        Ok(Ok(Ok(addrs))) => Ok(addrs),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(e)) => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Task join error: {}", e),
        )),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "DNS resolution timed out",
        )),
    }
}

/// Resolve every bootstrap entry; failures are logged and skipped.
///
/// The result is sorted and free of duplicates.
pub async fn resolve_bootstrap(
    entries: &[String],
    default_port: u16,
    resolve_timeout: Duration,
) -> Vec<SocketAddr> {
    let mut peers = Vec::new();

    for entry in entries {
        match resolve_entry(entry, default_port, resolve_timeout).await {
            Ok(addrs) => {
                debug!(entry = %entry, count = addrs.len(), "Resolved bootstrap entry");
                peers.extend(addrs);
            }
            Err(e) => {
                warn!(entry = %entry, error = %e, "Failed to resolve bootstrap entry");
            }
        }
    }

    peers.sort();
    peers.dedup();
    peers
}

/// GetAddr/Addr handling on top of the address registry.
pub struct Discovery {
    registry: Arc<AddressRegistry>,
    sender: PeerSender,
    local_endpoint: SocketAddr,
}

impl Discovery {
    pub fn new(registry: Arc<AddressRegistry>, sender: PeerSender, local_endpoint: SocketAddr) -> Self {
        Self {
            registry,
            sender,
            local_endpoint,
        }
    }

    /// Known listening endpoints, excluding `requester`.
    pub fn addr_reply(&self, requester: &PeerId) -> Vec<NetAddress> {
        let store = self.registry.store();
        self.registry
            .endpoints()
            .into_iter()
            .filter(|(id, _)| id != requester)
            .filter_map(|(id, endpoint)| {
                store.snapshot(&id).map(|peer| NetAddress {
                    endpoint,
                    last_active: peer.last_active_unix(),
                })
            })
            .take(MAX_ADDR_REPLY)
            .collect()
    }

    /// Answer a `GetAddr`.
    pub async fn on_get_addr(&self, peer: &PeerId) {
        let addrs = self.addr_reply(peer);
        debug!(peer = %peer, count = addrs.len(), "Answering getaddr");
        self.sender.send_addr(peer, addrs).await;
    }

    /// Register the endpoints from an `Addr` as outbound candidates.
    ///
    /// Returns how many new peers were created.
    pub fn on_addr(&self, peer: &PeerId, addrs: &[NetAddress]) -> usize {
        let mut created = 0;
        let mut seen = HashSet::new();
        for addr in addrs {
            if created >= MAX_ADDR_CANDIDATES {
                debug!(peer = %peer, "Addr candidate cap reached");
                break;
            }
            let endpoint = addr.endpoint;
            if endpoint == self.local_endpoint
                || endpoint.ip().is_unspecified()
                || !seen.insert(endpoint)
            {
                continue;
            }
            if let (id, true) = self.registry.get_or_create_outbound(endpoint) {
                debug!(peer = %id, endpoint = %endpoint, "New candidate from addr");
                created += 1;
            }
        }
        if created > 0 {
            info!(peer = %peer, received = addrs.len(), created, "Learnt candidates from addr");
        }
        created
    }

    /// Outbound peers we know an endpoint for but never dialed.
    pub fn candidates(&self) -> Vec<PeerId> {
        let store = self.registry.store();
        self.registry
            .endpoints()
            .into_iter()
            .filter(|(id, _)| {
                store
                    .snapshot(id)
                    .map(|p| p.state() == PeerState::New && p.direction() == Direction::Outbound)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Gossip loop settings.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub interval: Duration,
    /// Connected peers asked for addresses per tick.
    pub fanout: usize,
    /// Candidates dialed per tick.
    pub max_dials_per_tick: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fanout: 3,
            max_dials_per_tick: 8,
        }
    }
}

/// Periodically asks a few connected peers for addresses and dials new
/// candidates.
pub struct GossipService {
    discovery: Arc<Discovery>,
    engine: Arc<HandshakeEngine>,
    sender: PeerSender,
    config: GossipConfig,
    task: PeriodicTask,
}

impl GossipService {
    pub fn new(
        discovery: Arc<Discovery>,
        engine: Arc<HandshakeEngine>,
        sender: PeerSender,
        config: GossipConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            engine,
            sender,
            config,
            task: PeriodicTask::new("gossip"),
        })
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.task.start(self.config.interval, move || {
            let this = Arc::clone(&this);
            async move { this.tick().await }.boxed()
        })
    }

    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// One gossip round.
    pub async fn tick(&self) {
        let mut connected = self.engine.registry().store().connected_ids();
        let targets: Vec<PeerId> = {
            let mut rng = rand::thread_rng();
            connected.shuffle(&mut rng);
            connected.into_iter().take(self.config.fanout).collect()
        };
        for peer in &targets {
            self.sender.send_get_addr(peer).await;
        }

        let mut dialed = 0;
        for candidate in self
            .discovery
            .candidates()
            .into_iter()
            .take(self.config.max_dials_per_tick)
        {
            match self.engine.start(&candidate).await {
                Ok(()) => dialed += 1,
                Err(e) => debug!(peer = %candidate, error = %e, "Candidate dial failed"),
            }
        }

        if !targets.is_empty() || dialed > 0 {
            debug!(asked = targets.len(), dialed, "Gossip round");
        }
    }
}
