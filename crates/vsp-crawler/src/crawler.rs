//! The crawler control loop: discover, verify, age out, publish.

use crate::admin::{connect_succeeded, NodeAdmin};
use crate::bootstrap::{self, BootstrapSet};
use crate::config::CrawlerConfig;
use crate::error::{CrawlerError, CrawlerResult};
use crate::hosts::{write_atomic, HostsLayout, HostsSource};
use crate::peers::PeerManager;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vsp_network::InternalPeerInfo;

/// Outcome of one discovery tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub bootstrap_added: usize,
    pub discovered: usize,
    pub verified: usize,
    pub failed: usize,
    pub collected: usize,
}

/// Outcome of one publish tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub source: HostsSource,
    pub ips: Vec<Ipv4Addr>,
    pub written: bool,
}

pub struct Crawler {
    config: CrawlerConfig,
    admin: Arc<dyn NodeAdmin>,
    peers: Arc<PeerManager>,
    layout: HostsLayout,
    bootstrap: Mutex<BootstrapSet>,
}

impl Crawler {
    pub fn new(config: CrawlerConfig, admin: Arc<dyn NodeAdmin>) -> Self {
        let layout = HostsLayout::new(
            config.service_name.clone(),
            config.namespace.clone(),
            config.zone.clone(),
        );
        Self {
            config,
            admin,
            peers: Arc::new(PeerManager::new()),
            layout,
            bootstrap: Mutex::new(BootstrapSet::default()),
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// Bootstrap addresses from the latest resolution.
    pub fn bootstrap_set(&self) -> BootstrapSet {
        self.bootstrap.lock().clone()
    }

    async fn with_deadline<T, F>(&self, what: &str, fut: F) -> CrawlerResult<T>
    where
        F: Future<Output = vsp_network::NetworkResult<T>>,
    {
        match tokio::time::timeout(self.config.connect_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CrawlerError::Timeout(what.to_string())),
        }
    }

    /// Whether an admin peer entry is a seed candidate.
    fn accepts(&self, info: &InternalPeerInfo) -> Option<Ipv4Addr> {
        let required = self.config.required_service.as_str();
        if info.connection_state != "connected"
            || !info.supported_services.iter().any(|s| s == required)
        {
            return None;
        }
        match info.infrastructure_data.listening_endpoint.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(addr)) if addr.port() == self.config.accepted_port => Some(*addr.ip()),
            _ => None,
        }
    }

    /// One pass of discovery, verification and garbage collection.
    pub async fn discovery_tick(&self, now: Instant) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let port = self.config.accepted_port;

        let resolved = bootstrap::resolve(
            &self.config.bootstrap_entries(),
            port,
            self.config.connect_timeout,
        )
        .await;
        for ip in &resolved.addrs {
            if self.peers.insert_new(*ip, port, now) {
                report.bootstrap_added += 1;
            }
        }
        *self.bootstrap.lock() = resolved;

        match self
            .with_deadline("GetInternalPeerInfo", self.admin.internal_peer_info())
            .await
        {
            Ok(infos) => {
                for ip in infos.iter().filter_map(|info| self.accepts(info)) {
                    if self.peers.insert_new(ip, port, now) {
                        report.discovered += 1;
                    }
                }
            }
            // Advisory only: keep what we have and try again next tick.
            Err(e) => warn!(error = %e, "Failed to fetch peer info from node"),
        }

        // The whole batch shares one connect timeout.
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        for _ in 0..self.config.verify_batch.max(1) {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let Some(candidate) = self.peers.begin_verification(now, self.config.known_ttl) else {
                break;
            };
            if self.verify(candidate.ip, candidate.port, deadline).await {
                self.peers.mark_known(candidate.ip, now);
                report.verified += 1;
            } else {
                self.peers.remove(candidate.ip);
                report.failed += 1;
            }
        }

        report.collected = self.peers.gc(now, self.config.known_ttl);

        let (new, connecting, known) = self.peers.counts();
        info!(
            bootstrap = report.bootstrap_added,
            discovered = report.discovered,
            verified = report.verified,
            failed = report.failed,
            collected = report.collected,
            new,
            connecting,
            known,
            "Discovery tick complete"
        );
        report
    }

    async fn verify(&self, ip: Ipv4Addr, port: u16, deadline: tokio::time::Instant) -> bool {
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
        let result = match tokio::time::timeout_at(deadline, self.admin.connect_to(addr)).await {
            Ok(result) => result.map_err(CrawlerError::from),
            Err(_) => Err(CrawlerError::Timeout("ConnectTo".to_string())),
        };
        match result {
            Ok(response) if connect_succeeded(&response) => {
                debug!(addr = %addr, "Peer verified");
                true
            }
            Ok(response) => {
                debug!(addr = %addr, reason = %response.error_message, "Peer verification refused");
                false
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Peer verification failed");
                false
            }
        }
    }

    /// Pick the addresses for the next hosts file.
    pub fn select(&self) -> (Vec<Ipv4Addr>, HostsSource) {
        let subset = self.config.subset_size;
        let mut rng = rand::thread_rng();

        if self.config.debug_random_ips {
            let ips = self.config.debug_cidr.random_ips(&mut rng, subset);
            return (ips, HostsSource::DebugRandom);
        }

        let (mut pool, source) = {
            let known = self.peers.known_with_port(self.config.accepted_port);
            if known.is_empty() {
                let bootstrap = self.bootstrap.lock();
                let source = if bootstrap.from_dns {
                    HostsSource::BootstrapEndpoints
                } else {
                    HostsSource::Bootstrap
                };
                (bootstrap.addrs.clone(), source)
            } else {
                (known, HostsSource::KnownPeers)
            }
        };

        pool.shuffle(&mut rng);
        pool.truncate(subset);
        pool.sort_by_key(|ip| ip.to_string());
        (pool, source)
    }

    /// Render and publish the hosts file.
    pub async fn publish_tick(&self, generated: DateTime<Utc>) -> CrawlerResult<PublishReport> {
        let (ips, source) = self.select();

        let written = match &self.config.hosts_file {
            Some(_) if ips.is_empty() => {
                warn!("No peers to publish, keeping previous hosts file");
                false
            }
            Some(path) => {
                let body = self.layout.render(&ips, source, generated);
                write_atomic(path, &body).await?;
                true
            }
            None => false,
        };

        info!(
            source = %source,
            count = ips.len(),
            written,
            "Publish tick complete"
        );
        Ok(PublishReport {
            source,
            ips,
            written,
        })
    }

    /// Run the discovery and publish loops until `shutdown` fires.
    ///
    /// The loops tick independently, so a slow discovery tick never holds
    /// back publishing. A tick in progress finishes before the signal is
    /// observed.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            admin = %self.config.admin_addr,
            accepted_port = self.config.accepted_port,
            discovery = ?self.config.discovery_interval,
            publish = ?self.config.update_interval,
            "Crawler started"
        );

        tokio::join!(
            self.discovery_loop(&shutdown),
            self.publish_loop(&shutdown)
        );

        info!("Crawler stopped");
    }

    async fn discovery_loop(&self, shutdown: &CancellationToken) {
        let mut ticker = interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.discovery_tick(Instant::now()).await;
                }
            }
        }
    }

    async fn publish_loop(&self, shutdown: &CancellationToken) {
        let mut ticker = interval(self.config.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_tick(Utc::now()).await {
                        warn!(error = %e, "Failed to publish hosts file");
                    }
                }
            }
        }
    }
}

/// Admin address from `APP_GRPC_ADDR_PORT`, resolving host names.
pub async fn resolve_admin_addr(entry: &str, timeout: Duration) -> CrawlerResult<SocketAddr> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let resolved = vsp_network::discovery::resolve_entry(entry, 0, timeout)
        .await
        .map_err(|e| CrawlerError::Config(format!("cannot resolve admin address {:?}: {}", entry, e)))?;
    resolved
        .iter()
        .find(|a| matches!(a.ip(), IpAddr::V4(_)))
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| CrawlerError::Config(format!("admin address {:?} resolved to nothing", entry)))
}
