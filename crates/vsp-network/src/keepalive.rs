//! Heartbeat keepalive.
//!
//! Connected peers idle for longer than `idle_threshold` get a
//! `HeartbeatPing`. Any peer silent for longer than `death_threshold` is
//! closed and dropped from the registry, except outbound candidates still
//! waiting for gossip to dial them; their clock starts at the dial.

use crate::handshake::HandshakeEngine;
use crate::peer::PeerState;
use crate::sender::PeerSender;
use crate::types::PeerId;
use crate::worker::PeriodicTask;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
    pub death_threshold: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            idle_threshold: Duration::from_secs(60),
            death_threshold: Duration::from_secs(180),
        }
    }
}

/// What one sweep decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sweep {
    pub pinged: Vec<PeerId>,
    pub closed: Vec<PeerId>,
}

pub struct KeepaliveService {
    engine: Arc<HandshakeEngine>,
    sender: PeerSender,
    config: KeepaliveConfig,
    task: PeriodicTask,
}

impl KeepaliveService {
    pub fn new(engine: Arc<HandshakeEngine>, sender: PeerSender, config: KeepaliveConfig) -> Arc<Self> {
        Arc::new(Self {
            engine,
            sender,
            config,
            task: PeriodicTask::new("keepalive"),
        })
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.task.start(self.config.interval, move || {
            let this = Arc::clone(&this);
            async move {
                this.sweep(Instant::now()).await;
            }
            .boxed()
        })
    }

    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Classify every peer against `now`, then ping or close.
    pub async fn sweep(&self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();
        for peer in self.engine.registry().store().all() {
            if peer.state() == PeerState::New && peer.direction().is_outbound() {
                continue;
            }
            let idle = peer.idle_for(now);
            if idle > self.config.death_threshold {
                sweep.closed.push(peer.id().clone());
            } else if peer.state() == PeerState::Connected && idle > self.config.idle_threshold {
                sweep.pinged.push(peer.id().clone());
            }
        }

        for peer in &sweep.closed {
            info!(peer = %peer, "Peer timed out");
            self.engine.close(peer, "keepalive timeout");
        }
        for peer in &sweep.pinged {
            debug!(peer = %peer, "Pinging idle peer");
            self.sender.send_ping(peer).await;
        }
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::LocalNode;
    use crate::hub::ObserverHub;
    use crate::message::Message;
    use crate::peer::PeerStore;
    use crate::registry::AddressRegistry;
    use crate::transport::Transport;
    use crate::NetworkResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(PeerId, Message)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, peer: &PeerId, message: Message) -> NetworkResult<()> {
            self.sent.lock().push((peer.clone(), message));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_pings_and_closes() {
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let transport = Arc::new(RecordingTransport::default());
        let engine = Arc::new(HandshakeEngine::new(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ObserverHub::default()),
            LocalNode::new("127.0.0.1:8000".parse().unwrap()),
        ));
        let service = KeepaliveService::new(
            engine,
            PeerSender::new(transport.clone()),
            KeepaliveConfig::default(),
        );

        let (idle, _) = registry.get_or_create_outbound("10.0.0.1:50051".parse().unwrap());
        let (dead, _) = registry.get_or_create_outbound("10.0.0.2:50051".parse().unwrap());
        let (fresh, _) = registry.get_or_create_outbound("10.0.0.3:50051".parse().unwrap());
        for id in [&idle, &dead, &fresh] {
            let peer = registry.store().get_peer(id).unwrap();
            let mut peer = peer.lock();
            peer.transition(PeerState::AwaitingVerack).unwrap();
            peer.transition(PeerState::Connected).unwrap();
        }

        let base = Instant::now();
        let now = base + Duration::from_secs(200);
        registry
            .store()
            .get_peer(&idle)
            .unwrap()
            .lock()
            .set_last_seen(base + Duration::from_secs(100));
        registry.store().get_peer(&dead).unwrap().lock().set_last_seen(base);
        registry.store().get_peer(&fresh).unwrap().lock().set_last_seen(now);

        let sweep = service.sweep(now).await;
        assert_eq!(sweep.pinged, vec![idle.clone()]);
        assert_eq!(sweep.closed, vec![dead.clone()]);

        assert!(registry.store().get_peer(&dead).is_none());
        assert!(registry.lookup_by_address(&"10.0.0.2:50051".parse().unwrap()).is_none());
        assert_eq!(transport.sent.lock()[0], (idle, Message::HeartbeatPing));
    }

    #[tokio::test]
    async fn test_undialed_candidates_survive_sweep() {
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let transport = Arc::new(RecordingTransport::default());
        let engine = Arc::new(HandshakeEngine::new(
            Arc::clone(&registry),
            transport.clone(),
            Arc::new(ObserverHub::default()),
            LocalNode::new("127.0.0.1:8000".parse().unwrap()),
        ));
        let service = KeepaliveService::new(
            Arc::clone(&engine),
            PeerSender::new(transport.clone()),
            KeepaliveConfig::default(),
        );

        let base = Instant::now();
        let (candidate, _) = registry.get_or_create_outbound("10.0.0.4:50051".parse().unwrap());
        let stale_inbound = registry.get_or_create_inbound("10.0.0.5:41000".parse().unwrap());
        for id in [&candidate, &stale_inbound] {
            registry.store().get_peer(id).unwrap().lock().set_last_seen(base);
        }

        let later = base + Duration::from_secs(400);
        let sweep = service.sweep(later).await;
        assert_eq!(sweep.closed, vec![stale_inbound]);
        assert!(registry.store().get_peer(&candidate).is_some());

        // Dialing starts the clock afresh.
        engine.start(&candidate).await.unwrap();
        let sweep = service.sweep(Instant::now() + Duration::from_secs(10)).await;
        assert!(sweep.closed.is_empty());
    }
}
