//! Network service wiring.
//!
//! Owns the peer store, address registry, handshake engine, observer hub,
//! transport, router and background loops, and runs the peer and admin
//! listeners until shutdown.

use crate::admin::{AdminServer, AdminService};
use crate::connection::ConnectionConfig;
use crate::discovery::{self, Discovery, GossipConfig, GossipService};
use crate::handshake::{HandshakeEngine, LocalNode};
use crate::hub::{BlockchainObserver, ConnectionObserver, ObserverHub, DEFAULT_OBSERVER_QUEUE};
use crate::keepalive::{KeepaliveConfig, KeepaliveService};
use crate::peer::PeerStore;
use crate::registry::AddressRegistry;
use crate::router::MessageRouter;
use crate::sender::PeerSender;
use crate::transport::{InboundHandler, InboundServer, TcpTransport, Transport};
use crate::types::{ServiceSet, ServiceType};
use crate::{NetworkResult, DEFAULT_PORT, MAINNET_MAGIC, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Network service configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address the peer listener binds.
    pub listen_addr: SocketAddr,
    /// Endpoint advertised to peers; defaults to `listen_addr`.
    pub advertised_endpoint: Option<SocketAddr>,
    /// Address the admin listener binds.
    pub admin_addr: SocketAddr,
    /// Network magic bytes.
    pub magic: [u8; 4],
    /// Version string sent in the handshake.
    pub version: String,
    /// Services advertised in the handshake.
    pub services: ServiceSet,
    /// `host[:port]` peers dialed at startup.
    pub bootstrap: Vec<String>,
    /// Port assumed for bootstrap entries without one.
    pub default_port: u16,
    pub resolve_timeout: Duration,
    /// Maximum number of inbound connections.
    pub max_inbound: usize,
    pub observer_queue: usize,
    pub connection: ConnectionConfig,
    pub gossip: GossipConfig,
    pub keepalive: KeepaliveConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            advertised_endpoint: None,
            admin_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT + 1)),
            magic: MAINNET_MAGIC,
            version: PROTOCOL_VERSION.to_string(),
            services: ServiceType::full_set(),
            bootstrap: Vec::new(),
            default_port: DEFAULT_PORT,
            resolve_timeout: discovery::DEFAULT_RESOLVE_TIMEOUT,
            max_inbound: 125,
            observer_queue: DEFAULT_OBSERVER_QUEUE,
            connection: ConnectionConfig::default(),
            gossip: GossipConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn advertised(&self) -> SocketAddr {
        self.advertised_endpoint.unwrap_or(self.listen_addr)
    }
}

/// The assembled networking core.
pub struct NetworkService {
    config: NetworkConfig,
    registry: Arc<AddressRegistry>,
    hub: Arc<ObserverHub>,
    engine: Arc<HandshakeEngine>,
    sender: PeerSender,
    router: Arc<MessageRouter>,
    admin: Arc<AdminService>,
    gossip: Arc<GossipService>,
    keepalive: Arc<KeepaliveService>,
}

impl NetworkService {
    /// Build the service over TCP.
    pub fn new(mut config: NetworkConfig) -> Self {
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        config.connection.magic = config.magic;
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(
            Arc::clone(&registry),
            config.connection.clone(),
            config.advertised(),
        ));
        Self::with_transport(config, registry, transport)
    }

    /// Build the service over an arbitrary transport.
    pub fn with_transport(
        config: NetworkConfig,
        registry: Arc<AddressRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let local = LocalNode {
            version: config.version.clone(),
            services: config.services.clone(),
            listening_endpoint: config.advertised(),
        };
        let hub = Arc::new(ObserverHub::new(config.observer_queue));
        let sender = PeerSender::new(Arc::clone(&transport));
        let engine = Arc::new(HandshakeEngine::new(
            Arc::clone(&registry),
            transport,
            Arc::clone(&hub),
            local,
        ));
        let discovery = Arc::new(Discovery::new(
            Arc::clone(&registry),
            sender.clone(),
            config.advertised(),
        ));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&engine),
            Arc::clone(&hub),
            Arc::clone(&discovery),
            sender.clone(),
        ));
        let admin = Arc::new(AdminService::new(Arc::clone(&engine)));
        let gossip = GossipService::new(
            discovery,
            Arc::clone(&engine),
            sender.clone(),
            config.gossip.clone(),
        );
        let keepalive =
            KeepaliveService::new(Arc::clone(&engine), sender.clone(), config.keepalive.clone());

        Self {
            config,
            registry,
            hub,
            engine,
            sender,
            router,
            admin,
            gossip,
            keepalive,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }

    pub fn engine(&self) -> &Arc<HandshakeEngine> {
        &self.engine
    }

    pub fn sender(&self) -> &PeerSender {
        &self.sender
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn admin(&self) -> &Arc<AdminService> {
        &self.admin
    }

    pub fn attach(&self, observer: Arc<dyn BlockchainObserver>) -> bool {
        self.hub.attach(observer)
    }

    pub fn attach_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) -> bool {
        self.hub.attach_connection_observer(observer)
    }

    /// Dial every configured bootstrap peer.
    pub async fn dial_bootstrap(&self) -> usize {
        let targets = discovery::resolve_bootstrap(
            &self.config.bootstrap,
            self.config.default_port,
            self.config.resolve_timeout,
        )
        .await;
        info!(count = targets.len(), "Dialing bootstrap peers");

        let mut started = 0;
        for addr in targets {
            if addr == self.config.advertised() {
                continue;
            }
            match self.engine.initiate(addr).await {
                Ok(Some(_)) => started += 1,
                Ok(None) => {}
                Err(e) => warn!(addr = %addr, error = %e, "Bootstrap dial failed"),
            }
        }
        started
    }

    /// Run listeners and background loops until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> NetworkResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let admin_listener = TcpListener::bind(self.config.admin_addr).await?;
        info!(
            addr = %self.config.listen_addr,
            advertised = %self.config.advertised(),
            "Network service listening"
        );

        let handler: Arc<dyn InboundHandler> = self.router.clone();
        let inbound = InboundServer::new(handler, self.config.magic, self.config.max_inbound);
        let inbound_token = shutdown.child_token();
        let inbound_task =
            tokio::spawn(async move { inbound.run(listener, inbound_token).await });

        let admin = AdminServer::new(Arc::clone(&self.admin));
        let admin_token = shutdown.child_token();
        let admin_task = tokio::spawn(async move { admin.run(admin_listener, admin_token).await });

        self.dial_bootstrap().await;
        self.gossip.start();
        self.keepalive.start();

        shutdown.cancelled().await;
        info!("Network service shutting down");

        self.gossip.stop();
        self.keepalive.stop();
        for (name, task) in [("peer listener", inbound_task), ("admin listener", admin_task)] {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "Listener failed"),
                Err(e) => warn!(task = name, error = %e, "Listener task panicked"),
            }
        }
        Ok(())
    }
}
