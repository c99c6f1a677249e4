//! Test harness for integration tests.
//!
//! Provides an in-memory network node driven through its router, an
//! observer that forwards callbacks to a channel, and a scripted admin
//! backend for the crawler.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vsp_crawler::NodeAdmin;
use vsp_network::hub::{BlockchainObserver, ConnectionObserver};
use vsp_network::types::{InvVector, Transaction};
use vsp_network::wire::WireMessage;
use vsp_network::{
    AddressRegistry, ConnectToResponse, Envelope, InternalPeerInfo, Message, MessageType,
    NetworkConfig, NetworkError, NetworkResult, NetworkService, PeerId, PeerState, PeerStore,
    Transport,
};

/// A message captured by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub peer: PeerId,
    /// The peer's listening endpoint when the message was sent.
    pub endpoint: Option<SocketAddr>,
    pub message: Message,
}

/// Transport that records every send instead of touching the network.
pub struct RecordingTransport {
    registry: Arc<AddressRegistry>,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingTransport {
    pub fn new(registry: Arc<AddressRegistry>) -> Self {
        Self {
            registry,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Messages of one kind, in send order.
    pub fn sent_of(&self, kind: MessageType) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.message.message_type() == kind)
            .cloned()
            .collect()
    }

    /// Messages sent to one peer, in send order.
    pub fn sent_to(&self, peer: &PeerId) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|m| &m.peer == peer)
            .map(|m| m.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, peer: &PeerId, message: Message) -> NetworkResult<()> {
        let endpoint = self.registry.listening_endpoint(peer);
        self.sent.lock().push(SentMessage {
            peer: peer.clone(),
            endpoint,
            message,
        });
        Ok(())
    }
}

/// A network service wired to a [`RecordingTransport`].
pub struct TestNode {
    pub service: NetworkService,
    pub transport: Arc<RecordingTransport>,
}

impl TestNode {
    /// Node advertising `127.0.0.1:8000`.
    pub fn new() -> Self {
        Self::with_endpoint("127.0.0.1:8000".parse().expect("valid endpoint"))
    }

    pub fn with_endpoint(endpoint: SocketAddr) -> Self {
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let transport = Arc::new(RecordingTransport::new(Arc::clone(&registry)));
        let config = NetworkConfig {
            listen_addr: endpoint,
            ..Default::default()
        };
        let service = NetworkService::with_transport(config, registry, transport.clone());
        Self { service, transport }
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        self.service.registry()
    }

    pub fn state(&self, peer: &PeerId) -> Option<PeerState> {
        self.registry().store().snapshot(peer).map(|p| p.state())
    }

    /// Deliver `message` as if it arrived from `observed`, advertising `sender`.
    pub async fn deliver(
        &self,
        observed: SocketAddr,
        sender: Option<SocketAddr>,
        message: &Message,
    ) -> PeerId {
        self.deliver_wire(observed, sender, WireMessage::from(message))
            .await
    }

    /// Deliver a raw wire message, which may fail validation.
    pub async fn deliver_wire(
        &self,
        observed: SocketAddr,
        sender: Option<SocketAddr>,
        message: WireMessage,
    ) -> PeerId {
        self.service
            .router()
            .route(observed, Envelope { sender, message })
            .await
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A callback captured by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connected { peer: PeerId, outbound: bool },
    Disconnected(PeerId),
    Inv(PeerId, Vec<InvVector>),
    Tx(PeerId, Transaction),
    Mempool(PeerId),
}

/// Observer forwarding callbacks to a channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Observed>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl BlockchainObserver for ChannelObserver {
    async fn on_inv(&self, peer: &PeerId, items: &[InvVector]) {
        let _ = self.tx.send(Observed::Inv(peer.clone(), items.to_vec()));
    }

    async fn on_tx(&self, peer: &PeerId, tx: &Transaction) {
        let _ = self.tx.send(Observed::Tx(peer.clone(), tx.clone()));
    }

    async fn on_mempool(&self, peer: &PeerId) {
        let _ = self.tx.send(Observed::Mempool(peer.clone()));
    }
}

#[async_trait]
impl ConnectionObserver for ChannelObserver {
    async fn on_peer_connected(&self, peer: &PeerId, is_outbound: bool) {
        let _ = self.tx.send(Observed::Connected {
            peer: peer.clone(),
            outbound: is_outbound,
        });
    }

    async fn on_peer_disconnected(&self, peer: &PeerId) {
        let _ = self.tx.send(Observed::Disconnected(peer.clone()));
    }
}

/// Wait up to a second for the next observed callback.
pub async fn next_observed(rx: &mut mpsc::UnboundedReceiver<Observed>) -> Option<Observed> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Admin backend with scripted replies.
#[derive(Default)]
pub struct ScriptedAdmin {
    peers: Mutex<Vec<InternalPeerInfo>>,
    replies: Mutex<HashMap<SocketAddr, ConnectToResponse>>,
    calls: Mutex<Vec<SocketAddr>>,
    info_fails: Mutex<bool>,
}

impl ScriptedAdmin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_peers(&self, peers: Vec<InternalPeerInfo>) {
        *self.peers.lock() = peers;
    }

    /// Reply for `ConnectTo(addr)`. Unscripted addresses are refused.
    pub fn reply(&self, addr: SocketAddr, success: bool, error_message: &str) {
        self.replies.lock().insert(
            addr,
            ConnectToResponse {
                success,
                error_message: error_message.to_string(),
            },
        );
    }

    pub fn fail_peer_info(&self, fail: bool) {
        *self.info_fails.lock() = fail;
    }

    /// Addresses `ConnectTo` was called with, in call order.
    pub fn calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl NodeAdmin for ScriptedAdmin {
    async fn internal_peer_info(&self) -> NetworkResult<Vec<InternalPeerInfo>> {
        if *self.info_fails.lock() {
            return Err(NetworkError::ConnectionFailed("admin unavailable".into()));
        }
        Ok(self.peers.lock().clone())
    }

    async fn connect_to(&self, addr: SocketAddr) -> NetworkResult<ConnectToResponse> {
        self.calls.lock().push(addr);
        Ok(self
            .replies
            .lock()
            .get(&addr)
            .cloned()
            .unwrap_or_else(|| ConnectToResponse {
                success: false,
                error_message: "connection refused".to_string(),
            }))
    }
}
