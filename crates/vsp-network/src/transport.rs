//! TCP transport.
//!
//! Outbound traffic goes over one lazily opened connection per peer, to the
//! peer's listening endpoint, or before the handshake to the endpoint its
//! envelopes advertised; the address registry owns those handles.
//! Inbound traffic arrives on accepted sockets and is handed, frame by
//! frame, to an [`InboundHandler`] together with the observed source address.

use crate::codec::{Envelope, MessageCodec};
use crate::connection::{ConnectionConfig, ConnectionHandle};
use crate::message::Message;
use crate::registry::AddressRegistry;
use crate::types::PeerId;
use crate::wire::WireMessage;
use crate::{NetworkError, NetworkResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound side of the peer transport, keyed by peer id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to a peer, waiting until it has been written.
    async fn send(&self, peer: &PeerId, message: Message) -> NetworkResult<()>;
}

/// Consumer of inbound frames.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one decoded envelope received from `observed`.
    async fn handle_envelope(&self, observed: SocketAddr, envelope: Envelope);
}

/// Transport over TCP with the framed JSON codec.
pub struct TcpTransport {
    registry: Arc<AddressRegistry>,
    config: ConnectionConfig,
    /// Our advertised listening endpoint, stamped on every envelope.
    local_endpoint: SocketAddr,
}

impl TcpTransport {
    pub fn new(
        registry: Arc<AddressRegistry>,
        config: ConnectionConfig,
        local_endpoint: SocketAddr,
    ) -> Self {
        Self {
            registry,
            config,
            local_endpoint,
        }
    }

    /// Reuse the peer's connection, or open one to its reply endpoint.
    async fn connection_for(&self, peer: &PeerId) -> NetworkResult<ConnectionHandle> {
        if let Some(handle) = self.registry.connection(peer) {
            if !handle.is_closed() {
                return Ok(handle);
            }
            debug!(peer = %peer, "Dropping dead connection");
            self.registry.clear_connection(peer);
        }

        let endpoint = self
            .registry
            .reply_endpoint(peer)
            .ok_or_else(|| NetworkError::NoEndpoint(peer.clone()))?;
        let handle = ConnectionHandle::connect(endpoint, &self.config).await?;

        match self.registry.set_connection(peer, handle.clone()) {
            Ok(()) => Ok(handle),
            // Another sender won the race; use its connection and let ours drop.
            Err(NetworkError::ConnectionAlreadySet(_)) => self
                .registry
                .connection(peer)
                .ok_or(NetworkError::ConnectionClosed),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, peer: &PeerId, message: Message) -> NetworkResult<()> {
        let handle = self.connection_for(peer).await?;
        let envelope = Envelope {
            sender: Some(self.local_endpoint),
            message: WireMessage::from(&message),
        };

        let result = handle.send(envelope, self.config.send_timeout).await;
        if result.is_err() && handle.is_closed() {
            self.registry.clear_connection(peer);
        }
        result
    }
}

/// Accept loop for inbound peer connections.
pub struct InboundServer {
    handler: Arc<dyn InboundHandler>,
    magic: [u8; 4],
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl InboundServer {
    pub fn new(handler: Arc<dyn InboundHandler>, magic: [u8; 4], max_connections: usize) -> Self {
        Self {
            handler,
            magic,
            max_connections,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of inbound sockets currently being read.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> NetworkResult<()> {
        info!(addr = %listener.local_addr()?, "Peer listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Peer listener shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.handle_incoming(stream, addr, shutdown.child_token()),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    /// Claim a connection slot, unless all `max_connections` are taken.
    fn try_acquire(&self) -> bool {
        let max = self.max_connections;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn handle_incoming(&self, stream: TcpStream, addr: SocketAddr, shutdown: CancellationToken) {
        if !self.try_acquire() {
            warn!(addr = %addr, "Max connections reached, rejecting");
            return;
        }

        debug!(addr = %addr, "Incoming connection");
        let handler = Arc::clone(&self.handler);
        let active = Arc::clone(&self.active);
        let magic = self.magic;

        tokio::spawn(async move {
            read_loop(stream, addr, magic, handler, shutdown).await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Frames from one socket are handled in arrival order.
async fn read_loop(
    stream: TcpStream,
    addr: SocketAddr,
    magic: [u8; 4],
    handler: Arc<dyn InboundHandler>,
    shutdown: CancellationToken,
) {
    let mut frames = FramedRead::new(stream, MessageCodec::with_magic(magic));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(envelope)) => handler.handle_envelope(addr, envelope).await,
                Some(Err(e)) => {
                    warn!(addr = %addr, error = %e, "Receive error");
                    break;
                }
                None => {
                    debug!(addr = %addr, "Connection closed by peer");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ForwardingHandler(mpsc::UnboundedSender<(SocketAddr, Envelope)>);

    #[async_trait]
    impl InboundHandler for ForwardingHandler {
        async fn handle_envelope(&self, observed: SocketAddr, envelope: Envelope) {
            let _ = self.0.send((observed, envelope));
        }
    }

    async fn start_server() -> (
        SocketAddr,
        mpsc::UnboundedReceiver<(SocketAddr, Envelope)>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = InboundServer::new(
            Arc::new(ForwardingHandler(tx)),
            crate::MAINNET_MAGIC,
            8,
        );
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { server.run(listener, token).await });
        (addr, rx, shutdown)
    }

    #[tokio::test]
    async fn test_send_opens_connection_lazily() {
        let (addr, mut rx, shutdown) = start_server().await;
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let (peer, _) = registry.get_or_create_outbound(addr);
        let local: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let transport = TcpTransport::new(Arc::clone(&registry), ConnectionConfig::default(), local);

        assert!(registry.connection(&peer).is_none());
        transport.send(&peer, Message::GetAddr).await.unwrap();
        assert!(registry.connection(&peer).is_some());

        transport.send(&peer, Message::HeartbeatPing).await.unwrap();

        let (_, first) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.sender, Some(local));
        assert_eq!(first.message, WireMessage::GetAddr);
        let (_, second) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.message, WireMessage::HeartbeatPing);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_send_without_endpoint_fails() {
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let peer = registry.get_or_create_inbound("127.0.0.1:40000".parse().unwrap());
        let transport = TcpTransport::new(
            registry,
            ConnectionConfig::default(),
            "127.0.0.1:7000".parse().unwrap(),
        );

        let result = transport.send(&peer, Message::Ack).await;
        assert!(matches!(result, Err(NetworkError::NoEndpoint(_))));
    }

    #[tokio::test]
    async fn test_send_before_handshake_uses_advertised_sender() {
        let (addr, mut rx, shutdown) = start_server().await;
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        // A fresh inbound peer whose envelope named `addr` as its listener.
        let peer = registry.resolve_sender("127.0.0.1:45999".parse().unwrap(), Some(addr));
        let transport = TcpTransport::new(
            Arc::clone(&registry),
            ConnectionConfig::default(),
            "127.0.0.1:7000".parse().unwrap(),
        );

        transport.send(&peer, Message::HeartbeatPong).await.unwrap();

        let (_, received) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message, WireMessage::HeartbeatPong);
        shutdown.cancel();
    }

    #[test]
    fn test_connection_slots_capped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = InboundServer::new(Arc::new(ForwardingHandler(tx)), crate::MAINNET_MAGIC, 2);

        let claimed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| server.try_acquire()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(claimed, 2);
        assert_eq!(server.active_connections(), 2);
    }
}
