//! Inbound message routing.
//!
//! Every received envelope is resolved to a peer id, validated, and handed
//! to the handshake engine, discovery, keepalive or the observer hub.

use crate::codec::Envelope;
use crate::discovery::Discovery;
use crate::error::RejectType;
use crate::handshake::HandshakeEngine;
use crate::hub::{BlockchainEvent, ObserverHub};
use crate::message::{Message, MessageType};
use crate::peer::PeerState;
use crate::registry::AddressRegistry;
use crate::sender::PeerSender;
use crate::transport::InboundHandler;
use crate::types::PeerId;
use crate::NetworkError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MessageRouter {
    registry: Arc<AddressRegistry>,
    engine: Arc<HandshakeEngine>,
    hub: Arc<ObserverHub>,
    discovery: Arc<Discovery>,
    sender: PeerSender,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<AddressRegistry>,
        engine: Arc<HandshakeEngine>,
        hub: Arc<ObserverHub>,
        discovery: Arc<Discovery>,
        sender: PeerSender,
    ) -> Self {
        Self {
            registry,
            engine,
            hub,
            discovery,
            sender,
        }
    }

    /// Resolve the sender of an envelope and route its message.
    ///
    /// Returns the peer the envelope was attributed to.
    pub async fn route(&self, observed: SocketAddr, envelope: Envelope) -> PeerId {
        let peer = self.registry.resolve_sender(observed, envelope.sender);
        let kind = envelope.message.message_type();

        match Message::try_from(envelope.message) {
            Ok(message) => self.handle_message(&peer, message).await,
            Err(e) => self.reject_malformed(&peer, kind, &e).await,
        }
        peer
    }

    /// Route a decoded message from a resolved peer.
    pub async fn handle_message(&self, peer: &PeerId, message: Message) {
        self.registry.store().touch(peer);
        let kind = message.message_type();
        debug!(peer = %peer, msg = %kind, "Received message");

        if !kind.is_handshake() && kind != MessageType::Reject {
            let state = self
                .registry
                .store()
                .snapshot(peer)
                .map(|p| p.state())
                .unwrap_or(PeerState::Closed);
            if state != PeerState::Connected {
                let error = NetworkError::OutOfSequence {
                    message: kind.name(),
                    state: state.as_str(),
                };
                self.handle_error(peer, kind, error).await;
                return;
            }
        }

        let result = match message {
            Message::Version(info) => self.engine.on_version(peer, info).await,
            Message::Verack(info) => self.engine.on_verack(peer, info).await,
            Message::Ack => self.engine.on_ack(peer).await,
            Message::GetAddr => {
                self.discovery.on_get_addr(peer).await;
                Ok(())
            }
            Message::Addr(addrs) => {
                self.discovery.on_addr(peer, &addrs);
                Ok(())
            }
            Message::HeartbeatPing => {
                self.sender.send_pong(peer).await;
                Ok(())
            }
            // Receiving it already refreshed last-seen.
            Message::HeartbeatPong => Ok(()),
            Message::Reject(reject) => {
                warn!(
                    peer = %peer,
                    reject_type = %reject.reject_type,
                    rejected = %reject.message,
                    "Peer rejected our message"
                );
                Ok(())
            }
            Message::Inv(items) => self.publish(peer, BlockchainEvent::Inv(items)),
            Message::GetData(items) => self.publish(peer, BlockchainEvent::GetData(items)),
            Message::Block(block) => self.publish(peer, BlockchainEvent::Block(block)),
            Message::MerkleBlock(block) => self.publish(peer, BlockchainEvent::MerkleBlock(block)),
            Message::Tx(tx) => self.publish(peer, BlockchainEvent::Tx(tx)),
            Message::GetHeaders(locator) => self.publish(peer, BlockchainEvent::GetHeaders(locator)),
            Message::Headers(headers) => self.publish(peer, BlockchainEvent::Headers(headers)),
            Message::SetFilter(hashes) => self.publish(peer, BlockchainEvent::SetFilter(hashes)),
            Message::Mempool => self.publish(peer, BlockchainEvent::Mempool),
        };

        if let Err(e) = result {
            self.handle_error(peer, kind, e).await;
        }
    }

    fn publish(&self, peer: &PeerId, event: BlockchainEvent) -> Result<(), NetworkError> {
        self.hub.dispatch(peer, event);
        Ok(())
    }

    /// Answer a message whose fields failed validation. Peer state is left
    /// untouched.
    async fn reject_malformed(&self, peer: &PeerId, kind: MessageType, error: &NetworkError) {
        warn!(peer = %peer, msg = %kind, error = %error, "Malformed message");
        self.sender
            .send_reject(peer, RejectType::Malformed, kind.name(), Vec::new())
            .await;
    }

    async fn handle_error(&self, peer: &PeerId, kind: MessageType, error: NetworkError) {
        match error.reject_type() {
            Some(RejectType::OutOfSequence) => {
                warn!(peer = %peer, msg = %kind, error = %error, "Protocol sequence error");
                self.sender
                    .send_reject(peer, RejectType::OutOfSequence, kind.name(), Vec::new())
                    .await;
                self.engine.close(peer, "protocol sequence error");
            }
            Some(RejectType::Duplicate) => {
                warn!(peer = %peer, msg = %kind, error = %error, "Duplicate peer session");
                self.sender
                    .send_reject(peer, RejectType::Duplicate, kind.name(), Vec::new())
                    .await;
                self.engine.close(peer, "duplicate session");
            }
            Some(reject_type) => {
                warn!(peer = %peer, msg = %kind, error = %error, "Rejecting message");
                self.sender
                    .send_reject(peer, reject_type, kind.name(), Vec::new())
                    .await;
            }
            None => {
                warn!(peer = %peer, msg = %kind, error = %error, "Failed to handle message");
            }
        }
    }
}

#[async_trait]
impl InboundHandler for MessageRouter {
    async fn handle_envelope(&self, observed: SocketAddr, envelope: Envelope) {
        self.route(observed, envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::LocalNode;
    use crate::hub::BlockchainObserver;
    use crate::peer::PeerStore;
    use crate::transport::Transport;
    use crate::types::{Hash, InvType, InvVector, ServiceType, VersionInfo};
    use crate::wire::{WireInv, WireMessage};
    use crate::NetworkResult;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

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

    impl RecordingTransport {
        fn kinds(&self) -> Vec<&'static str> {
            self.sent
                .lock()
                .iter()
                .map(|(_, m)| m.message_type().name())
                .collect()
        }

        fn last_reject(&self) -> Option<(RejectType, String)> {
            self.sent.lock().iter().rev().find_map(|(_, m)| match m {
                Message::Reject(r) => Some((r.reject_type, r.message.clone())),
                _ => None,
            })
        }
    }

    struct InvObserver(mpsc::UnboundedSender<Vec<InvVector>>);

    #[async_trait]
    impl BlockchainObserver for InvObserver {
        async fn on_inv(&self, _peer: &PeerId, items: &[InvVector]) {
            let _ = self.0.send(items.to_vec());
        }
    }

    struct Fixture {
        router: MessageRouter,
        registry: Arc<AddressRegistry>,
        hub: Arc<ObserverHub>,
        transport: Arc<RecordingTransport>,
    }

    fn fixture() -> Fixture {
        let local: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let registry = Arc::new(AddressRegistry::new(Arc::new(PeerStore::new())));
        let transport = Arc::new(RecordingTransport::default());
        let sender = PeerSender::new(transport.clone());
        let hub = Arc::new(ObserverHub::default());
        let engine = Arc::new(HandshakeEngine::new(
            Arc::clone(&registry),
            transport.clone(),
            Arc::clone(&hub),
            LocalNode::new(local),
        ));
        let discovery = Arc::new(Discovery::new(Arc::clone(&registry), sender.clone(), local));
        let router = MessageRouter::new(
            Arc::clone(&registry),
            engine,
            Arc::clone(&hub),
            discovery,
            sender,
        );
        Fixture {
            router,
            registry,
            hub,
            transport,
        }
    }

    fn version(endpoint: &str) -> Message {
        Message::Version(VersionInfo {
            version: "v2.5.1".into(),
            services: [ServiceType::BlockchainFull].into_iter().collect(),
            listening_endpoint: endpoint.parse().unwrap(),
        })
    }

    async fn connect_inbound(f: &Fixture, endpoint: &str) -> PeerId {
        let observed: SocketAddr = "127.0.0.1:45000".parse().unwrap();
        let peer = f.registry.resolve_sender(observed, None);
        f.router.handle_message(&peer, version(endpoint)).await;
        f.router.handle_message(&peer, Message::Ack).await;
        peer
    }

    #[tokio::test]
    async fn test_inv_before_connected_is_rejected_and_closes() {
        let f = fixture();
        let envelope = Envelope {
            sender: Some("127.0.0.1:9500".parse().unwrap()),
            message: WireMessage::from(&version("127.0.0.1:9500")),
        };
        let peer = f.router.route("127.0.0.1:45001".parse().unwrap(), envelope).await;

        f.router
            .handle_message(&peer, Message::Inv(vec![InvVector::new(InvType::Tx, Hash::ZERO)]))
            .await;

        assert_eq!(
            f.transport.last_reject(),
            Some((RejectType::OutOfSequence, "inv".to_string()))
        );
        assert!(f.registry.store().get_peer(&peer).is_none());
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected_without_state_change() {
        let f = fixture();
        let peer = connect_inbound(&f, "127.0.0.1:9501").await;

        let envelope = Envelope {
            sender: Some("127.0.0.1:9501".parse().unwrap()),
            message: WireMessage::Inv(vec![WireInv {
                inv_type: 1,
                hash: "abcd".into(),
            }]),
        };
        let routed = f.router.route("127.0.0.1:45002".parse().unwrap(), envelope).await;

        assert_eq!(routed, peer);
        assert_eq!(
            f.transport.last_reject(),
            Some((RejectType::Malformed, "inv".to_string()))
        );
        assert_eq!(
            f.registry.store().snapshot(&peer).unwrap().state(),
            PeerState::Connected
        );
    }

    #[tokio::test]
    async fn test_version_claiming_connected_endpoint_is_refused() {
        let f = fixture();
        let owner = connect_inbound(&f, "127.0.0.1:9505").await;

        let observed: SocketAddr = "127.0.0.1:45003".parse().unwrap();
        let envelope = Envelope {
            sender: None,
            message: WireMessage::from(&version("127.0.0.1:9505")),
        };
        let dup = f.router.route(observed, envelope).await;

        assert_ne!(dup, owner);
        assert_eq!(
            f.transport.last_reject(),
            Some((RejectType::Duplicate, "version".to_string()))
        );
        assert!(f.registry.store().get_peer(&dup).is_none());
        assert!(f.registry.lookup_by_address(&observed).is_none());

        // The socket never inherited the connected peer, so it is still gated.
        let envelope = Envelope {
            sender: None,
            message: WireMessage::from(&Message::Mempool),
        };
        let next = f.router.route(observed, envelope).await;
        assert_ne!(next, owner);
        assert_eq!(
            f.transport.last_reject(),
            Some((RejectType::OutOfSequence, "mempool".to_string()))
        );
        assert_eq!(
            f.registry.store().snapshot(&owner).unwrap().state(),
            PeerState::Connected
        );
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let f = fixture();
        let peer = connect_inbound(&f, "127.0.0.1:9502").await;

        f.router.handle_message(&peer, Message::HeartbeatPing).await;
        assert_eq!(f.transport.kinds(), vec!["verack", "heartbeat_pong"]);
    }

    #[tokio::test]
    async fn test_inv_reaches_observers() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.hub.attach(Arc::new(InvObserver(tx)));
        let peer = connect_inbound(&f, "127.0.0.1:9503").await;

        let items = vec![InvVector::new(InvType::Block, Hash([3; 32]))];
        f.router.handle_message(&peer, Message::Inv(items.clone())).await;

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, items);
    }

    #[tokio::test]
    async fn test_getaddr_replies_with_other_peers() {
        let f = fixture();
        f.registry
            .get_or_create_outbound("10.0.0.7:50051".parse().unwrap());
        let peer = connect_inbound(&f, "127.0.0.1:9504").await;

        f.router.handle_message(&peer, Message::GetAddr).await;
        let sent = f.transport.sent.lock();
        match &sent.last().unwrap().1 {
            Message::Addr(addrs) => {
                assert_eq!(addrs.len(), 1);
                assert_eq!(addrs[0].endpoint, "10.0.0.7:50051".parse().unwrap());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
