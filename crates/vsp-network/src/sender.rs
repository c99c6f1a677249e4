//! Best-effort send helpers keyed by peer id.
//!
//! Every helper logs a transport failure at warn and swallows it; callers
//! treat delivery as best-effort and retry on their own schedule.

use crate::error::RejectType;
use crate::message::{Message, RejectMessage};
use crate::transport::Transport;
use crate::types::{
    Block, BlockHeader, BlockLocator, InvVector, MerkleBlock, NetAddress, PeerId, PubKeyHash,
    Transaction,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outbound message helpers over a [`Transport`].
#[derive(Clone)]
pub struct PeerSender {
    transport: Arc<dyn Transport>,
}

impl PeerSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send and report whether the transport accepted the message.
    pub async fn send(&self, peer: &PeerId, message: Message) -> bool {
        let msg = message.message_type();
        match self.transport.send(peer, message).await {
            Ok(()) => {
                debug!(peer = %peer, msg = %msg, "Sent message");
                true
            }
            Err(e) => {
                warn!(peer = %peer, msg = %msg, error = %e, "Failed to send message");
                false
            }
        }
    }

    pub async fn send_inv(&self, peer: &PeerId, items: Vec<InvVector>) {
        self.send(peer, Message::Inv(items)).await;
    }

    pub async fn send_get_data(&self, peer: &PeerId, items: Vec<InvVector>) {
        self.send(peer, Message::GetData(items)).await;
    }

    pub async fn send_block(&self, peer: &PeerId, block: Block) {
        self.send(peer, Message::Block(block)).await;
    }

    pub async fn send_merkle_block(&self, peer: &PeerId, block: MerkleBlock) {
        self.send(peer, Message::MerkleBlock(block)).await;
    }

    pub async fn send_tx(&self, peer: &PeerId, tx: Transaction) {
        self.send(peer, Message::Tx(tx)).await;
    }

    pub async fn send_get_headers(&self, peer: &PeerId, locator: BlockLocator) {
        self.send(peer, Message::GetHeaders(locator)).await;
    }

    pub async fn send_headers(&self, peer: &PeerId, headers: Vec<BlockHeader>) {
        self.send(peer, Message::Headers(headers)).await;
    }

    pub async fn send_set_filter(&self, peer: &PeerId, pub_key_hashes: Vec<PubKeyHash>) {
        self.send(peer, Message::SetFilter(pub_key_hashes)).await;
    }

    pub async fn send_mempool(&self, peer: &PeerId) {
        self.send(peer, Message::Mempool).await;
    }

    pub async fn send_reject(
        &self,
        peer: &PeerId,
        reject_type: RejectType,
        rejected: &str,
        data: Vec<u8>,
    ) {
        let reject = RejectMessage::new(reject_type, rejected).with_data(data);
        self.send(peer, Message::Reject(reject)).await;
    }

    pub async fn send_get_addr(&self, peer: &PeerId) {
        self.send(peer, Message::GetAddr).await;
    }

    pub async fn send_addr(&self, peer: &PeerId, addrs: Vec<NetAddress>) {
        self.send(peer, Message::Addr(addrs)).await;
    }

    pub async fn send_ping(&self, peer: &PeerId) {
        self.send(peer, Message::HeartbeatPing).await;
    }

    pub async fn send_pong(&self, peer: &PeerId) {
        self.send(peer, Message::HeartbeatPong).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkError, NetworkResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakyTransport {
        fail: bool,
        sent: Mutex<Vec<(PeerId, Message)>>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, peer: &PeerId, message: Message) -> NetworkResult<()> {
            if self.fail {
                return Err(NetworkError::ConnectionClosed);
            }
            self.sent.lock().push((peer.clone(), message));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_helpers_build_messages() {
        let transport = Arc::new(FlakyTransport::default());
        let sender = PeerSender::new(transport.clone());
        let peer = PeerId::random();

        sender.send_mempool(&peer).await;
        sender
            .send_reject(&peer, RejectType::Malformed, "inv", vec![9])
            .await;

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, Message::Mempool);
        match &sent[1].1 {
            Message::Reject(reject) => {
                assert_eq!(reject.reject_type, RejectType::Malformed);
                assert_eq!(reject.message, "inv");
                assert_eq!(reject.data, vec![9]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let transport = Arc::new(FlakyTransport {
            fail: true,
            ..Default::default()
        });
        let sender = PeerSender::new(transport);

        assert!(!sender.send(&PeerId::random(), Message::GetAddr).await);
        sender.send_ping(&PeerId::random()).await;
    }
}
