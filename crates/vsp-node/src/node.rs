//! Node implementation.

use crate::config::NodeConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vsp_network::hub::{BlockchainObserver, ConnectionObserver};
use vsp_network::types::{
    Block, BlockHeader, BlockLocator, InvVector, MerkleBlock, PubKeyHash, Transaction,
};
use vsp_network::{NetworkService, PeerId};

/// Logs every event the network delivers.
///
/// Stands in for the chain layer, which consumes the same callbacks.
#[derive(Debug, Default)]
pub struct EventLogger;

#[async_trait]
impl BlockchainObserver for EventLogger {
    async fn on_inv(&self, peer: &PeerId, items: &[InvVector]) {
        debug!(peer = %peer, count = items.len(), "Inv received");
    }

    async fn on_get_data(&self, peer: &PeerId, items: &[InvVector]) {
        debug!(peer = %peer, count = items.len(), "GetData received");
    }

    async fn on_block(&self, peer: &PeerId, block: &Block) {
        info!(peer = %peer, hash = %block.hash(), txs = block.transactions.len(), "Block received");
    }

    async fn on_merkle_block(&self, peer: &PeerId, block: &MerkleBlock) {
        debug!(peer = %peer, hash = %block.header.hash(), "MerkleBlock received");
    }

    async fn on_tx(&self, peer: &PeerId, tx: &Transaction) {
        debug!(peer = %peer, hash = %tx.hash(), "Transaction received");
    }

    async fn on_get_headers(&self, peer: &PeerId, locator: &BlockLocator) {
        debug!(peer = %peer, hashes = locator.hashes.len(), "GetHeaders received");
    }

    async fn on_headers(&self, peer: &PeerId, headers: &[BlockHeader]) {
        debug!(peer = %peer, count = headers.len(), "Headers received");
    }

    async fn on_set_filter(&self, peer: &PeerId, pub_key_hashes: &[PubKeyHash]) {
        debug!(peer = %peer, count = pub_key_hashes.len(), "SetFilter received");
    }

    async fn on_mempool(&self, peer: &PeerId) {
        debug!(peer = %peer, "Mempool received");
    }
}

#[async_trait]
impl ConnectionObserver for EventLogger {
    async fn on_peer_connected(&self, peer: &PeerId, is_outbound: bool) {
        info!(peer = %peer, outbound = is_outbound, "Peer connected");
    }

    async fn on_peer_disconnected(&self, peer: &PeerId) {
        info!(peer = %peer, "Peer disconnected");
    }
}

/// The node process: the network service plus its shutdown switch.
pub struct Node {
    config: NodeConfig,
    network: NetworkService,
    shutdown: CancellationToken,
}

impl Node {
    /// Create a new node. Must be called inside the runtime.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let network = NetworkService::new(config.to_network_config()?);

        let logger = Arc::new(EventLogger);
        network.attach(logger.clone());
        network.attach_connection_observer(logger);

        info!(
            node = %config.node_name,
            advertised = %network.config().advertised(),
            services = network.config().services.len(),
            "Node initialized"
        );

        Ok(Arc::new(Self {
            config,
            network,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run until [`Node::shutdown`] is called.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.network.run(self.shutdown.clone()).await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_runs_until_shutdown() {
        let mut config = NodeConfig::default();
        config.p2p.bind_address = "127.0.0.1:0".to_string();
        config.admin.bind_address = "127.0.0.1:0".to_string();

        let node = Node::new(config).await.unwrap();
        assert_eq!(node.config().node_name, "vsp-node");

        let runner = Arc::clone(&node);
        let task = tokio::spawn(async move { runner.run().await });
        node.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
