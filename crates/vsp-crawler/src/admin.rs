//! The crawler's view of the node admin RPC.

use async_trait::async_trait;
use std::net::SocketAddr;
use vsp_network::{AdminClient, ConnectToResponse, InternalPeerInfo, NetworkResult};

/// Admin calls the crawler needs from a node.
#[async_trait]
pub trait NodeAdmin: Send + Sync {
    /// Snapshot of the node's peers.
    async fn internal_peer_info(&self) -> NetworkResult<Vec<InternalPeerInfo>>;

    /// Ask the node to handshake with `addr`.
    async fn connect_to(&self, addr: SocketAddr) -> NetworkResult<ConnectToResponse>;
}

#[async_trait]
impl NodeAdmin for AdminClient {
    async fn internal_peer_info(&self) -> NetworkResult<Vec<InternalPeerInfo>> {
        AdminClient::internal_peer_info(self).await
    }

    async fn connect_to(&self, addr: SocketAddr) -> NetworkResult<ConnectToResponse> {
        AdminClient::connect_to(self, addr).await
    }
}

/// Whether a `ConnectTo` reply means the peer is reachable.
///
/// The node refuses to dial a peer it is already talking to, which still
/// proves reachability.
pub fn connect_succeeded(response: &ConnectToResponse) -> bool {
    response.success
        || response.error_message.contains("state connected")
        || response.error_message.contains("already connected")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(success: bool, msg: &str) -> ConnectToResponse {
        ConnectToResponse {
            success,
            error_message: msg.to_string(),
        }
    }

    #[test]
    fn test_connect_succeeded() {
        assert!(connect_succeeded(&reply(true, "")));
        assert!(connect_succeeded(&reply(false, "peer abc already connected")));
        assert!(connect_succeeded(&reply(false, "peer in state connected")));
        assert!(!connect_succeeded(&reply(
            false,
            "handshake with abc in progress (state awaiting_verack)"
        )));
        assert!(!connect_succeeded(&reply(false, "connection refused")));
    }
}
