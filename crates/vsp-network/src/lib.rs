//! # vsp-network
//!
//! P2P networking core for the VSP blockchain node.
//!
//! This crate provides:
//! - Peer records, the peer store and the address registry
//! - The Version/Verack/Ack handshake
//! - Inbound routing and the observer hub for blockchain events
//! - GetAddr/Addr discovery, gossip and keepalive
//! - TCP transport, framing and the local admin RPC

pub mod admin;
mod codec;
mod connection;
pub mod discovery;
mod error;
mod handshake;
pub mod hub;
mod keepalive;
mod message;
mod peer;
mod registry;
mod router;
mod sender;
mod service;
mod transport;
pub mod types;
pub mod wire;
mod worker;

pub use admin::{
    AdminClient, AdminRequest, AdminResponse, AdminServer, AdminService, ConnectToResponse,
    InfrastructureData, InternalPeerInfo,
};
pub use codec::{Envelope, FrameCodec, MessageCodec};
pub use connection::{ConnectionConfig, ConnectionHandle};
pub use discovery::{Discovery, GossipConfig, GossipService};
pub use error::{NetworkError, NetworkResult, RejectType};
pub use handshake::{HandshakeEngine, LocalNode};
pub use hub::{BlockchainEvent, BlockchainObserver, ConnectionObserver, ObserverHub};
pub use keepalive::{KeepaliveConfig, KeepaliveService, Sweep};
pub use message::{Message, MessageType, RejectMessage};
pub use peer::{Peer, PeerState, PeerStore, SharedPeer};
pub use registry::{AddressRegistry, RegistryEntry};
pub use router::MessageRouter;
pub use sender::PeerSender;
pub use service::{NetworkConfig, NetworkService};
pub use transport::{InboundHandler, InboundServer, TcpTransport, Transport};
pub use types::{Direction, PeerId, ServiceSet, ServiceType, VersionInfo};
pub use worker::PeriodicTask;

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 50051;

/// Protocol magic bytes for mainnet.
pub const MAINNET_MAGIC: [u8; 4] = [0x56, 0x53, 0x50, 0x01];

/// Protocol magic bytes for testnet.
pub const TESTNET_MAGIC: [u8; 4] = [0x56, 0x53, 0x50, 0x02];

/// Magic bytes of admin RPC frames.
pub const ADMIN_MAGIC: [u8; 4] = [0x56, 0x53, 0x50, 0xad];

/// Maximum message size.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Protocol version string advertised in the handshake.
pub const PROTOCOL_VERSION: &str = "v1.0.0";
