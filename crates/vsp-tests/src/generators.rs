//! Test data generators for integration tests.

use std::net::SocketAddr;
use vsp_network::types::{
    Hash, InvType, InvVector, PubKeyHash, Transaction, TxInput, TxOutput, VersionInfo,
};
use vsp_network::{InfrastructureData, InternalPeerInfo, ServiceType};

/// Parse a socket address literal.
pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

/// Handshake payload of a remote node.
pub fn version_info(version: &str, services: &[ServiceType], endpoint: &str) -> VersionInfo {
    VersionInfo {
        version: version.to_string(),
        services: services.iter().copied().collect(),
        listening_endpoint: addr(endpoint),
    }
}

/// A `GetInternalPeerInfo` entry.
pub fn peer_info(endpoint: &str, state: &str, services: &[&str]) -> InternalPeerInfo {
    InternalPeerInfo {
        peer_id: format!("peer-{}", endpoint),
        infrastructure_data: InfrastructureData {
            listening_endpoint: endpoint.to_string(),
        },
        version: "v1.0.0".to_string(),
        connection_state: state.to_string(),
        direction: "outbound".to_string(),
        supported_services: services.iter().map(|s| s.to_string()).collect(),
    }
}

/// Deterministic hash derived from a seed.
pub fn test_hash(seed: u8) -> Hash {
    Hash::double_sha256(&[seed])
}

/// Block inventory entry.
pub fn test_inv(seed: u8) -> InvVector {
    InvVector::new(InvType::Block, test_hash(seed))
}

/// A compressed public key with the given parity and body byte.
pub fn test_pub_key(seed: u8) -> [u8; 33] {
    let mut key = [seed; 33];
    key[0] = if seed % 2 == 0 { 0x02 } else { 0x03 };
    key
}

/// One-input, one-output transaction.
pub fn test_tx(seed: u8) -> Transaction {
    Transaction {
        inputs: vec![TxInput {
            prev_tx_id: test_hash(seed),
            output_index: 0,
            signature: vec![seed; 64],
            pub_key: test_pub_key(seed).to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            value: 50_000 + u64::from(seed),
            pub_key_hash: PubKeyHash::from_public_key(&test_pub_key(seed.wrapping_add(1))),
        }],
        lock_time: 0,
    }
}
