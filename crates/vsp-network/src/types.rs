//! Core protocol types: identifiers, enum domains and blockchain payloads.
//!
//! These are the semantic types the rest of the crate works with. Their
//! wire representations live in [`crate::wire`].

use crate::{NetworkError, NetworkResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Opaque, globally unique peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh identifier from a uniform random 128-bit source.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side opened the peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn is_outbound(self) -> bool {
        self == Direction::Outbound
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability a peer advertises during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Netzwerkrouting,
    BlockchainFull,
    BlockchainSimple,
    Wallet,
    Miner,
}

/// A set of advertised services.
pub type ServiceSet = BTreeSet<ServiceType>;

impl ServiceType {
    /// Every service tag, in wire-code order.
    pub const ALL: [ServiceType; 5] = [
        ServiceType::Wallet,
        ServiceType::Miner,
        ServiceType::BlockchainFull,
        ServiceType::BlockchainSimple,
        ServiceType::Netzwerkrouting,
    ];

    /// Numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            ServiceType::Wallet => 0,
            ServiceType::Miner => 1,
            ServiceType::BlockchainFull => 2,
            ServiceType::BlockchainSimple => 3,
            ServiceType::Netzwerkrouting => 4,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ServiceType::Wallet),
            1 => Some(ServiceType::Miner),
            2 => Some(ServiceType::BlockchainFull),
            3 => Some(ServiceType::BlockchainSimple),
            4 => Some(ServiceType::Netzwerkrouting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Netzwerkrouting => "netzwerkrouting",
            ServiceType::BlockchainFull => "blockchain_full",
            ServiceType::BlockchainSimple => "blockchain_simple",
            ServiceType::Wallet => "wallet",
            ServiceType::Miner => "miner",
        }
    }

    /// The full service set a node advertises by default.
    pub fn full_set() -> ServiceSet {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netzwerkrouting" => Ok(ServiceType::Netzwerkrouting),
            "blockchain_full" => Ok(ServiceType::BlockchainFull),
            "blockchain_simple" => Ok(ServiceType::BlockchainSimple),
            "wallet" => Ok(ServiceType::Wallet),
            "miner" => Ok(ServiceType::Miner),
            other => Err(NetworkError::malformed(
                "service",
                format!("unknown service tag {:?}", other),
            )),
        }
    }
}

/// 32-byte hash (block id, transaction id, merkle root).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Parse from a byte slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> NetworkResult<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            NetworkError::malformed("hash", format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// SHA256(SHA256(data)).
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Self(second.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

/// 20-byte public-key hash used by bloom-style filters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PubKeyHash(pub [u8; 20]);

impl PubKeyHash {
    /// First 20 bytes of SHA256(SHA256(pubKey)) of a compressed public key.
    pub fn from_public_key(pub_key: &[u8; 33]) -> Self {
        let digest = Hash::double_sha256(pub_key);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.0[..20]);
        Self(out)
    }

    /// Parse from a byte slice, which must be exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> NetworkResult<Self> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            NetworkError::malformed(
                "pub_key_hash",
                format!("expected 20 bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for PubKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PubKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKeyHash({})", hex::encode(self.0))
    }
}

/// Inventory object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
}

impl InvType {
    pub fn code(self) -> i32 {
        match self {
            InvType::Tx => 0,
            InvType::Block => 1,
            InvType::FilteredBlock => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(InvType::Tx),
            1 => Some(InvType::Block),
            2 => Some(InvType::FilteredBlock),
            _ => None,
        }
    }
}

/// Inventory announcement / request entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVector {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvVector {
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Self { inv_type, hash }
    }
}

/// Locator used by `GetHeaders`: most recent hash first, sparser further back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLocator {
    pub hashes: Vec<Hash>,
    pub stop_hash: Hash,
}

impl BlockLocator {
    /// Build a locator from a chain ordered genesis-first.
    ///
    /// The ten most recent hashes are included one by one, then the step
    /// doubles until genesis, which is always the last entry.
    pub fn from_chain(chain: &[Hash], stop_hash: Hash) -> Self {
        let mut hashes = Vec::new();
        if chain.is_empty() {
            return Self { hashes, stop_hash };
        }

        let mut index = chain.len() - 1;
        let mut step = 1usize;
        loop {
            hashes.push(chain[index]);
            if index == 0 {
                break;
            }
            if hashes.len() >= 10 {
                step *= 2;
            }
            index = index.saturating_sub(step);
        }

        Self { hashes, stop_hash }
    }
}

/// Block header fields relevant to header synchronisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub previous_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Header hash: SHA256(SHA256(prev | merkle | timestamp | difficulty | nonce)).
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&self.previous_block_hash.0);
        buf.extend_from_slice(&self.merkle_root.0);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        Hash::double_sha256(&buf)
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_tx_id: Hash,
    pub output_index: u32,
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

/// Transaction body. Validation is the business of the observers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::new();
        for input in &self.inputs {
            buf.extend_from_slice(&input.prev_tx_id.0);
            buf.extend_from_slice(&input.output_index.to_le_bytes());
            buf.extend_from_slice(&input.pub_key);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(&output.pub_key_hash.0);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        Hash::double_sha256(&buf)
    }
}

/// Full block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// Transaction together with its merkle inclusion path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub transaction: Transaction,
    pub hashes: Vec<Hash>,
    pub index: u32,
}

/// Filtered block: the header plus the matching transactions with proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub proofs: Vec<MerkleProof>,
}

/// What a node advertises about itself in `Version` / `Verack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub services: ServiceSet,
    pub listening_endpoint: SocketAddr,
}

/// A peer reference with its last activity, as produced for `Addr` replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub peer_id: PeerId,
    /// Unix seconds.
    pub last_active: u64,
}

/// `PeerAddress` resolved through the address registry for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub endpoint: SocketAddr,
    /// Unix seconds.
    pub last_active: u64,
}
