//! Wire DTOs for the peer protocol.
//!
//! Services and inventory types travel as numeric codes, hashes as hex
//! strings, endpoints as raw IP bytes plus a port. Converting a DTO into a
//! [`Message`] validates every field; a violation is a malformed message.

use crate::error::RejectType;
use crate::message::{Message, MessageType, RejectMessage};
use crate::types::{
    Block, BlockHeader, BlockLocator, Hash, InvType, InvVector, MerkleBlock, MerkleProof,
    NetAddress, PubKeyHash, ServiceSet, ServiceType, Transaction, TxInput, TxOutput, VersionInfo,
};
use crate::{NetworkError, NetworkResult};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEndpoint {
    /// 4 (IPv4) or 16 (IPv6) bytes.
    pub ip: Vec<u8>,
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireVersion {
    pub version: String,
    pub services: Vec<i32>,
    pub listening_endpoint: WireEndpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAddress {
    pub endpoint: WireEndpoint,
    pub last_active: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInv {
    pub inv_type: i32,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireHeader {
    pub previous_block_hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTxInput {
    pub prev_tx_id: String,
    pub output_index: u32,
    pub signature: String,
    pub pub_key: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTxOutput {
    pub value: u64,
    pub pub_key_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub inputs: Vec<WireTxInput>,
    pub outputs: Vec<WireTxOutput>,
    pub lock_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBlock {
    pub header: WireHeader,
    pub transactions: Vec<WireTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMerkleProof {
    pub transaction: WireTransaction,
    pub hashes: Vec<String>,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMerkleBlock {
    pub header: WireHeader,
    pub proofs: Vec<WireMerkleProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLocator {
    pub hashes: Vec<String>,
    pub stop_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReject {
    pub error_type: i32,
    pub message: String,
    pub data: String,
}

/// Message as it travels inside an [`Envelope`](crate::codec::Envelope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMessage {
    Version(WireVersion),
    Verack(WireVersion),
    Ack,
    GetAddr,
    Addr(Vec<WireAddress>),
    HeartbeatPing,
    HeartbeatPong,
    Inv(Vec<WireInv>),
    GetData(Vec<WireInv>),
    Block(WireBlock),
    MerkleBlock(WireMerkleBlock),
    Tx(WireTransaction),
    GetHeaders(WireLocator),
    Headers(Vec<WireHeader>),
    SetFilter(Vec<String>),
    Mempool,
    Reject(WireReject),
}

impl WireMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Version(_) => MessageType::Version,
            WireMessage::Verack(_) => MessageType::Verack,
            WireMessage::Ack => MessageType::Ack,
            WireMessage::GetAddr => MessageType::GetAddr,
            WireMessage::Addr(_) => MessageType::Addr,
            WireMessage::HeartbeatPing => MessageType::HeartbeatPing,
            WireMessage::HeartbeatPong => MessageType::HeartbeatPong,
            WireMessage::Inv(_) => MessageType::Inv,
            WireMessage::GetData(_) => MessageType::GetData,
            WireMessage::Block(_) => MessageType::Block,
            WireMessage::MerkleBlock(_) => MessageType::MerkleBlock,
            WireMessage::Tx(_) => MessageType::Tx,
            WireMessage::GetHeaders(_) => MessageType::GetHeaders,
            WireMessage::Headers(_) => MessageType::Headers,
            WireMessage::SetFilter(_) => MessageType::SetFilter,
            WireMessage::Mempool => MessageType::Mempool,
            WireMessage::Reject(_) => MessageType::Reject,
        }
    }
}

// ---------------------------------------------------------------------------
// Domain -> wire
// ---------------------------------------------------------------------------

impl From<SocketAddr> for WireEndpoint {
    fn from(addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self {
            ip,
            port: addr.port() as u32,
        }
    }
}

impl From<&VersionInfo> for WireVersion {
    fn from(info: &VersionInfo) -> Self {
        Self {
            version: info.version.clone(),
            services: info.services.iter().map(|s| s.code()).collect(),
            listening_endpoint: info.listening_endpoint.into(),
        }
    }
}

impl From<&InvVector> for WireInv {
    fn from(inv: &InvVector) -> Self {
        Self {
            inv_type: inv.inv_type.code(),
            hash: inv.hash.to_string(),
        }
    }
}

impl From<&BlockHeader> for WireHeader {
    fn from(header: &BlockHeader) -> Self {
        Self {
            previous_block_hash: header.previous_block_hash.to_string(),
            merkle_root: header.merkle_root.to_string(),
            timestamp: header.timestamp,
            difficulty: header.difficulty,
            nonce: header.nonce,
        }
    }
}

impl From<&Transaction> for WireTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            inputs: tx
                .inputs
                .iter()
                .map(|i| WireTxInput {
                    prev_tx_id: i.prev_tx_id.to_string(),
                    output_index: i.output_index,
                    signature: hex::encode(&i.signature),
                    pub_key: hex::encode(&i.pub_key),
                    sequence: i.sequence,
                })
                .collect(),
            outputs: tx
                .outputs
                .iter()
                .map(|o| WireTxOutput {
                    value: o.value,
                    pub_key_hash: o.pub_key_hash.to_string(),
                })
                .collect(),
            lock_time: tx.lock_time,
        }
    }
}

impl From<&Block> for WireBlock {
    fn from(block: &Block) -> Self {
        Self {
            header: (&block.header).into(),
            transactions: block.transactions.iter().map(Into::into).collect(),
        }
    }
}

impl From<&MerkleBlock> for WireMerkleBlock {
    fn from(block: &MerkleBlock) -> Self {
        Self {
            header: (&block.header).into(),
            proofs: block
                .proofs
                .iter()
                .map(|p| WireMerkleProof {
                    transaction: (&p.transaction).into(),
                    hashes: p.hashes.iter().map(|h| h.to_string()).collect(),
                    index: p.index,
                })
                .collect(),
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::Version(info) => WireMessage::Version(info.into()),
            Message::Verack(info) => WireMessage::Verack(info.into()),
            Message::Ack => WireMessage::Ack,
            Message::GetAddr => WireMessage::GetAddr,
            Message::Addr(addrs) => WireMessage::Addr(
                addrs
                    .iter()
                    .map(|a| WireAddress {
                        endpoint: a.endpoint.into(),
                        last_active: a.last_active,
                    })
                    .collect(),
            ),
            Message::HeartbeatPing => WireMessage::HeartbeatPing,
            Message::HeartbeatPong => WireMessage::HeartbeatPong,
            Message::Inv(items) => WireMessage::Inv(items.iter().map(Into::into).collect()),
            Message::GetData(items) => {
                WireMessage::GetData(items.iter().map(Into::into).collect())
            }
            Message::Block(block) => WireMessage::Block(block.into()),
            Message::MerkleBlock(block) => WireMessage::MerkleBlock(block.into()),
            Message::Tx(tx) => WireMessage::Tx(tx.into()),
            Message::GetHeaders(locator) => WireMessage::GetHeaders(WireLocator {
                hashes: locator.hashes.iter().map(|h| h.to_string()).collect(),
                stop_hash: locator.stop_hash.to_string(),
            }),
            Message::Headers(headers) => {
                WireMessage::Headers(headers.iter().map(Into::into).collect())
            }
            Message::SetFilter(hashes) => {
                WireMessage::SetFilter(hashes.iter().map(|h| h.to_string()).collect())
            }
            Message::Mempool => WireMessage::Mempool,
            Message::Reject(reject) => WireMessage::Reject(WireReject {
                error_type: reject.reject_type.code(),
                message: reject.message.clone(),
                data: hex::encode(&reject.data),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire -> domain
// ---------------------------------------------------------------------------

/// Field-level decoding with the name of the enclosing message for errors.
struct Decode {
    message: &'static str,
}

impl Decode {
    fn err(&self, reason: impl Into<String>) -> NetworkError {
        NetworkError::malformed(self.message, reason)
    }

    fn bytes(&self, field: &str, s: &str) -> NetworkResult<Vec<u8>> {
        hex::decode(s).map_err(|e| self.err(format!("{}: invalid hex: {}", field, e)))
    }

    fn hash(&self, field: &str, s: &str) -> NetworkResult<Hash> {
        let bytes = self.bytes(field, s)?;
        if bytes.len() != 32 {
            return Err(self.err(format!(
                "{}: expected 32-byte hash, got {} bytes",
                field,
                bytes.len()
            )));
        }
        Hash::from_slice(&bytes)
    }

    fn pub_key_hash(&self, s: &str) -> NetworkResult<PubKeyHash> {
        let bytes = self.bytes("pub_key_hash", s)?;
        if bytes.len() != 20 {
            return Err(self.err(format!(
                "pub_key_hash: expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        PubKeyHash::from_slice(&bytes)
    }

    fn endpoint(&self, endpoint: &WireEndpoint) -> NetworkResult<SocketAddr> {
        let ip = match endpoint.ip.len() {
            4 => {
                let octets: [u8; 4] = endpoint.ip[..].try_into().map_err(|_| self.err("ip"))?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let octets: [u8; 16] = endpoint.ip[..].try_into().map_err(|_| self.err("ip"))?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            n => return Err(self.err(format!("endpoint ip must be 4 or 16 bytes, got {}", n))),
        };
        if endpoint.port == 0 || endpoint.port > u16::MAX as u32 {
            return Err(self.err(format!("endpoint port {} out of range", endpoint.port)));
        }
        Ok(SocketAddr::new(ip, endpoint.port as u16))
    }

    fn services(&self, codes: &[i32]) -> NetworkResult<ServiceSet> {
        codes
            .iter()
            .map(|&code| {
                ServiceType::from_code(code)
                    .ok_or_else(|| self.err(format!("unknown service code {}", code)))
            })
            .collect()
    }

    fn version(&self, v: &WireVersion) -> NetworkResult<VersionInfo> {
        Ok(VersionInfo {
            version: v.version.clone(),
            services: self.services(&v.services)?,
            listening_endpoint: self.endpoint(&v.listening_endpoint)?,
        })
    }

    fn inv(&self, items: &[WireInv]) -> NetworkResult<Vec<InvVector>> {
        items
            .iter()
            .map(|item| {
                let inv_type = InvType::from_code(item.inv_type)
                    .ok_or_else(|| self.err(format!("unknown inv type {}", item.inv_type)))?;
                Ok(InvVector::new(inv_type, self.hash("hash", &item.hash)?))
            })
            .collect()
    }

    fn header(&self, h: &WireHeader) -> NetworkResult<BlockHeader> {
        Ok(BlockHeader {
            previous_block_hash: self.hash("previous_block_hash", &h.previous_block_hash)?,
            merkle_root: self.hash("merkle_root", &h.merkle_root)?,
            timestamp: h.timestamp,
            difficulty: h.difficulty,
            nonce: h.nonce,
        })
    }

    fn transaction(&self, tx: &WireTransaction) -> NetworkResult<Transaction> {
        let inputs = tx
            .inputs
            .iter()
            .map(|i| {
                Ok(TxInput {
                    prev_tx_id: self.hash("prev_tx_id", &i.prev_tx_id)?,
                    output_index: i.output_index,
                    signature: self.bytes("signature", &i.signature)?,
                    pub_key: self.bytes("pub_key", &i.pub_key)?,
                    sequence: i.sequence,
                })
            })
            .collect::<NetworkResult<Vec<_>>>()?;
        let outputs = tx
            .outputs
            .iter()
            .map(|o| {
                Ok(TxOutput {
                    value: o.value,
                    pub_key_hash: self.pub_key_hash(&o.pub_key_hash)?,
                })
            })
            .collect::<NetworkResult<Vec<_>>>()?;
        Ok(Transaction {
            inputs,
            outputs,
            lock_time: tx.lock_time,
        })
    }

    fn hashes(&self, field: &str, hashes: &[String]) -> NetworkResult<Vec<Hash>> {
        hashes.iter().map(|h| self.hash(field, h)).collect()
    }
}

impl TryFrom<WireVersion> for VersionInfo {
    type Error = NetworkError;

    fn try_from(v: WireVersion) -> Result<Self, Self::Error> {
        Decode { message: "version" }.version(&v)
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = NetworkError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let d = Decode {
            message: wire.message_type().name(),
        };
        let message = match wire {
            WireMessage::Version(v) => Message::Version(d.version(&v)?),
            WireMessage::Verack(v) => Message::Verack(d.version(&v)?),
            WireMessage::Ack => Message::Ack,
            WireMessage::GetAddr => Message::GetAddr,
            WireMessage::Addr(addrs) => Message::Addr(
                addrs
                    .iter()
                    .map(|a| {
                        Ok(NetAddress {
                            endpoint: d.endpoint(&a.endpoint)?,
                            last_active: a.last_active,
                        })
                    })
                    .collect::<NetworkResult<Vec<_>>>()?,
            ),
            WireMessage::HeartbeatPing => Message::HeartbeatPing,
            WireMessage::HeartbeatPong => Message::HeartbeatPong,
            WireMessage::Inv(items) => Message::Inv(d.inv(&items)?),
            WireMessage::GetData(items) => Message::GetData(d.inv(&items)?),
            WireMessage::Block(block) => Message::Block(Block {
                header: d.header(&block.header)?,
                transactions: block
                    .transactions
                    .iter()
                    .map(|tx| d.transaction(tx))
                    .collect::<NetworkResult<Vec<_>>>()?,
            }),
            WireMessage::MerkleBlock(block) => Message::MerkleBlock(MerkleBlock {
                header: d.header(&block.header)?,
                proofs: block
                    .proofs
                    .iter()
                    .map(|p| {
                        Ok(MerkleProof {
                            transaction: d.transaction(&p.transaction)?,
                            hashes: d.hashes("proof", &p.hashes)?,
                            index: p.index,
                        })
                    })
                    .collect::<NetworkResult<Vec<_>>>()?,
            }),
            WireMessage::Tx(tx) => Message::Tx(d.transaction(&tx)?),
            WireMessage::GetHeaders(locator) => Message::GetHeaders(BlockLocator {
                hashes: d.hashes("locator", &locator.hashes)?,
                stop_hash: d.hash("stop_hash", &locator.stop_hash)?,
            }),
            WireMessage::Headers(headers) => Message::Headers(
                headers
                    .iter()
                    .map(|h| d.header(h))
                    .collect::<NetworkResult<Vec<_>>>()?,
            ),
            WireMessage::SetFilter(hashes) => Message::SetFilter(
                hashes
                    .iter()
                    .map(|h| d.pub_key_hash(h))
                    .collect::<NetworkResult<Vec<_>>>()?,
            ),
            WireMessage::Mempool => Message::Mempool,
            WireMessage::Reject(r) => {
                let reject_type = RejectType::from_code(r.error_type)
                    .ok_or_else(|| d.err(format!("unknown reject type {}", r.error_type)))?;
                Message::Reject(
                    RejectMessage::new(reject_type, r.message)
                        .with_data(d.bytes("data", &r.data)?),
                )
            }
        };
        Ok(message)
    }
}
