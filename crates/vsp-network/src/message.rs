//! P2P protocol messages.

use crate::error::RejectType;
use crate::types::{
    Block, BlockHeader, BlockLocator, InvVector, MerkleBlock, NetAddress, PubKeyHash,
    Transaction, VersionInfo,
};
use std::fmt;

/// Message kinds, used for logging and for naming rejected messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Version,
    Verack,
    Ack,
    GetAddr,
    Addr,
    HeartbeatPing,
    HeartbeatPong,
    Inv,
    GetData,
    Block,
    MerkleBlock,
    Tx,
    GetHeaders,
    Headers,
    SetFilter,
    Mempool,
    Reject,
}

impl MessageType {
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::Verack => "verack",
            MessageType::Ack => "ack",
            MessageType::GetAddr => "getaddr",
            MessageType::Addr => "addr",
            MessageType::HeartbeatPing => "heartbeat_ping",
            MessageType::HeartbeatPong => "heartbeat_pong",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::MerkleBlock => "merkleblock",
            MessageType::Tx => "tx",
            MessageType::GetHeaders => "getheaders",
            MessageType::Headers => "headers",
            MessageType::SetFilter => "setfilter",
            MessageType::Mempool => "mempool",
            MessageType::Reject => "reject",
        }
    }

    /// Version, Verack and Ack are the only messages allowed before `connected`.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageType::Version | MessageType::Verack | MessageType::Ack
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejection notice sent back to a misbehaving or mistaken peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectMessage {
    pub reject_type: RejectType,
    pub message: String,
    pub data: Vec<u8>,
}

impl RejectMessage {
    pub fn new(reject_type: RejectType, message: impl Into<String>) -> Self {
        Self {
            reject_type,
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// A decoded peer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionInfo),
    Verack(VersionInfo),
    Ack,
    GetAddr,
    Addr(Vec<NetAddress>),
    HeartbeatPing,
    HeartbeatPong,
    Inv(Vec<InvVector>),
    GetData(Vec<InvVector>),
    Block(Block),
    MerkleBlock(MerkleBlock),
    Tx(Transaction),
    GetHeaders(BlockLocator),
    Headers(Vec<BlockHeader>),
    SetFilter(Vec<PubKeyHash>),
    Mempool,
    Reject(RejectMessage),
}

impl Message {
    /// Get message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version(_) => MessageType::Version,
            Message::Verack(_) => MessageType::Verack,
            Message::Ack => MessageType::Ack,
            Message::GetAddr => MessageType::GetAddr,
            Message::Addr(_) => MessageType::Addr,
            Message::HeartbeatPing => MessageType::HeartbeatPing,
            Message::HeartbeatPong => MessageType::HeartbeatPong,
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::Block(_) => MessageType::Block,
            Message::MerkleBlock(_) => MessageType::MerkleBlock,
            Message::Tx(_) => MessageType::Tx,
            Message::GetHeaders(_) => MessageType::GetHeaders,
            Message::Headers(_) => MessageType::Headers,
            Message::SetFilter(_) => MessageType::SetFilter,
            Message::Mempool => MessageType::Mempool,
            Message::Reject(_) => MessageType::Reject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_classification() {
        assert!(Message::Ack.message_type().is_handshake());
        assert!(!Message::GetAddr.message_type().is_handshake());
        assert!(!Message::HeartbeatPing.message_type().is_handshake());
    }

    #[test]
    fn test_reject_builder() {
        let reject = RejectMessage::new(RejectType::Malformed, "inv").with_data(vec![1, 2]);
        assert_eq!(reject.message, "inv");
        assert_eq!(reject.data, vec![1, 2]);
        assert_eq!(Message::Reject(reject).message_type().name(), "reject");
    }
}
