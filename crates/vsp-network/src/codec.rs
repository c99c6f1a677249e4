//! Frame codec shared by the peer transport and the admin RPC.
//!
//! ```text
//! +----------+----------+----------+
//! |  Magic   |  Length  | Checksum |
//! | 4 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+
//! |        JSON payload            |
//! |       (Length bytes)           |
//! +--------------------------------+
//! ```
//!
//! - Magic: network identifier
//! - Length: payload length in bytes (big-endian)
//! - Checksum: first 4 bytes of SHA256(SHA256(payload))

use crate::types::Hash;
use crate::wire::WireMessage;
use crate::{NetworkError, MAINNET_MAGIC, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::net::SocketAddr;
use tokio_util::codec::{Decoder, Encoder};

/// Header size: magic (4) + length (4) + checksum (4) = 12 bytes
const HEADER_SIZE: usize = 12;

/// A peer message plus the per-call metadata the transport carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Listening endpoint the sender advertises.
    pub sender: Option<SocketAddr>,
    pub message: WireMessage,
}

/// Length-prefixed, checksummed JSON frames.
///
/// Decodes `D`; encodes anything serializable.
pub struct FrameCodec<D> {
    magic: [u8; 4],
    max_size: usize,
    _item: PhantomData<fn() -> D>,
}

/// Codec for peer-to-peer traffic.
pub type MessageCodec = FrameCodec<Envelope>;

impl<D> FrameCodec<D> {
    /// Create a new codec with mainnet magic.
    pub fn new() -> Self {
        Self::with_magic(MAINNET_MAGIC)
    }

    /// Create a codec with custom magic bytes.
    pub fn with_magic(magic: [u8; 4]) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
            _item: PhantomData,
        }
    }

    /// Calculate checksum for payload.
    fn checksum(payload: &[u8]) -> [u8; 4] {
        let hash = Hash::double_sha256(payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash.0[0..4]);
        checksum
    }
}

impl<D> Default for FrameCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned> Decoder for FrameCodec<D> {
    type Item = D;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[0..4] != self.magic {
            return Err(NetworkError::MagicMismatch);
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        let checksum: [u8; 4] = [src[8], src[9], src[10], src[11]];

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        if Self::checksum(&payload) != checksum {
            return Err(NetworkError::ChecksumMismatch);
        }

        serde_json::from_slice(&payload).map(Some).map_err(Into::into)
    }
}

impl<D, E: Serialize> Encoder<E> for FrameCodec<D> {
    type Error = NetworkError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        let length = payload.len();

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let checksum = Self::checksum(&payload);

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&self.magic);
        dst.put_u32(length as u32);
        dst.put_slice(&checksum);
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TESTNET_MAGIC;

    fn envelope() -> Envelope {
        Envelope {
            sender: Some("10.0.0.1:50051".parse().unwrap()),
            message: WireMessage::GetAddr,
        }
    }

    #[test]
    fn test_checksum() {
        let checksum = MessageCodec::checksum(b"hello world");
        assert_eq!(checksum, MessageCodec::checksum(b"hello world"));
        assert_ne!(checksum, MessageCodec::checksum(b"hello world!"));
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.sender, envelope().sender);
        assert!(matches!(decoded.message, WireMessage::GetAddr));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_magic_mismatch() {
        let mut buf = BytesMut::new();
        MessageCodec::with_magic(TESTNET_MAGIC)
            .encode(envelope(), &mut buf)
            .unwrap();

        let err = MessageCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, NetworkError::MagicMismatch));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(), &mut buf).unwrap();
        let last = buf.len() - 2;
        buf[last] ^= 0xff;

        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            NetworkError::ChecksumMismatch
        ));
    }

    #[test]
    fn test_oversized_frame_refused() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAINNET_MAGIC);
        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);
        buf.put_slice(&[0u8; 4]);

        assert!(matches!(
            MessageCodec::new().decode(&mut buf).unwrap_err(),
            NetworkError::MessageTooLarge { .. }
        ));
    }
}
