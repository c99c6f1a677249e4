//! Network error types.

use crate::types::PeerId;
use std::net::SocketAddr;
use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A message field violated its constraint.
    #[error("Malformed {message} message: {reason}")]
    Malformed {
        message: &'static str,
        reason: String,
    },

    /// A message arrived in a state that forbids it.
    #[error("Out of sequence: {message} received in state {state}")]
    OutOfSequence {
        message: &'static str,
        state: &'static str,
    },

    /// A forbidden peer state transition was requested.
    #[error("Invalid state transition for peer {peer}: {from} -> {to}")]
    InvalidTransition {
        peer: PeerId,
        from: &'static str,
        to: &'static str,
    },

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Listening endpoint already owned by another peer.
    #[error("Endpoint {endpoint} already owned by peer {owner}")]
    EndpointConflict { endpoint: SocketAddr, owner: PeerId },

    /// Outbound connection handle set twice for the same peer.
    #[error("Connection already set for peer {0}")]
    ConnectionAlreadySet(PeerId),

    /// Peer has no endpoint we can dial.
    #[error("No endpoint known for peer {0}")]
    NoEndpoint(PeerId),

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Network magic mismatch.
    #[error("Network magic mismatch")]
    MagicMismatch,

    /// Frame checksum mismatch.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NetworkError {
    /// Shorthand for a malformed-message error.
    pub fn malformed(message: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            message,
            reason: reason.into(),
        }
    }

    /// The reject type a peer should receive for this error, if any.
    pub fn reject_type(&self) -> Option<RejectType> {
        match self {
            NetworkError::Malformed { .. } => Some(RejectType::Malformed),
            NetworkError::OutOfSequence { .. } | NetworkError::InvalidTransition { .. } => {
                Some(RejectType::OutOfSequence)
            }
            NetworkError::EndpointConflict { .. } => Some(RejectType::Duplicate),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(e: serde_json::Error) -> Self {
        NetworkError::Serialization(e.to_string())
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Error type carried by a `Reject` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RejectType {
    /// A field failed its constraint.
    Malformed = 1,
    /// The message is not allowed in the peer's current state.
    OutOfSequence = 2,
    /// The message duplicates an existing connection or object.
    Duplicate = 3,
    /// Rejected by a higher layer (validation, policy).
    Invalid = 4,
    /// Internal failure on the rejecting side.
    Internal = 5,
}

impl RejectType {
    /// Numeric wire code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(RejectType::Malformed),
            2 => Some(RejectType::OutOfSequence),
            3 => Some(RejectType::Duplicate),
            4 => Some(RejectType::Invalid),
            5 => Some(RejectType::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for RejectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RejectType::Malformed => "malformed",
            RejectType::OutOfSequence => "out_of_sequence",
            RejectType::Duplicate => "duplicate",
            RejectType::Invalid => "invalid",
            RejectType::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_type_codes() {
        for ty in [
            RejectType::Malformed,
            RejectType::OutOfSequence,
            RejectType::Duplicate,
            RejectType::Invalid,
            RejectType::Internal,
        ] {
            assert_eq!(RejectType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(RejectType::from_code(0), None);
    }

    #[test]
    fn test_error_reject_mapping() {
        let err = NetworkError::malformed("inv", "hash must be 32 bytes");
        assert_eq!(err.reject_type(), Some(RejectType::Malformed));

        let err = NetworkError::OutOfSequence {
            message: "version",
            state: "connected",
        };
        assert_eq!(err.reject_type(), Some(RejectType::OutOfSequence));

        assert_eq!(NetworkError::ConnectionClosed.reject_type(), None);
    }
}
