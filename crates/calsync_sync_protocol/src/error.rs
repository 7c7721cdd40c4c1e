//! Error types for the sync protocol.

use crate::MessageKind;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid message.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u16,
        /// Version this build speaks.
        supported: u16,
    },

    /// The envelope carries a different message than expected.
    #[error("unexpected message: expected {expected:?}, found {found:?}")]
    UnexpectedMessage {
        /// Kind the caller asked for.
        expected: MessageKind,
        /// Kind found in the envelope.
        found: MessageKind,
    },
}

impl ProtocolError {
    /// Creates an encode error.
    pub fn encode(message: impl std::fmt::Display) -> Self {
        Self::Encode(message.to_string())
    }

    /// Creates a decode error.
    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }
}
