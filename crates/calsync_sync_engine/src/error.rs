//! Error types for the sync engine.

use calsync_core::{CoreError, EventId};
use calsync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// How a failure is handled by a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server could not be reached. The batch is queued for recovery and
    /// kept locally.
    TransientNetwork,
    /// The server refused the batch. It is queued for recovery and purged
    /// locally.
    ServerRejection,
    /// One event cannot be prepared. Only that event is isolated.
    PoisonEvent,
    /// The store was closed. The pass stops.
    StoreClosed,
    /// Anything else. The pass stops.
    Fatal,
}

/// Errors that can occur during sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server rejected the request (sync conflict or bad request).
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// Malformed message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Event encryption or decryption failed.
    #[error("crypto failed for event {event}: {message}")]
    Crypto {
        /// Event being processed.
        event: EventId,
        /// Error message.
        message: String,
    },

    /// An attendee's key could not be resolved.
    #[error("cannot resolve attendee {email} of event {event}")]
    UnresolvedAttendee {
        /// Event being processed.
        event: EventId,
        /// Attendee address.
        email: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// The replica has not been initialized for a calendar.
    #[error("calendar metadata missing")]
    MissingMetadata,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a crypto error for one event.
    pub fn crypto(event: EventId, message: impl Into<String>) -> Self {
        Self::Crypto {
            event,
            message: message.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport {
                retryable: true, ..
            }
            | SyncError::Timeout => ErrorKind::TransientNetwork,
            SyncError::Rejected(_) => ErrorKind::ServerRejection,
            SyncError::Crypto { .. } | SyncError::UnresolvedAttendee { .. } => {
                ErrorKind::PoisonEvent
            }
            SyncError::Store(CoreError::StoreClosed) => ErrorKind::StoreClosed,
            SyncError::Transport {
                retryable: false, ..
            }
            | SyncError::Protocol(_)
            | SyncError::Store(_)
            | SyncError::MissingMetadata => ErrorKind::Fatal,
        }
    }

    /// Returns true if the operation can be retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            SyncError::transport_retryable("connection reset").kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(SyncError::Timeout.kind(), ErrorKind::TransientNetwork);
        assert_eq!(
            SyncError::Rejected("sync conflict".into()).kind(),
            ErrorKind::ServerRejection
        );
        assert_eq!(
            SyncError::crypto(EventId::new(), "bad key").kind(),
            ErrorKind::PoisonEvent
        );
        assert_eq!(
            SyncError::from(CoreError::StoreClosed).kind(),
            ErrorKind::StoreClosed
        );
        assert_eq!(SyncError::MissingMetadata.kind(), ErrorKind::Fatal);
        assert_eq!(
            SyncError::transport_fatal("unauthorized").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(!SyncError::Rejected("400".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Timeout.to_string(), "operation timed out");
        let id = EventId::new();
        let err = SyncError::UnresolvedAttendee {
            event: id,
            email: "x@example.com".into(),
        };
        assert!(err.to_string().contains("x@example.com"));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
