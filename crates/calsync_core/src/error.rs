//! Error types for calsync core.

use crate::model::EventId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The event store has been closed; nothing can be read or written.
    #[error("event store is closed")]
    StoreClosed,

    /// Journal backend error.
    #[error("storage error: {0}")]
    Storage(#[from] calsync_storage::StorageError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal contents are not a valid replica.
    #[error("journal corrupted: {message}")]
    CorruptJournal {
        /// Description of the problem.
        message: String,
    },

    /// No event with this id exists.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// No draft with this id exists.
    #[error("draft not found: {0}")]
    DraftNotFound(EventId),

    /// The replica has no calendar metadata yet.
    #[error("calendar metadata missing")]
    MissingMetadata,

    /// A recurrence rule could not be evaluated.
    #[error("invalid recurrence rule: {message}")]
    InvalidRule {
        /// Why the rule was rejected.
        message: String,
    },

    /// Operation not permitted for this record.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }

    /// Creates a corrupt journal error.
    pub fn corrupt_journal(message: impl Into<String>) -> Self {
        Self::CorruptJournal {
            message: message.into(),
        }
    }

    /// Creates an invalid rule error.
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the store was closed underneath the caller.
    #[must_use]
    pub fn is_store_closed(&self) -> bool {
        matches!(self, Self::StoreClosed)
    }
}
