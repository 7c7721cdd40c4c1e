//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal frame failed validation.
    #[error("corrupt frame at offset {offset}: {reason}")]
    CorruptFrame {
        /// Byte offset of the frame header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The backend has been closed.
    #[error("storage is closed")]
    Closed,

    /// Sealing or opening a payload failed.
    #[error("sealing error: {0}")]
    Sealing(String),
}

impl StorageError {
    /// Creates a corrupt frame error.
    pub fn corrupt_frame(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptFrame {
            offset,
            reason: reason.into(),
        }
    }
}
