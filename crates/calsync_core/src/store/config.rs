//! Event store configuration.

use calsync_storage::SealingKey;

/// Configuration for opening an [`EventStore`](super::EventStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// Seals journal frames with AES-256-GCM when set.
    pub sealing_key: Option<SealingKey>,

    /// Number of changes the change feed keeps for polling.
    pub feed_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            sealing_key: None,
            feed_history: 1024,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Seals the replica at rest with `key`.
    #[must_use]
    pub fn sealing_key(mut self, key: SealingKey) -> Self {
        self.sealing_key = Some(key);
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub fn feed_history(mut self, changes: usize) -> Self {
        self.feed_history = changes;
        self
    }
}
