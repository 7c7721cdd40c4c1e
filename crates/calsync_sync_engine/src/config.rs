//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync passes and their scheduling.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Calendar synced by this engine.
    pub calendar_id: String,
    /// Maximum events pushed per pass.
    pub push_batch_size: usize,
    /// Maximum recovery entries re-fetched per pass.
    pub recovery_batch_size: usize,
    /// Quiet period after a local write before a pass starts.
    pub debounce: Duration,
    /// Period of background passes.
    pub sync_interval: Option<Duration>,
    /// Name of the lock serializing passes.
    pub lock_name: String,
    /// How long a trigger waits for the lock before deferring.
    pub lock_timeout: Duration,
    /// Request timeout, applied by [`HttpTransport::from_config`](crate::HttpTransport::from_config).
    pub timeout: Duration,
    /// How far ahead virtual occurrences are reported to the notification sink.
    pub notification_window: Duration,
    /// Passes run back to back while a backlog remains.
    pub max_followup_passes: u32,
}

impl SyncConfig {
    /// Creates a configuration for `calendar_id` with default values.
    pub fn new(calendar_id: impl Into<String>) -> Self {
        let calendar_id = calendar_id.into();
        Self {
            lock_name: format!("calsync-sync:{calendar_id}"),
            calendar_id,
            push_batch_size: 100,
            recovery_batch_size: 50,
            debounce: Duration::from_millis(300),
            sync_interval: Some(Duration::from_secs(30)),
            lock_timeout: Duration::from_millis(50),
            timeout: Duration::from_secs(30),
            notification_window: Duration::from_secs(7 * 24 * 60 * 60),
            max_followup_passes: 8,
        }
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the recovery batch size.
    pub fn with_recovery_batch_size(mut self, size: usize) -> Self {
        self.recovery_batch_size = size;
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disables background passes.
    pub fn without_sync_interval(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Sets the lock name.
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Sets the lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the notification window.
    pub fn with_notification_window(mut self, window: Duration) -> Self {
        self.notification_window = window;
        self
    }

    /// Sets the backlog pass limit.
    pub fn with_max_followup_passes(mut self, passes: u32) -> Self {
        self.max_followup_passes = passes;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
