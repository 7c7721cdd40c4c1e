//! Observable sync status.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Coarse state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// The last pass completed.
    #[default]
    Synced,
    /// A user-visible pass is running, or the replica is re-syncing.
    Syncing,
    /// The server could not be reached.
    Offline,
    /// The last pass failed unexpectedly.
    Error,
}

/// A user-visible notice raised by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNotice {
    /// The server rejected local changes; they are being re-fetched.
    Resyncing,
    /// Some events could not be recovered after repeated attempts.
    RecoveryExhausted,
}

/// Snapshot of the status container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    /// Current status.
    pub status: SyncStatus,
    /// Last notice, until cleared.
    pub notice: Option<SyncNotice>,
    /// Last error message.
    pub last_error: Option<String>,
    /// When the last successful pass finished.
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Shared, observable sync status.
///
/// Cloning yields another handle to the same container.
#[derive(Debug, Clone)]
pub struct SyncStatusHandle {
    sender: Arc<watch::Sender<StatusSnapshot>>,
}

impl SyncStatusHandle {
    /// Creates a container in the `Synced` state.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StatusSnapshot::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.sender.borrow().clone()
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.sender.borrow().status
    }

    /// Sets the status.
    pub fn set_status(&self, status: SyncStatus) {
        self.sender.send_if_modified(|snapshot| {
            let changed = snapshot.status != status;
            snapshot.status = status;
            changed
        });
    }

    /// Records a successful pass.
    pub fn mark_synced(&self, at: DateTime<Utc>) {
        self.sender.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Synced;
            snapshot.last_error = None;
            snapshot.last_synced_at = Some(at);
        });
    }

    /// Sets `Error` with a message.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.sender.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Error;
            snapshot.last_error = Some(message);
        });
    }

    /// Sets `Offline` with a message.
    pub fn set_offline(&self, message: impl Into<String>) {
        let message = message.into();
        self.sender.send_modify(|snapshot| {
            snapshot.status = SyncStatus::Offline;
            snapshot.last_error = Some(message);
        });
    }

    /// Raises a notice.
    pub fn raise_notice(&self, notice: SyncNotice) {
        self.sender.send_modify(|snapshot| snapshot.notice = Some(notice));
    }

    /// Clears the current notice.
    pub fn clear_notice(&self) {
        self.sender.send_if_modified(|snapshot| snapshot.notice.take().is_some());
    }

    /// Subscribes to changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }
}

impl Default for SyncStatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let status = SyncStatusHandle::new();
        let other = status.clone();
        other.set_status(SyncStatus::Syncing);
        assert_eq!(status.status(), SyncStatus::Syncing);
    }

    #[test]
    fn error_and_recovery() {
        let status = SyncStatusHandle::new();
        status.set_error("store closed");
        let snapshot = status.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("store closed"));

        let now = Utc::now();
        status.mark_synced(now);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Synced);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.last_synced_at, Some(now));
    }

    #[test]
    fn notices() {
        let status = SyncStatusHandle::new();
        status.raise_notice(SyncNotice::Resyncing);
        assert_eq!(status.snapshot().notice, Some(SyncNotice::Resyncing));
        status.clear_notice();
        assert_eq!(status.snapshot().notice, None);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let status = SyncStatusHandle::new();
        let mut rx = status.subscribe();
        status.set_offline("connection refused");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, SyncStatus::Offline);
    }
}
