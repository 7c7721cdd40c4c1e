//! Change feed for observing committed store writes.
//!
//! Every committed transaction emits one [`StoreChange`] per written record,
//! after the write is journaled and visible to readers. The sync scheduler
//! subscribes to it and debounces [`ChangeOrigin::Local`] changes into sync
//! passes; writes made by a sync pass are tagged [`ChangeOrigin::Sync`] so
//! they do not schedule another pass.
//!
//! ```rust
//! use calsync_core::{ChangeOrigin, Event, EventStore};
//! use chrono::{Duration, Utc};
//!
//! let store = EventStore::open_in_memory().unwrap();
//! let changes = store.subscribe().unwrap();
//!
//! let start = Utc::now();
//! store.put(Event::new("standup", start, start + Duration::minutes(15))).unwrap();
//!
//! let change = changes.try_recv().unwrap();
//! assert_eq!(change.origin, ChangeOrigin::Local);
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

/// Logical table of the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `events`, keyed by event id.
    Events,
    /// `drafts`, keyed by event id.
    Drafts,
    /// `recovery_queue`, keyed by event id.
    RecoveryQueue,
    /// `error_log`, keyed by error id.
    ErrorLog,
    /// The `calendar_metadata` singleton.
    CalendarMetadata,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Events => "events",
            Table::Drafts => "drafts",
            Table::RecoveryQueue => "recovery_queue",
            Table::ErrorLog => "error_log",
            Table::CalendarMetadata => "calendar_metadata",
        };
        f.write_str(name)
    }
}

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Record inserted or replaced.
    Put,
    /// Record physically removed.
    Delete,
}

/// Who made a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeOrigin {
    /// The local user, through the store API.
    #[default]
    Local,
    /// A sync pass applying server state or bookkeeping.
    Sync,
}

/// A single committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Commit sequence number.
    pub sequence: u64,
    /// Table written.
    pub table: Table,
    /// Record key (event id, error id, or `"calendar"` for the singleton).
    pub key: String,
    /// Kind of write.
    pub kind: ChangeKind,
    /// Who made the write.
    pub origin: ChangeOrigin,
}

/// Distributes committed writes to subscribers.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StoreChange>>>,
    history: RwLock<Vec<StoreChange>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed keeping the default amount of history.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a feed keeping at most `max_history` changes for polling.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to all future changes.
    pub fn subscribe(&self) -> Receiver<StoreChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits the changes of one commit, in order.
    pub fn emit_batch(&self, changes: Vec<StoreChange>) {
        if changes.is_empty() {
            return;
        }
        {
            let mut history = self.history.write();
            history.extend(changes.iter().cloned());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| changes.iter().all(|change| tx.send(change.clone()).is_ok()));
    }

    /// Returns retained changes with a sequence above `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StoreChange> {
        self.history
            .read()
            .iter()
            .filter(|change| change.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("max_history", &self.max_history)
            .finish()
    }
}
