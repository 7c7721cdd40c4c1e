//! Bounded-retry queue of events to re-fetch from the server.
//!
//! Entries are retried least-tried first. Once an entry reaches [`MAX_TRY`]
//! failed attempts it is no longer handed out by [`get`], but it stays in the
//! table (see [`exhausted`]) until [`remove`]d.
//!
//! The free functions work inside a caller's transaction, so the sync
//! pipeline can queue events atomically with its other writes.
//! [`RecoveryQueue`] wraps them in one transaction per call.

use crate::change_feed::ChangeOrigin;
use crate::error::CoreResult;
use crate::model::{EventId, EventToRecover, MAX_TRY};
use crate::store::{EventStore, StoreTransaction};
use chrono::Utc;

/// Queues `id` for recovery. Returns false if it was already queued.
pub fn add(txn: &mut StoreTransaction<'_>, id: EventId) -> bool {
    if txn.recovery_entry(id).is_some() {
        return false;
    }
    txn.put_recovery(EventToRecover::new(id, Utc::now()));
    true
}

/// Returns up to `limit` retryable entries, least-tried first, then oldest.
#[must_use]
pub fn get(txn: &StoreTransaction<'_>, limit: usize) -> Vec<EventToRecover> {
    let mut entries: Vec<EventToRecover> = txn
        .recovery_entries()
        .filter(|entry| entry.try_count < MAX_TRY)
        .cloned()
        .collect();
    entries.sort_by_key(|e| (e.try_count, e.created_at, e.parent_event_id));
    entries.truncate(limit);
    entries
}

/// Records one more failed attempt for each queued id.
pub fn increase_try_count(txn: &mut StoreTransaction<'_>, ids: &[EventId]) {
    for id in ids {
        if let Some(entry) = txn.recovery_entry(*id) {
            let mut entry = entry.clone();
            entry.try_count = entry.try_count.saturating_add(1);
            if entry.try_count == MAX_TRY {
                tracing::warn!(event = %id, "recovery attempts exhausted");
            }
            txn.put_recovery(entry);
        }
    }
}

/// Removes recovered ids from the queue.
pub fn remove(txn: &mut StoreTransaction<'_>, ids: &[EventId]) {
    for id in ids {
        txn.delete_recovery(*id);
    }
}

/// Returns every entry, exhausted ones included.
#[must_use]
pub fn all(txn: &StoreTransaction<'_>) -> Vec<EventToRecover> {
    let mut entries: Vec<EventToRecover> = txn.recovery_entries().cloned().collect();
    entries.sort_by_key(|e| (e.created_at, e.parent_event_id));
    entries
}

/// Returns the entries that are no longer retried.
#[must_use]
pub fn exhausted(txn: &StoreTransaction<'_>) -> Vec<EventToRecover> {
    all(txn)
        .into_iter()
        .filter(EventToRecover::is_exhausted)
        .collect()
}

/// Recovery queue of one replica, one transaction per call.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryQueue<'s> {
    store: &'s EventStore,
}

impl<'s> RecoveryQueue<'s> {
    pub(crate) fn new(store: &'s EventStore) -> Self {
        Self { store }
    }

    /// Returns up to `limit` retryable entries.
    pub fn get(&self, limit: usize) -> CoreResult<Vec<EventToRecover>> {
        self.store.read(|txn| get(txn, limit))
    }

    /// Queues `id`; a no-op if already queued.
    pub fn add(&self, id: EventId) -> CoreResult<bool> {
        self.store
            .transaction_with_origin(ChangeOrigin::Sync, |txn| Ok(add(txn, id)))
    }

    /// Records one more failed attempt for each id.
    pub fn increase_try_count(&self, ids: &[EventId]) -> CoreResult<()> {
        self.store.transaction_with_origin(ChangeOrigin::Sync, |txn| {
            increase_try_count(txn, ids);
            Ok(())
        })
    }

    /// Removes recovered ids.
    pub fn remove(&self, ids: &[EventId]) -> CoreResult<()> {
        self.store.transaction_with_origin(ChangeOrigin::Sync, |txn| {
            remove(txn, ids);
            Ok(())
        })
    }

    /// Returns every entry.
    pub fn all(&self) -> CoreResult<Vec<EventToRecover>> {
        self.store.read(|txn| all(txn))
    }

    /// Returns the entries that are no longer retried.
    pub fn exhausted(&self) -> CoreResult<Vec<EventToRecover>> {
        self.store.read(|txn| exhausted(txn))
    }
}
