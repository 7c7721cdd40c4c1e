//! The event store: tables, transactions and the commit journal.
//!
//! All replica state lives in five logical tables (`events`, `drafts`,
//! `recovery_queue`, `error_log` and the `calendar_metadata` singleton).
//! Every write goes through [`EventStore::transaction`], which holds the write
//! lock for the closure, buffers writes in a [`StoreTransaction`], and on `Ok`
//! journals them as one frame, applies them, and publishes them on the change
//! feed. On `Err` nothing is written.

mod config;
mod journal;
mod tables;
mod transaction;

pub use config::StoreConfig;
pub use transaction::StoreTransaction;

use crate::change_feed::{ChangeFeed, ChangeOrigin, StoreChange};
use crate::error::{CoreError, CoreResult};
use crate::error_log::ErrorLog;
use crate::model::{
    CalendarMetadata, Draft, EmailNotification, Event, EventField, EventId, EventPatch,
    SyncState,
};
use crate::recovery::RecoveryQueue;
use crate::recurrence::{Materializer, ReconcileKind, Reconciliation, RecurrenceRule, SeriesAnchor};
use calsync_storage::{FileBackend, InMemoryBackend, Sealer, StorageBackend};
use chrono::{DateTime, Utc};
use journal::Journal;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::mpsc::Receiver;
use tables::Tables;

struct StoreState {
    tables: Tables,
    sequence: u64,
}

/// Counters describing a replica, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored events, tombstones included.
    pub events: usize,
    /// Soft-deleted events.
    pub deleted_events: usize,
    /// Events not yet acknowledged by the server.
    pub unsynced_events: usize,
    /// Saved drafts.
    pub drafts: usize,
    /// Recovery queue entries, exhausted ones included.
    pub recovery_entries: usize,
    /// Recovery entries that are no longer retried.
    pub exhausted_entries: usize,
    /// Error log records.
    pub error_records: usize,
    /// Last commit sequence.
    pub sequence: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// Local replica of one calendar.
pub struct EventStore {
    state: RwLock<StoreState>,
    journal: Journal,
    feed: ChangeFeed,
    materializer: Materializer,
    is_open: RwLock<bool>,
}

impl EventStore {
    /// Opens a store over `backend`, replaying its journal.
    pub fn open(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let sealer = config.sealing_key.as_ref().map(Sealer::new);
        let journal = Journal::new(backend, sealer, config.sync_on_commit);
        let replayed = journal.replay()?;
        tracing::debug!(
            records = replayed.records,
            sequence = replayed.sequence,
            events = replayed.tables.events.len(),
            torn_tail = replayed.torn_tail,
            "event store opened"
        );
        Ok(Self {
            state: RwLock::new(StoreState {
                tables: replayed.tables,
                sequence: replayed.sequence,
            }),
            journal,
            feed: ChangeFeed::with_max_history(config.feed_history),
            materializer: Materializer::default(),
            is_open: RwLock::new(true),
        })
    }

    /// Opens a file-backed store, creating the file and parent directories.
    pub fn open_path(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), config)
    }

    /// Opens an empty, non-persistent store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Replaces the materializer used for rule changes.
    #[must_use]
    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = materializer;
        self
    }

    /// Returns the materializer.
    #[must_use]
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Closes the store. Every later call fails with [`CoreError::StoreClosed`].
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        // Wait for an in-flight transaction before flushing.
        let _state = self.state.write();
        self.journal.flush()?;
        *is_open = false;
        tracing::debug!("event store closed");
        Ok(())
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::StoreClosed)
        }
    }

    /// Runs `f` as a local transaction.
    pub fn transaction<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> CoreResult<R>,
    {
        self.transaction_with_origin(ChangeOrigin::Local, f)
    }

    /// Runs `f` as a transaction whose changes are tagged with `origin`.
    pub fn transaction_with_origin<F, R>(&self, origin: ChangeOrigin, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> CoreResult<R>,
    {
        let is_open = self.is_open.read();
        if !*is_open {
            return Err(CoreError::StoreClosed);
        }
        let mut state = self.state.write();

        let (result, mutations) = {
            let mut txn = StoreTransaction::new(&state.tables);
            let result = f(&mut txn)?;
            (result, txn.into_mutations())
        };
        if mutations.is_empty() {
            return Ok(result);
        }

        let sequence = state.sequence + 1;
        self.journal.append_commit(sequence, &mutations)?;

        let changes: Vec<StoreChange> = mutations
            .iter()
            .map(|mutation| mutation.change(sequence, origin))
            .collect();
        state.sequence = sequence;
        for mutation in mutations {
            state.tables.apply(mutation);
        }
        drop(state);
        drop(is_open);

        tracing::trace!(sequence, writes = changes.len(), ?origin, "transaction committed");
        self.feed.emit_batch(changes);
        Ok(result)
    }

    /// Runs `f` against a consistent read-only view.
    pub fn read<F, R>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&StoreTransaction<'_>) -> R,
    {
        let is_open = self.is_open.read();
        if !*is_open {
            return Err(CoreError::StoreClosed);
        }
        let state = self.state.read();
        let view = StoreTransaction::new(&state.tables);
        Ok(f(&view))
    }

    // events

    /// Returns an event by id.
    pub fn get(&self, id: EventId) -> CoreResult<Option<Event>> {
        self.read(|txn| txn.event(id).cloned())
    }

    /// Inserts or replaces an event wholesale.
    pub fn put(&self, event: Event) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.put_event(event);
            Ok(())
        })
    }

    /// Applies a local edit and returns the updated event.
    ///
    /// The changed fields are stamped for merging and the event is marked
    /// unsynced. `sequence` advances only if the local user organizes the
    /// event and its start or end moved.
    pub fn update(&self, id: EventId, patch: EventPatch) -> CoreResult<Event> {
        self.transaction(|txn| {
            let mut event = txn
                .event(id)
                .cloned()
                .ok_or(CoreError::EventNotFound(id))?;
            let changed = patch.apply(&mut event);
            if changed.is_empty() {
                return Ok(event);
            }
            let owner = txn.metadata().and_then(|m| m.owner_address.clone());
            stamp_local_edit(&mut event, &changed, owner.as_deref(), true);
            txn.put_event(event.clone());
            Ok(event)
        })
    }

    /// Soft-deletes an event as a local edit.
    pub fn delete(&self, id: EventId) -> CoreResult<Event> {
        self.update(id, EventPatch::new().deleted(true))
    }

    /// Physically removes an event. Returns true if it existed.
    pub fn purge(&self, id: EventId) -> CoreResult<bool> {
        self.transaction(|txn| Ok(txn.purge_event(id)))
    }

    /// Non-deleted events overlapping `[from, to)`.
    pub fn range_query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> CoreResult<Vec<Event>> {
        self.read(|txn| txn.range_query(from, to))
    }

    /// Non-deleted series parents.
    pub fn query_recurring_parents(&self) -> CoreResult<Vec<Event>> {
        self.read(|txn| txn.recurring_parents())
    }

    /// Every persisted child of a series.
    pub fn children_of(&self, parent: EventId) -> CoreResult<Vec<Event>> {
        self.read(|txn| txn.children_of(parent))
    }

    /// Finds a child by series identity.
    pub fn find_child(
        &self,
        parent: EventId,
        recurrence_date: DateTime<Utc>,
    ) -> CoreResult<Option<Event>> {
        self.read(|txn| txn.find_child(parent, recurrence_date).cloned())
    }

    /// Up to `limit` unsynced events, least recently updated first.
    pub fn unsynced_events(&self, limit: usize) -> CoreResult<Vec<Event>> {
        self.read(|txn| txn.unsynced_events(limit))
    }

    /// Every event, tombstones included.
    pub fn all_events(&self) -> CoreResult<Vec<Event>> {
        self.read(|txn| txn.events().cloned().collect())
    }

    /// Changes the recurrence of a series as a local edit.
    ///
    /// Persisted children are reconciled in the same transaction; the
    /// returned [`Reconciliation`] says whether the series kept its id.
    pub fn change_recurrence(
        &self,
        id: EventId,
        rule: Option<RecurrenceRule>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Reconciliation> {
        if let Some(rule) = &rule {
            rule.validate()?;
        }
        self.transaction(|txn| {
            let stored = txn
                .event(id)
                .cloned()
                .ok_or(CoreError::EventNotFound(id))?;
            if stored.plain.parent_recurrence_id.is_some() {
                return Err(CoreError::invalid_operation(
                    "recurrence can only change on a series parent",
                ));
            }
            let mut edited = stored.clone();
            let mut changed = Vec::new();
            if edited.plain.recurrence_rule != rule {
                edited.plain.recurrence_rule = rule.clone();
                changed.push(EventField::RecurrenceRule);
            }
            if edited.plain.start_date != start {
                edited.plain.start_date = start;
                changed.push(EventField::StartDate);
            }
            if edited.plain.end_date != end {
                edited.plain.end_date = end;
                changed.push(EventField::EndDate);
            }
            let owner = txn.metadata().and_then(|m| m.owner_address.clone());
            stamp_local_edit(&mut edited, &changed, owner.as_deref(), true);
            apply_series_edit(&self.materializer, txn, &stored, edited)
        })
    }

    // drafts

    /// Saves a draft, replacing any previous draft of the same event.
    pub fn save_draft(&self, draft: Draft) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.put_draft(draft);
            Ok(())
        })
    }

    /// Returns the draft of an event.
    pub fn draft(&self, id: EventId) -> CoreResult<Option<Draft>> {
        self.read(|txn| txn.draft(id).cloned())
    }

    /// Applies a draft to its event and removes the draft.
    ///
    /// Only the dirty field groups are taken from the draft. A changed rule
    /// or start on a series parent reconciles its children in the same
    /// transaction.
    pub fn commit_draft(&self, id: EventId) -> CoreResult<Event> {
        self.transaction(|txn| {
            let draft = txn
                .draft(id)
                .cloned()
                .ok_or(CoreError::DraftNotFound(id))?;
            let stored = txn.event(id).cloned();
            let (mut merged, changed) = draft.overlay(stored.as_ref());
            let owner = txn.metadata().and_then(|m| m.owner_address.clone());
            stamp_local_edit(&mut merged, &changed, owner.as_deref(), stored.is_some());
            merged.local.update_types.extend(&draft.dirty);
            txn.delete_draft(id);

            match stored {
                Some(stored) => {
                    let reconciled = apply_series_edit(&self.materializer, txn, &stored, merged)?;
                    reconciled
                        .added
                        .iter()
                        .find(|e| !e.is_recurring_child())
                        .cloned()
                        .or_else(|| txn.event(id).cloned())
                        .ok_or(CoreError::EventNotFound(id))
                }
                None => {
                    txn.put_event(merged.clone());
                    Ok(merged)
                }
            }
        })
    }

    /// Drops a draft without applying it. Returns true if it existed.
    pub fn discard_draft(&self, id: EventId) -> CoreResult<bool> {
        self.transaction(|txn| Ok(txn.delete_draft(id)))
    }

    // metadata

    /// Returns the calendar metadata.
    pub fn metadata(&self) -> CoreResult<Option<CalendarMetadata>> {
        self.read(|txn| txn.metadata().cloned())
    }

    /// Stores the calendar metadata.
    pub fn set_metadata(&self, metadata: CalendarMetadata) -> CoreResult<()> {
        self.transaction_with_origin(ChangeOrigin::Sync, |txn| {
            txn.put_metadata(metadata);
            Ok(())
        })
    }

    /// Advances the checkpoint. Older checkpoints are ignored.
    ///
    /// Returns true if the stored checkpoint moved.
    pub fn set_checkpoint(&self, checkpoint: u64) -> CoreResult<bool> {
        self.transaction_with_origin(ChangeOrigin::Sync, |txn| {
            let mut metadata = txn.metadata().cloned().ok_or(CoreError::MissingMetadata)?;
            let moved = metadata.advance_checkpoint(checkpoint);
            if moved {
                txn.put_metadata(metadata);
            }
            Ok(moved)
        })
    }

    // bookkeeping tables

    /// Returns the recovery queue of this replica.
    #[must_use]
    pub fn recovery_queue(&self) -> RecoveryQueue<'_> {
        RecoveryQueue::new(self)
    }

    /// Returns the error log of this replica.
    #[must_use]
    pub fn error_log(&self) -> ErrorLog<'_> {
        ErrorLog::new(self)
    }

    // maintenance

    /// Subscribes to committed changes.
    pub fn subscribe(&self) -> CoreResult<Receiver<StoreChange>> {
        self.ensure_open()?;
        Ok(self.feed.subscribe())
    }

    /// Returns retained changes after `cursor`.
    pub fn poll_changes(&self, cursor: u64, limit: usize) -> CoreResult<Vec<StoreChange>> {
        self.ensure_open()?;
        Ok(self.feed.poll(cursor, limit))
    }

    /// Rewrites the journal as a single snapshot frame.
    pub fn compact(&self) -> CoreResult<u64> {
        let is_open = self.is_open.read();
        if !*is_open {
            return Err(CoreError::StoreClosed);
        }
        let state = self.state.write();
        let before = self.journal.size()?;
        self.journal.compact(state.sequence, &state.tables)?;
        let after = self.journal.size()?;
        tracing::info!(before, after, sequence = state.sequence, "journal compacted");
        Ok(after)
    }

    /// Returns the last commit sequence.
    pub fn sequence(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().sequence)
    }

    /// Returns table counters.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let journal_bytes = self.journal.size()?;
        let sequence = self.sequence()?;
        self.read(|txn| {
            let mut stats = StoreStats {
                sequence,
                journal_bytes,
                drafts: txn.draft_count(),
                error_records: txn.error_records().count(),
                ..StoreStats::default()
            };
            for event in txn.events() {
                stats.events += 1;
                if event.plain.deleted {
                    stats.deleted_events += 1;
                }
                if event.local.sync_state != SyncState::Done {
                    stats.unsynced_events += 1;
                }
            }
            for entry in txn.recovery_entries() {
                stats.recovery_entries += 1;
                if entry.is_exhausted() {
                    stats.exhausted_entries += 1;
                }
            }
            stats
        })
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("journal", &self.journal)
            .field("feed", &self.feed)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Stamps `changed` as a local write, advancing `sequence` and the invitation
/// marker where the edit calls for it.
fn stamp_local_edit(event: &mut Event, changed: &[EventField], owner: Option<&str>, existed: bool) {
    let now = Utc::now();
    let moved = changed
        .iter()
        .any(|f| matches!(f, EventField::StartDate | EventField::EndDate));
    if existed && moved && event.is_organized_by(owner) {
        event.plain.sequence += 1;
    }
    let invites = changed.contains(&EventField::Attendees) || (moved && existed);
    if invites && !event.content.attendees.is_empty() {
        event.local.email_notification = Some(EmailNotification::Pending);
    }
    event.touch(changed, now);
}

/// Writes an edited event, reconciling children if it is a series parent
/// whose rule or anchor changed.
fn apply_series_edit(
    materializer: &Materializer,
    txn: &mut StoreTransaction<'_>,
    stored: &Event,
    mut edited: Event,
) -> CoreResult<Reconciliation> {
    if let Some(previous) = SeriesAnchor::of(stored) {
        if !previous.matches(&edited) {
            return materializer.reconcile_rule_change(txn, &previous, &mut edited);
        }
    }
    txn.put_event(edited.clone());
    Ok(Reconciliation {
        kind: ReconcileKind::Unchanged,
        added: vec![edited],
        removed: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_feed::{ChangeKind, Table};
    use crate::model::{Attendee, UpdateType, UpdateTypes};
    use calsync_storage::SealingKey;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
    }

    fn owned_store() -> EventStore {
        let store = EventStore::open_in_memory().unwrap();
        store
            .set_metadata(CalendarMetadata::new("cal-1").with_owner("me@example.com"))
            .unwrap();
        store
    }

    #[test]
    fn failed_transaction_discards_every_write() {
        let store = EventStore::open_in_memory().unwrap();
        let event = Event::new("kept out", at(9), at(10));
        let result: CoreResult<()> = store.transaction(|txn| {
            txn.put_event(event.clone());
            txn.put_metadata(CalendarMetadata::new("cal"));
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(store.get(event.id()).unwrap().is_none());
        assert!(store.metadata().unwrap().is_none());
        assert_eq!(store.sequence().unwrap(), 0);
    }

    #[test]
    fn closed_store_fails_fast() {
        let store = EventStore::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(store.get(EventId::new()).unwrap_err().is_store_closed());
        assert!(store
            .put(Event::new("late", at(9), at(10)))
            .unwrap_err()
            .is_store_closed());
        assert!(store.subscribe().is_err());
        assert!(store.close().is_ok());
    }

    #[test]
    fn update_bumps_sequence_only_for_organizer_time_change() {
        let store = owned_store();
        let mut mine = Event::new("mine", at(9), at(10));
        mine.content.organizer = Some("me@example.com".into());
        let mut theirs = Event::new("theirs", at(9), at(10));
        theirs.content.organizer = Some("other@example.com".into());
        store.put(mine.clone()).unwrap();
        store.put(theirs.clone()).unwrap();

        let renamed = store
            .update(mine.id(), EventPatch::new().title("renamed"))
            .unwrap();
        assert_eq!(renamed.plain.sequence, 0);

        let moved = store
            .update(mine.id(), EventPatch::new().times(at(11), at(12)))
            .unwrap();
        assert_eq!(moved.plain.sequence, 1);

        let moved_theirs = store
            .update(theirs.id(), EventPatch::new().times(at(11), at(12)))
            .unwrap();
        assert_eq!(moved_theirs.plain.sequence, 0);

        let unchanged = store
            .update(mine.id(), EventPatch::new().times(at(11), at(12)))
            .unwrap();
        assert_eq!(unchanged.plain.sequence, 1);
    }

    #[test]
    fn update_marks_unsynced() {
        let store = owned_store();
        let mut event = Event::new("synced", at(9), at(10));
        event.local.sync_state = SyncState::Done;
        store.put(event.clone()).unwrap();
        assert!(store.unsynced_events(10).unwrap().is_empty());

        store
            .update(event.id(), EventPatch::new().location("room 4"))
            .unwrap();
        let pending = store.unsynced_events(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].field_timestamp(EventField::Location).is_some());
    }

    #[test]
    fn commit_draft_applies_dirty_groups_and_clears_draft() {
        let store = owned_store();
        let mut event = Event::new("review", at(9), at(10));
        event.content.organizer = Some("me@example.com".into());
        event.local.sync_state = SyncState::Done;
        store.put(event.clone()).unwrap();

        let mut edited = event.clone();
        edited.plain.start_date = at(13);
        edited.plain.end_date = at(14);
        edited.content.attendees = vec![Attendee::new("guest@example.com")];
        store
            .save_draft(Draft::new(edited, UpdateTypes::only(UpdateType::Content)))
            .unwrap();
        assert!(store.draft(event.id()).unwrap().is_some());

        let committed = store.commit_draft(event.id()).unwrap();
        assert_eq!(committed.plain.start_date, at(13));
        assert_eq!(committed.plain.sequence, 1);
        assert_eq!(committed.local.sync_state, SyncState::Waiting);
        assert_eq!(
            committed.local.email_notification,
            Some(EmailNotification::Pending)
        );
        assert!(store.draft(event.id()).unwrap().is_none());
        assert_eq!(store.get(event.id()).unwrap().unwrap(), committed);
    }

    #[test]
    fn commit_of_missing_draft_fails() {
        let store = owned_store();
        let err = store.commit_draft(EventId::new()).unwrap_err();
        assert!(matches!(err, CoreError::DraftNotFound(_)));
    }

    #[test]
    fn draft_for_new_event_creates_it() {
        let store = owned_store();
        let event = Event::new("brand new", at(9), at(10));
        store
            .save_draft(Draft::new(event.clone(), UpdateTypes::only(UpdateType::Content)))
            .unwrap();
        let committed = store.commit_draft(event.id()).unwrap();
        assert_eq!(committed.plain.sequence, 0);
        assert_eq!(store.get(event.id()).unwrap().unwrap().content.title, "brand new");
    }

    #[test]
    fn discard_draft_keeps_event() {
        let store = owned_store();
        let event = Event::new("keep", at(9), at(10));
        store.put(event.clone()).unwrap();
        let mut edited = event.clone();
        edited.content.title = "discarded".into();
        store
            .save_draft(Draft::new(edited, UpdateTypes::only(UpdateType::Content)))
            .unwrap();
        assert!(store.discard_draft(event.id()).unwrap());
        assert!(!store.discard_draft(event.id()).unwrap());
        assert_eq!(store.get(event.id()).unwrap().unwrap().content.title, "keep");
    }

    #[test]
    fn checkpoint_is_monotonic_and_needs_metadata() {
        let bare = EventStore::open_in_memory().unwrap();
        assert!(matches!(
            bare.set_checkpoint(3).unwrap_err(),
            CoreError::MissingMetadata
        ));

        let store = owned_store();
        assert!(store.set_checkpoint(7).unwrap());
        assert!(!store.set_checkpoint(2).unwrap());
        assert_eq!(store.metadata().unwrap().unwrap().checkpoint, 7);
    }

    #[test]
    fn change_feed_tags_origin() {
        let store = owned_store();
        let changes = store.subscribe().unwrap();
        let event = Event::new("feed", at(9), at(10));
        store.put(event.clone()).unwrap();
        store.set_checkpoint(1).unwrap();

        let local = changes.try_recv().unwrap();
        assert_eq!(local.table, Table::Events);
        assert_eq!(local.key, event.id().to_string());
        assert_eq!(local.kind, ChangeKind::Put);
        assert_eq!(local.origin, ChangeOrigin::Local);

        let sync = changes.try_recv().unwrap();
        assert_eq!(sync.table, Table::CalendarMetadata);
        assert_eq!(sync.origin, ChangeOrigin::Sync);
    }

    #[test]
    fn polling_resumes_after_cursor() {
        let store = owned_store();
        let cursor = store.sequence().unwrap();
        let first = Event::new("first", at(9), at(10));
        let second = Event::new("second", at(11), at(12));
        store.put(first.clone()).unwrap();
        store.put(second.clone()).unwrap();

        let changes = store.poll_changes(cursor, 10).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, first.id().to_string());
        assert_eq!(changes[1].key, second.id().to_string());
        assert_eq!(store.poll_changes(cursor, 1).unwrap().len(), 1);
        assert!(store.poll_changes(changes[1].sequence, 10).unwrap().is_empty());

        store.close().unwrap();
        assert!(matches!(
            store.poll_changes(cursor, 10),
            Err(CoreError::StoreClosed)
        ));
    }

    #[test]
    fn change_recurrence_splits_series() {
        let store = owned_store();
        let mut parent = Event::new("series", at(9), at(10));
        parent.plain.recurrence_rule = Some(RecurrenceRule::daily());
        let child = parent.occurrence_at(at(9) + Duration::days(1));
        store.put(parent.clone()).unwrap();
        store.put(child.clone()).unwrap();

        let outcome = store
            .change_recurrence(
                parent.id(),
                Some(RecurrenceRule::daily().with_interval(2)),
                at(9),
                at(10),
            )
            .unwrap();
        assert!(matches!(outcome.kind, ReconcileKind::Split { .. }));
        assert!(store.get(parent.id()).unwrap().unwrap().plain.deleted);
        assert!(store.get(child.id()).unwrap().unwrap().plain.deleted);
        assert_eq!(store.query_recurring_parents().unwrap().len(), 1);
    }

    #[test]
    fn change_recurrence_rejects_children() {
        let store = owned_store();
        let mut parent = Event::new("series", at(9), at(10));
        parent.plain.recurrence_rule = Some(RecurrenceRule::daily());
        let child = parent.occurrence_at(at(9) + Duration::days(1));
        store.put(child.clone()).unwrap();
        let err = store
            .change_recurrence(child.id(), None, at(9), at(10))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn journal_replays_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica").join("calendar.journal");
        let event = Event::new("durable", at(9), at(10));
        {
            let store = EventStore::open_path(&path, StoreConfig::default()).unwrap();
            store.set_metadata(CalendarMetadata::new("cal")).unwrap();
            store.put(event.clone()).unwrap();
            store.set_checkpoint(42).unwrap();
            store.close().unwrap();
        }
        let reopened = EventStore::open_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(reopened.get(event.id()).unwrap().unwrap(), event);
        assert_eq!(reopened.metadata().unwrap().unwrap().checkpoint, 42);
        assert_eq!(reopened.sequence().unwrap(), 3);
    }

    #[test]
    fn compaction_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calendar.journal");
        let event = Event::new("compacted", at(9), at(10));
        let before;
        {
            let store = EventStore::open_path(&path, StoreConfig::default()).unwrap();
            for title in ["a", "b", "c", "d"] {
                let mut version = event.clone();
                version.content.title = title.into();
                store.put(version).unwrap();
            }
            before = store.stats().unwrap().journal_bytes;
            let after = store.compact().unwrap();
            assert!(after < before);
        }
        let reopened = EventStore::open_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(reopened.get(event.id()).unwrap().unwrap().content.title, "d");
        assert_eq!(reopened.sequence().unwrap(), 4);
    }

    #[test]
    fn sealed_journal_needs_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed.journal");
        let key = SealingKey::generate();
        let event = Event::new("secret", at(9), at(10));
        {
            let config = StoreConfig::new().sealing_key(key.clone());
            let store = EventStore::open_path(&path, config).unwrap();
            store.put(event.clone()).unwrap();
        }
        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));

        let config = StoreConfig::new().sealing_key(key);
        let reopened = EventStore::open_path(&path, config).unwrap();
        assert_eq!(reopened.get(event.id()).unwrap().unwrap(), event);

        let wrong = StoreConfig::new().sealing_key(SealingKey::generate());
        assert!(EventStore::open_path(&path, wrong).is_err());
    }

    #[test]
    fn torn_tail_is_repaired_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.journal");
        let event = Event::new("survivor", at(9), at(10));
        {
            let store = EventStore::open_path(&path, StoreConfig::default()).unwrap();
            store.put(event.clone()).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"CSJ1\x40\x00");
        std::fs::write(&path, &bytes).unwrap();

        let store = EventStore::open_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.get(event.id()).unwrap().unwrap(), event);
        let second = Event::new("after repair", at(11), at(12));
        store.put(second.clone()).unwrap();
        drop(store);

        let reopened = EventStore::open_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(reopened.all_events().unwrap().len(), 2);
    }

    #[test]
    fn stats_count_tables() {
        let store = owned_store();
        let mut deleted = Event::new("gone", at(9), at(10));
        deleted.plain.deleted = true;
        deleted.local.sync_state = SyncState::Done;
        store.put(deleted).unwrap();
        store.put(Event::new("live", at(9), at(10))).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.deleted_events, 1);
        assert_eq!(stats.unsynced_events, 1);
        assert_eq!(stats.drafts, 0);
        assert!(stats.journal_bytes > 0);
    }
}
