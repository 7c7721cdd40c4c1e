//! Read-your-writes transaction over the store tables.

use super::tables::{Mutation, Tables};
use crate::model::{
    CalendarMetadata, Draft, ErrorRecord, Event, EventId, EventToRecover, SyncState,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A unit of work against the replica.
///
/// Reads see the committed tables overlaid with this transaction's own
/// writes. Writes are buffered per table and only applied, journaled and
/// announced on the change feed when the closure passed to
/// [`EventStore::transaction`](super::EventStore::transaction) returns `Ok`.
///
/// The store's write lock is held for the whole closure, so the closure must
/// not call back into the [`EventStore`](super::EventStore) itself.
pub struct StoreTransaction<'a> {
    base: &'a Tables,
    events: BTreeMap<EventId, Option<Event>>,
    drafts: BTreeMap<EventId, Option<Draft>>,
    recovery: BTreeMap<EventId, Option<EventToRecover>>,
    errors: BTreeMap<String, ErrorRecord>,
    metadata: Option<CalendarMetadata>,
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            events: BTreeMap::new(),
            drafts: BTreeMap::new(),
            recovery: BTreeMap::new(),
            errors: BTreeMap::new(),
            metadata: None,
        }
    }

    /// Returns true if anything was written.
    #[must_use]
    pub fn has_writes(&self) -> bool {
        !self.events.is_empty()
            || !self.drafts.is_empty()
            || !self.recovery.is_empty()
            || !self.errors.is_empty()
            || self.metadata.is_some()
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        if let Some(metadata) = self.metadata {
            mutations.push(Mutation::PutMetadata(metadata));
        }
        for (id, event) in self.events {
            mutations.push(match event {
                Some(event) => Mutation::PutEvent(event),
                None => Mutation::PurgeEvent(id),
            });
        }
        for (id, draft) in self.drafts {
            mutations.push(match draft {
                Some(draft) => Mutation::PutDraft(draft),
                None => Mutation::DeleteDraft(id),
            });
        }
        for (id, entry) in self.recovery {
            mutations.push(match entry {
                Some(entry) => Mutation::PutRecovery(entry),
                None => Mutation::DeleteRecovery(id),
            });
        }
        mutations.extend(self.errors.into_values().map(Mutation::PutError));
        mutations
    }

    // events

    /// Returns an event by id.
    #[must_use]
    pub fn event(&self, id: EventId) -> Option<&Event> {
        match self.events.get(&id) {
            Some(overlay) => overlay.as_ref(),
            None => self.base.events.get(&id),
        }
    }

    /// Iterates every event, including soft-deleted ones.
    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.base
            .events
            .iter()
            .filter(|(id, _)| !self.events.contains_key(*id))
            .map(|(_, event)| event)
            .chain(self.events.values().filter_map(Option::as_ref))
    }

    /// Inserts or replaces an event wholesale.
    pub fn put_event(&mut self, event: Event) {
        self.events.insert(event.parent_event_id, Some(event));
    }

    /// Physically removes an event. Returns true if it existed.
    pub fn purge_event(&mut self, id: EventId) -> bool {
        let existed = self.event(id).is_some();
        self.events.insert(id, None);
        existed
    }

    /// Non-deleted events overlapping `[from, to)`, ordered by start.
    #[must_use]
    pub fn range_query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Event> {
        let mut found: Vec<Event> = self
            .events()
            .filter(|e| !e.plain.deleted && e.overlaps(from, to))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.plain.start_date, e.parent_event_id));
        found
    }

    /// Non-deleted series parents.
    #[must_use]
    pub fn recurring_parents(&self) -> Vec<Event> {
        self.events()
            .filter(|e| e.is_recurring_parent() && !e.plain.deleted)
            .cloned()
            .collect()
    }

    /// Every persisted child of a series, tombstones included.
    #[must_use]
    pub fn children_of(&self, parent: EventId) -> Vec<Event> {
        let mut children: Vec<Event> = self
            .events()
            .filter(|e| e.plain.parent_recurrence_id == Some(parent))
            .cloned()
            .collect();
        children.sort_by_key(|e| (e.plain.recurrence_date, e.parent_event_id));
        children
    }

    /// Finds a child by its series identity.
    #[must_use]
    pub fn find_child(&self, parent: EventId, recurrence_date: DateTime<Utc>) -> Option<&Event> {
        self.events().find(|e| {
            e.plain.parent_recurrence_id == Some(parent)
                && e.plain.recurrence_date == Some(recurrence_date)
        })
    }

    /// Events not yet acknowledged by the server, least recently updated first.
    #[must_use]
    pub fn unsynced_events(&self, limit: usize) -> Vec<Event> {
        let mut pending: Vec<Event> = self
            .events()
            .filter(|e| e.local.sync_state != SyncState::Done)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (e.local.updated_at, e.parent_event_id));
        pending.truncate(limit);
        pending
    }

    /// Counts events not yet acknowledged by the server.
    #[must_use]
    pub fn unsynced_count(&self) -> usize {
        self.events()
            .filter(|e| e.local.sync_state != SyncState::Done)
            .count()
    }

    // drafts

    /// Returns the draft for an event.
    #[must_use]
    pub fn draft(&self, id: EventId) -> Option<&Draft> {
        match self.drafts.get(&id) {
            Some(overlay) => overlay.as_ref(),
            None => self.base.drafts.get(&id),
        }
    }

    /// Saves a draft, replacing any previous one.
    pub fn put_draft(&mut self, draft: Draft) {
        self.drafts.insert(draft.id(), Some(draft));
    }

    /// Removes a draft. Returns true if it existed.
    pub fn delete_draft(&mut self, id: EventId) -> bool {
        let existed = self.draft(id).is_some();
        self.drafts.insert(id, None);
        existed
    }

    /// Counts drafts.
    #[must_use]
    pub fn draft_count(&self) -> usize {
        self.base
            .drafts
            .keys()
            .filter(|id| !self.drafts.contains_key(*id))
            .count()
            + self.drafts.values().filter(|d| d.is_some()).count()
    }

    // recovery queue

    /// Returns the recovery entry for an event.
    #[must_use]
    pub fn recovery_entry(&self, id: EventId) -> Option<&EventToRecover> {
        match self.recovery.get(&id) {
            Some(overlay) => overlay.as_ref(),
            None => self.base.recovery_queue.get(&id),
        }
    }

    /// Iterates every recovery entry, exhausted ones included.
    pub fn recovery_entries(&self) -> impl Iterator<Item = &EventToRecover> + '_ {
        self.base
            .recovery_queue
            .iter()
            .filter(|(id, _)| !self.recovery.contains_key(*id))
            .map(|(_, entry)| entry)
            .chain(self.recovery.values().filter_map(Option::as_ref))
    }

    /// Inserts or replaces a recovery entry.
    pub fn put_recovery(&mut self, entry: EventToRecover) {
        self.recovery.insert(entry.parent_event_id, Some(entry));
    }

    /// Removes a recovery entry. Returns true if it existed.
    pub fn delete_recovery(&mut self, id: EventId) -> bool {
        let existed = self.recovery_entry(id).is_some();
        self.recovery.insert(id, None);
        existed
    }

    // error log

    /// Returns an error record by id.
    #[must_use]
    pub fn error_record(&self, id: &str) -> Option<&ErrorRecord> {
        self.errors.get(id).or_else(|| self.base.error_log.get(id))
    }

    /// Iterates every error record.
    pub fn error_records(&self) -> impl Iterator<Item = &ErrorRecord> + '_ {
        self.base
            .error_log
            .iter()
            .filter(|(id, _)| !self.errors.contains_key(*id))
            .map(|(_, record)| record)
            .chain(self.errors.values())
    }

    /// Inserts or replaces an error record.
    pub fn put_error(&mut self, record: ErrorRecord) {
        self.errors.insert(record.error_id.clone(), record);
    }

    // metadata

    /// Returns the calendar metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&CalendarMetadata> {
        self.metadata.as_ref().or(self.base.metadata.as_ref())
    }

    /// Replaces the calendar metadata.
    pub fn put_metadata(&mut self, metadata: CalendarMetadata) {
        self.metadata = Some(metadata);
    }
}
