//! In-memory tables and the mutations that change them.

use crate::change_feed::{ChangeKind, ChangeOrigin, StoreChange, Table};
use crate::model::{CalendarMetadata, Draft, ErrorRecord, Event, EventId, EventToRecover};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for the metadata singleton in change notifications.
pub(crate) const METADATA_KEY: &str = "calendar";

/// Materialized replica state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) events: BTreeMap<EventId, Event>,
    pub(crate) drafts: BTreeMap<EventId, Draft>,
    pub(crate) recovery_queue: BTreeMap<EventId, EventToRecover>,
    pub(crate) error_log: BTreeMap<String, ErrorRecord>,
    pub(crate) metadata: Option<CalendarMetadata>,
}

impl Tables {
    pub(crate) fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutEvent(event) => {
                self.events.insert(event.parent_event_id, event);
            }
            Mutation::PurgeEvent(id) => {
                self.events.remove(&id);
            }
            Mutation::PutDraft(draft) => {
                self.drafts.insert(draft.id(), draft);
            }
            Mutation::DeleteDraft(id) => {
                self.drafts.remove(&id);
            }
            Mutation::PutRecovery(entry) => {
                self.recovery_queue.insert(entry.parent_event_id, entry);
            }
            Mutation::DeleteRecovery(id) => {
                self.recovery_queue.remove(&id);
            }
            Mutation::PutError(record) => {
                self.error_log.insert(record.error_id.clone(), record);
            }
            Mutation::PutMetadata(metadata) => {
                self.metadata = Some(metadata);
            }
        }
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            events: self.events.values().cloned().collect(),
            drafts: self.drafts.values().cloned().collect(),
            recovery_queue: self.recovery_queue.values().cloned().collect(),
            error_log: self.error_log.values().cloned().collect(),
            metadata: self.metadata.clone(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            events: snapshot
                .events
                .into_iter()
                .map(|e| (e.parent_event_id, e))
                .collect(),
            drafts: snapshot.drafts.into_iter().map(|d| (d.id(), d)).collect(),
            recovery_queue: snapshot
                .recovery_queue
                .into_iter()
                .map(|r| (r.parent_event_id, r))
                .collect(),
            error_log: snapshot
                .error_log
                .into_iter()
                .map(|r| (r.error_id.clone(), r))
                .collect(),
            metadata: snapshot.metadata,
        }
    }
}

/// Full state written by compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) events: Vec<Event>,
    pub(crate) drafts: Vec<Draft>,
    pub(crate) recovery_queue: Vec<EventToRecover>,
    pub(crate) error_log: Vec<ErrorRecord>,
    pub(crate) metadata: Option<CalendarMetadata>,
}

/// One record-level write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Mutation {
    PutEvent(Event),
    PurgeEvent(EventId),
    PutDraft(Draft),
    DeleteDraft(EventId),
    PutRecovery(EventToRecover),
    DeleteRecovery(EventId),
    PutError(ErrorRecord),
    PutMetadata(CalendarMetadata),
}

impl Mutation {
    pub(crate) fn change(&self, sequence: u64, origin: ChangeOrigin) -> StoreChange {
        let (table, key, kind) = match self {
            Mutation::PutEvent(e) => (Table::Events, e.parent_event_id.to_string(), ChangeKind::Put),
            Mutation::PurgeEvent(id) => (Table::Events, id.to_string(), ChangeKind::Delete),
            Mutation::PutDraft(d) => (Table::Drafts, d.id().to_string(), ChangeKind::Put),
            Mutation::DeleteDraft(id) => (Table::Drafts, id.to_string(), ChangeKind::Delete),
            Mutation::PutRecovery(r) => (
                Table::RecoveryQueue,
                r.parent_event_id.to_string(),
                ChangeKind::Put,
            ),
            Mutation::DeleteRecovery(id) => {
                (Table::RecoveryQueue, id.to_string(), ChangeKind::Delete)
            }
            Mutation::PutError(r) => (Table::ErrorLog, r.error_id.clone(), ChangeKind::Put),
            Mutation::PutMetadata(_) => (
                Table::CalendarMetadata,
                METADATA_KEY.to_string(),
                ChangeKind::Put,
            ),
        };
        StoreChange {
            sequence,
            table,
            key,
            kind,
            origin,
        }
    }
}
