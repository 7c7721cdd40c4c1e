//! Deduplicated log of sync failures.
//!
//! Records are keyed by the failing event id, else the failing mail id, else
//! a fresh uuid. Recording the same key again appends the messages and bumps
//! the count instead of adding a record.

use crate::change_feed::ChangeOrigin;
use crate::error::CoreResult;
use crate::model::{ErrorRecord, EventId};
use crate::store::{EventStore, StoreTransaction};
use uuid::Uuid;

/// Input to [`create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorArgs {
    /// Calendar the failure happened in.
    pub calendar_id: String,
    /// Failing event.
    pub parent_event_id: Option<EventId>,
    /// Failing mail.
    pub email_id: Option<String>,
    /// Messages to record.
    pub messages: Vec<String>,
}

impl ErrorArgs {
    /// A failure not tied to an event or mail.
    pub fn new(calendar_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            parent_event_id: None,
            email_id: None,
            messages: vec![message.into()],
        }
    }

    /// A failure of one event.
    pub fn for_event(
        calendar_id: impl Into<String>,
        id: EventId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parent_event_id: Some(id),
            ..Self::new(calendar_id, message)
        }
    }

    /// A failure of one mail.
    pub fn for_email(
        calendar_id: impl Into<String>,
        email_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            email_id: Some(email_id.into()),
            ..Self::new(calendar_id, message)
        }
    }

    /// Adds another message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    fn error_id(&self) -> String {
        self.parent_event_id
            .map(|id| id.to_string())
            .or_else(|| self.email_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Records a failure, merging into an existing record with the same id.
pub fn create(txn: &mut StoreTransaction<'_>, args: ErrorArgs) -> ErrorRecord {
    let error_id = args.error_id();
    let record = match txn.error_record(&error_id) {
        Some(existing) => {
            let mut record = existing.clone();
            record.message.extend(args.messages);
            record.count = record.count.saturating_add(1);
            record
        }
        None => ErrorRecord {
            error_id,
            calendar_id: args.calendar_id,
            parent_event_id: args.parent_event_id,
            email_id: args.email_id,
            message: args.messages,
            count: 1,
        },
    };
    txn.put_error(record.clone());
    record
}

/// Error log of one replica, one transaction per call.
#[derive(Debug, Clone, Copy)]
pub struct ErrorLog<'s> {
    store: &'s EventStore,
}

impl<'s> ErrorLog<'s> {
    pub(crate) fn new(store: &'s EventStore) -> Self {
        Self { store }
    }

    /// Records a failure.
    pub fn create(&self, args: ErrorArgs) -> CoreResult<ErrorRecord> {
        self.store
            .transaction_with_origin(ChangeOrigin::Sync, |txn| Ok(create(txn, args)))
    }

    /// Records a failure; a failing write is logged and otherwise ignored.
    pub fn record(&self, args: ErrorArgs) {
        if let Err(e) = self.create(args) {
            tracing::warn!(error = %e, "failed to write error record");
        }
    }

    /// Returns a record by id.
    pub fn get(&self, error_id: &str) -> CoreResult<Option<ErrorRecord>> {
        self.store.read(|txn| txn.error_record(error_id).cloned())
    }

    /// Returns every record.
    pub fn get_all(&self) -> CoreResult<Vec<ErrorRecord>> {
        self.store.read(|txn| txn.error_records().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_event_is_deduplicated() {
        let store = EventStore::open_in_memory().unwrap();
        let log = store.error_log();
        let id = EventId::new();
        log.create(ErrorArgs::for_event("cal", id, "first")).unwrap();
        let record = log
            .create(ErrorArgs::for_event("cal", id, "second"))
            .unwrap();

        assert_eq!(record.count, 2);
        assert_eq!(record.message, vec!["first", "second"]);
        assert_eq!(log.get_all().unwrap().len(), 1);
        assert_eq!(log.get(&id.to_string()).unwrap().unwrap(), record);
    }

    #[test]
    fn email_id_is_the_fallback_key() {
        let store = EventStore::open_in_memory().unwrap();
        let log = store.error_log();
        log.create(ErrorArgs::for_email("cal", "mail-7", "bounce"))
            .unwrap();
        log.create(ErrorArgs::for_email("cal", "mail-7", "bounce again"))
            .unwrap();
        let record = log.get("mail-7").unwrap().unwrap();
        assert_eq!(record.count, 2);
    }

    #[test]
    fn anonymous_errors_are_distinct() {
        let store = EventStore::open_in_memory().unwrap();
        let log = store.error_log();
        log.create(ErrorArgs::new("cal", "offline")).unwrap();
        log.create(ErrorArgs::new("cal", "offline")).unwrap();
        assert_eq!(log.get_all().unwrap().len(), 2);
    }

    #[test]
    fn record_swallows_closed_store() {
        let store = EventStore::open_in_memory().unwrap();
        store.close().unwrap();
        store.error_log().record(ErrorArgs::new("cal", "ignored"));
    }
}
