//! # calsync core
//!
//! Local replica of one calendar and the algorithms that keep it consistent.
//!
//! This crate provides:
//! - the data model ([`Event`], [`Draft`], [`CalendarMetadata`], ...)
//! - the [`EventStore`]: transactional tables over a CRC-checked, optionally
//!   sealed commit journal
//! - the [`ChangeFeed`] of committed writes
//! - recurrence expansion and series reconciliation ([`recurrence`])
//! - the bounded [`recovery`] queue and the deduplicated [`error_log`]
//! - field-level merging of server copies ([`FieldMerger`])
//!
//! ```rust
//! use calsync_core::{Event, EventPatch, EventStore, SyncState};
//! use chrono::{Duration, Utc};
//!
//! let store = EventStore::open_in_memory().unwrap();
//! let start = Utc::now();
//! let event = Event::new("planning", start, start + Duration::hours(1));
//! store.put(event.clone()).unwrap();
//!
//! let updated = store.update(event.id(), EventPatch::new().title("roadmap")).unwrap();
//! assert_eq!(updated.local.sync_state, SyncState::Waiting);
//! assert_eq!(store.unsynced_events(10).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod error;
pub mod error_log;
mod merge;
mod model;
pub mod recovery;
pub mod recurrence;
mod store;

pub use change_feed::{ChangeFeed, ChangeKind, ChangeOrigin, StoreChange, Table};
pub use error::{CoreError, CoreResult};
pub use error_log::{ErrorArgs, ErrorLog};
pub use merge::{FieldMerger, TimestampMerger};
pub use model::{
    Attendee, AttendeeStatus, CalendarMetadata, Draft, EmailNotification, ErrorRecord, Event,
    EventContent, EventField, EventId, EventPatch, EventPreferences, EventToRecover, KeyMaterial,
    LocalMetadata, PlainContent, SyncState, UpdateType, UpdateTypes, MAX_TRY,
};
pub use recovery::RecoveryQueue;
pub use recurrence::{
    Frequency, MaterializedIndex, Materializer, ReconcileKind, Reconciliation, RecurrenceRule,
    SeriesAnchor,
};
pub use store::{EventStore, StoreConfig, StoreStats, StoreTransaction};
