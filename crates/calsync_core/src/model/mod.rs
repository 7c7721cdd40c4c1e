//! Replica data model.

mod draft;
mod event;
mod id;
mod metadata;
mod records;

pub use draft::Draft;
pub use event::{
    Attendee, AttendeeStatus, EmailNotification, Event, EventContent, EventField, EventPatch,
    EventPreferences, LocalMetadata, PlainContent, SyncState, UpdateType, UpdateTypes,
};
pub use id::EventId;
pub use metadata::{CalendarMetadata, KeyMaterial};
pub use records::{ErrorRecord, EventToRecover, MAX_TRY};
