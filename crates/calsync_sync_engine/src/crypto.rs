//! Encryption seams of the push and pull pipelines.
//!
//! The engine never touches key material itself. Push hands each event to
//! an [`EventCrypto`] together with the attendee keys an [`AttendeeResolver`]
//! found for it; pull asks the same crypto to open server copies.

use crate::error::SyncResult;
use calsync_core::{Event, KeyMaterial};
use calsync_sync_protocol::{AttendeeKey, EncryptedEvent, RemoteEvent};

/// Keys available while encrypting one event.
#[derive(Debug, Clone, Copy)]
pub struct EncryptionContext<'a> {
    /// Calendar the event belongs to.
    pub calendar_id: &'a str,
    /// Key material of the replica.
    pub key_material: &'a KeyMaterial,
    /// Public keys of the event's attendees.
    pub attendee_keys: &'a [AttendeeKey],
}

/// Encrypts local events and decrypts server copies.
pub trait EventCrypto: Send + Sync {
    /// Encrypts `event` for the calendar and its attendees.
    fn encrypt(&self, event: &Event, context: &EncryptionContext<'_>) -> SyncResult<EncryptedEvent>;

    /// Decrypts a server copy.
    ///
    /// The returned event carries fresh local metadata; the pull pipeline
    /// decides its sync state.
    fn decrypt(&self, remote: &RemoteEvent) -> SyncResult<Event>;
}

/// Looks up the public keys of an event's attendees.
pub trait AttendeeResolver: Send + Sync {
    /// Returns one key per attendee, or
    /// [`SyncError::UnresolvedAttendee`](crate::SyncError::UnresolvedAttendee).
    fn resolve(&self, event: &Event) -> SyncResult<Vec<AttendeeKey>>;
}

/// A resolver for calendars without invitations: every event resolves to no
/// keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttendees;

impl AttendeeResolver for NoAttendees {
    fn resolve(&self, _event: &Event) -> SyncResult<Vec<AttendeeKey>> {
        Ok(Vec::new())
    }
}
