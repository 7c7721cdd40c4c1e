//! Request and response bodies of the calendar sync RPCs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public key of an invited attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeKey {
    /// Attendee mail address.
    pub email: String,
    /// Attendee public key.
    pub public_key: Vec<u8>,
}

/// Session key wrapped for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Mail address of the recipient, or the calendar id.
    pub recipient: String,
    /// Session key encrypted to the recipient.
    pub key: Vec<u8>,
}

/// An event as the server stores it.
///
/// Scheduling fields are visible to the server; content and preferences are
/// opaque ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEvent {
    /// Event identity.
    pub parent_event_id: Uuid,
    /// Parent series of a child.
    #[serde(default)]
    pub parent_recurrence_id: Option<Uuid>,
    /// Occurrence a child overrides.
    #[serde(default)]
    pub recurrence_date: Option<DateTime<Utc>>,
    /// Start instant.
    pub start_date: DateTime<Utc>,
    /// End instant.
    pub end_date: DateTime<Utc>,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
    /// Scheduling revision.
    #[serde(default)]
    pub sequence: u32,
    /// Encrypted shared content.
    pub content: Vec<u8>,
    /// Encrypted per-user preferences.
    #[serde(default)]
    pub preferences: Option<Vec<u8>>,
    /// Content session key, wrapped per recipient.
    #[serde(default)]
    pub session_keys: Vec<WrappedKey>,
}

/// Category of a pushed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushUpdateType {
    /// Shared content changed.
    Content,
    /// The local user's response changed.
    Rsvp,
    /// Preferences changed.
    Preferences,
}

/// One event pushed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    /// The encrypted event.
    pub event: EncryptedEvent,
    /// What changed locally.
    #[serde(default)]
    pub update_types: Vec<PushUpdateType>,
}

/// An event returned by the server, with the keys to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// The encrypted event.
    pub event: EncryptedEvent,
    /// Content session key for this client.
    pub session_key: Vec<u8>,
    /// Preferences session key for this client.
    #[serde(default)]
    pub preferences_session_key: Option<Vec<u8>>,
}

/// Whether the server holds changes the client has not seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerSyncState {
    /// Client and server agree after this exchange.
    Synced,
    /// More server changes are pending; sync again.
    PendingChanges,
}

/// Push local changes and pull remote ones since `checkpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Calendar to sync.
    pub calendar_id: String,
    /// Last checkpoint the client applied.
    pub checkpoint: u64,
    /// Local changes.
    pub events: Vec<PushPayload>,
}

/// Server answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// New checkpoint to persist.
    pub checkpoint: u64,
    /// Server changes since the request checkpoint.
    pub events: Vec<RemoteEvent>,
    /// Whether more changes are pending.
    pub state: ServerSyncState,
}

impl SyncResponse {
    /// A response without remote changes.
    #[must_use]
    pub fn synced(checkpoint: u64) -> Self {
        Self {
            checkpoint,
            events: Vec::new(),
            state: ServerSyncState::Synced,
        }
    }
}

/// Re-fetch specific events from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryFetchRequest {
    /// Calendar the events belong to.
    pub calendar_id: String,
    /// Events to fetch.
    pub event_ids: Vec<Uuid>,
}

/// Server answer to a [`RecoveryFetchRequest`]. Unknown ids are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoveryFetchResponse {
    /// The events found.
    pub events: Vec<RemoteEvent>,
}

/// Machine-readable server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The pushed batch conflicts with server state.
    SyncConflict,
    /// The request was malformed.
    BadRequest,
    /// The client is not allowed to sync this calendar.
    Unauthorized,
    /// The server failed.
    Internal,
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error class.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
