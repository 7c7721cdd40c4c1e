//! Recovery queue and error log records.

use super::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempts after which a recovery entry is no longer retried.
pub const MAX_TRY: u32 = 5;

/// An event whose server copy must be re-fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventToRecover {
    /// Event to re-fetch.
    pub parent_event_id: EventId,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    /// Failed fetch attempts so far.
    pub try_count: u32,
}

impl EventToRecover {
    /// Creates an untried entry.
    #[must_use]
    pub fn new(parent_event_id: EventId, created_at: DateTime<Utc>) -> Self {
        Self {
            parent_event_id,
            created_at,
            try_count: 0,
        }
    }

    /// Returns true once the entry has used up its attempts.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.try_count >= MAX_TRY
    }
}

/// A deduplicated sync failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Dedup key: event id, else mail id, else a random uuid.
    pub error_id: String,
    /// Calendar the failure happened in.
    pub calendar_id: String,
    /// Failing event, if any.
    #[serde(default)]
    pub parent_event_id: Option<EventId>,
    /// Failing mail, if any.
    #[serde(default)]
    pub email_id: Option<String>,
    /// Every message recorded under this id, oldest first.
    pub message: Vec<String>,
    /// Number of times the failure was recorded.
    pub count: u32,
}
