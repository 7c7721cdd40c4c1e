//! Delivery of sync results to the embedding application.

use calsync_core::{Event, EventId};

/// How an event changed during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// The event is new to the replica.
    Added,
    /// The event changed.
    Updated,
    /// The event was deleted.
    Deleted,
}

/// One change produced by a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDelta {
    /// Kind of change.
    pub kind: DeltaKind,
    /// The event after the change.
    pub event: Event,
    /// True for an occurrence expanded from a series and not persisted.
    pub is_virtual: bool,
}

impl EventDelta {
    /// A delta for a stored event.
    pub fn stored(kind: DeltaKind, event: Event) -> Self {
        Self {
            kind,
            event,
            is_virtual: false,
        }
    }

    /// A delta for an expanded occurrence.
    pub fn occurrence(kind: DeltaKind, event: Event) -> Self {
        Self {
            kind,
            event,
            is_virtual: true,
        }
    }
}

/// Receives pull results. Calls are fire-and-forget: implementations must
/// not block the pass.
pub trait NotificationSink: Send + Sync {
    /// Delivers the changes of one pass.
    fn deliver(&self, deltas: Vec<EventDelta>);

    /// Asks for invitation emails of events the server acknowledged.
    fn schedule_emails(&self, events: Vec<EventId>);
}

/// A sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _deltas: Vec<EventDelta>) {}

    fn schedule_emails(&self, _events: Vec<EventId>) {}
}
