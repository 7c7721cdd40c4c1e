//! Notification sink that records deliveries.

use calsync_core::EventId;
use calsync_sync_engine::{DeltaKind, EventDelta, NotificationSink};
use parking_lot::Mutex;

/// Records every delivery for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Vec<EventDelta>>>,
    emails: Mutex<Vec<EventId>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delta delivered so far, flattened.
    pub fn deltas(&self) -> Vec<EventDelta> {
        self.deliveries.lock().iter().flatten().cloned().collect()
    }

    /// Deltas of `kind`, stored or virtual.
    pub fn deltas_of(&self, kind: DeltaKind) -> Vec<EventDelta> {
        self.deltas().into_iter().filter(|d| d.kind == kind).collect()
    }

    /// Number of `deliver` calls.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Events handed over for invitation mail.
    pub fn emails(&self) -> Vec<EventId> {
        self.emails.lock().clone()
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.deliveries.lock().clear();
        self.emails.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, deltas: Vec<EventDelta>) {
        self.deliveries.lock().push(deltas);
    }

    fn schedule_emails(&self, events: Vec<EventId>) {
        self.emails.lock().extend(events);
    }
}
