//! Unsaved local edits.

use super::{Event, EventField, EventId, UpdateType, UpdateTypes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An in-progress edit of an event, keyed by the same id.
///
/// Only the field groups named in `dirty` are taken from the draft when it is
/// committed; everything else keeps the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Edited copy of the event.
    pub event: Event,
    /// Field groups the user touched.
    pub dirty: UpdateTypes,
    /// When the draft was last saved.
    pub saved_at: DateTime<Utc>,
}

impl Draft {
    /// Creates a draft over `event`.
    #[must_use]
    pub fn new(event: Event, dirty: UpdateTypes) -> Self {
        Self {
            event,
            dirty,
            saved_at: Utc::now(),
        }
    }

    /// Returns the id of the edited event.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.event.parent_event_id
    }

    /// Overlays the dirty groups onto `stored` and returns the fields that changed.
    ///
    /// Without a stored event the draft becomes the event.
    pub fn overlay(&self, stored: Option<&Event>) -> (Event, Vec<EventField>) {
        let Some(stored) = stored else {
            return (self.event.clone(), EventField::ALL.to_vec());
        };
        let mut merged = stored.clone();
        let mut changed = Vec::new();
        let draft = &self.event;

        if self.dirty.contains(UpdateType::Content) {
            let content_fields = [
                (EventField::Title, stored.content.title != draft.content.title),
                (
                    EventField::Description,
                    stored.content.description != draft.content.description,
                ),
                (
                    EventField::Location,
                    stored.content.location != draft.content.location,
                ),
                (
                    EventField::Organizer,
                    stored.content.organizer != draft.content.organizer,
                ),
                (
                    EventField::StartDate,
                    stored.plain.start_date != draft.plain.start_date,
                ),
                (EventField::EndDate, stored.plain.end_date != draft.plain.end_date),
                (
                    EventField::RecurrenceRule,
                    stored.plain.recurrence_rule != draft.plain.recurrence_rule,
                ),
                (EventField::Deleted, stored.plain.deleted != draft.plain.deleted),
            ];
            changed.extend(content_fields.iter().filter(|(_, diff)| *diff).map(|(f, _)| *f));

            merged.content.title = draft.content.title.clone();
            merged.content.description = draft.content.description.clone();
            merged.content.location = draft.content.location.clone();
            merged.content.organizer = draft.content.organizer.clone();
            merged.plain.start_date = draft.plain.start_date;
            merged.plain.end_date = draft.plain.end_date;
            merged.plain.recurrence_rule = draft.plain.recurrence_rule.clone();
            merged.plain.deleted = draft.plain.deleted;
        }
        if self.dirty.contains(UpdateType::Content) || self.dirty.contains(UpdateType::Rsvp) {
            if stored.content.attendees != draft.content.attendees {
                changed.push(EventField::Attendees);
            }
            merged.content.attendees = draft.content.attendees.clone();
        }
        if self.dirty.contains(UpdateType::Preferences) {
            if stored.preferences != draft.preferences {
                changed.push(EventField::Preferences);
            }
            merged.preferences = draft.preferences.clone();
        }
        (merged, changed)
    }
}
