//! Field-level merge of a local event with its server copy.

use crate::model::{Event, EventField};

/// Combines the local and remote versions of the same event.
pub trait FieldMerger: Send + Sync {
    /// Returns the merged event. Identity and local bookkeeping come from
    /// `local`.
    fn merge(&self, local: &Event, remote: &Event) -> Event;
}

/// Last-writer-wins per field, by [`Event::last_update_key_map`].
///
/// A field without a timestamp is older than any stamped field. On a tie the
/// server copy wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampMerger;

impl FieldMerger for TimestampMerger {
    fn merge(&self, local: &Event, remote: &Event) -> Event {
        let mut merged = local.clone();
        for field in EventField::ALL {
            let local_at = local.field_timestamp(field);
            let remote_at = remote.field_timestamp(field);
            if remote_at >= local_at {
                copy_field(&mut merged, remote, field);
                if let Some(at) = remote_at {
                    merged.last_update_key_map.insert(field, at);
                }
            }
        }
        merged.plain.sequence = local.plain.sequence.max(remote.plain.sequence);
        merged
    }
}

fn copy_field(target: &mut Event, source: &Event, field: EventField) {
    match field {
        EventField::Title => target.content.title.clone_from(&source.content.title),
        EventField::Description => target
            .content
            .description
            .clone_from(&source.content.description),
        EventField::Location => target.content.location.clone_from(&source.content.location),
        EventField::Organizer => target
            .content
            .organizer
            .clone_from(&source.content.organizer),
        EventField::Attendees => target
            .content
            .attendees
            .clone_from(&source.content.attendees),
        EventField::StartDate => target.plain.start_date = source.plain.start_date,
        EventField::EndDate => target.plain.end_date = source.plain.end_date,
        EventField::RecurrenceRule => target
            .plain
            .recurrence_rule
            .clone_from(&source.plain.recurrence_rule),
        EventField::Series => {
            target.plain.parent_recurrence_id = source.plain.parent_recurrence_id;
            target.plain.recurrence_date = source.plain.recurrence_date;
        }
        EventField::Deleted => target.plain.deleted = source.plain.deleted,
        EventField::Preferences => target.preferences.clone_from(&source.preferences),
    }
}
