//! Event window listing.

use super::print_json;
use crate::Format;
use calsync_core::{Event, EventId, EventStore, MaterializedIndex, SyncState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One listed event or occurrence.
#[derive(Debug, Serialize)]
pub struct EventRow {
    /// Stored id; a fresh id for virtual occurrences.
    pub id: EventId,
    /// Title.
    pub title: String,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// Series the row belongs to, if any.
    pub series: Option<EventId>,
    /// True for a series parent.
    pub recurring: bool,
    /// True for an occurrence computed from a rule and not stored.
    pub is_virtual: bool,
    /// Whether the server has acknowledged the row.
    pub synced: bool,
}

impl EventRow {
    fn stored(event: &Event) -> Self {
        Self::build(event, false)
    }

    fn occurrence(event: &Event) -> Self {
        Self::build(event, true)
    }

    fn build(event: &Event, is_virtual: bool) -> Self {
        Self {
            id: event.id(),
            title: event.content.title.clone(),
            start: event.plain.start_date,
            end: event.plain.end_date,
            series: event.plain.parent_recurrence_id,
            recurring: event.is_recurring_parent(),
            is_virtual,
            synced: !is_virtual && event.local.sync_state == SyncState::Done,
        }
    }
}

/// Returns the rows overlapping `[from, to)`, ordered by start.
pub fn rows(
    store: &EventStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    expand: bool,
) -> Result<Vec<EventRow>, Box<dyn std::error::Error>> {
    let mut rows: Vec<EventRow> = store
        .range_query(from, to)?
        .iter()
        .map(EventRow::stored)
        .collect();

    if expand {
        let materializer = store.materializer();
        for parent in store.query_recurring_parents()? {
            let children = store.children_of(parent.id())?;
            let index = MaterializedIndex::from_children(&children);
            for occurrence in materializer.virtualize(&parent, from, to, &index)? {
                if occurrence.plain.start_date < to {
                    rows.push(EventRow::occurrence(&occurrence));
                }
            }
        }
    }

    rows.sort_by(|a, b| a.start.cmp(&b.start).then(a.title.cmp(&b.title)));
    Ok(rows)
}

/// Runs the events command.
pub fn run(
    store: &EventStore,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    expand: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = rows(store, from, to, expand)?;
    match format {
        Format::Json => print_json(&rows)?,
        Format::Text => {
            if rows.is_empty() {
                println!("No events between {} and {}", from.to_rfc3339(), to.to_rfc3339());
            }
            for row in &rows {
                let marker = match (row.recurring, row.is_virtual, row.series.is_some()) {
                    (true, _, _) => "series",
                    (_, true, _) => "occurrence",
                    (_, _, true) => "override",
                    _ => "single",
                };
                println!(
                    "{}  {}  {:<10}  {}{}",
                    row.start.format("%Y-%m-%d %H:%M"),
                    row.end.format("%H:%M"),
                    marker,
                    row.title,
                    if row.synced || row.is_virtual { "" } else { "  *" }
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::replica;
    use calsync_core::{Frequency, RecurrenceRule};
    use chrono::{Duration, TimeZone};

    #[test]
    fn expansion_adds_virtual_occurrences() {
        let (_dir, store) = replica();
        let start = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let mut series = Event::new("standup", start, start + Duration::minutes(15));
        series.plain.recurrence_rule = Some(RecurrenceRule::new(Frequency::Daily).with_count(5));
        store.put(series.clone()).unwrap();

        let from = start - Duration::hours(1);
        let to = start + Duration::days(7);

        let plain = rows(&store, from, to, false).unwrap();
        assert_eq!(plain.len(), 1);
        assert!(plain[0].recurring);

        let expanded = rows(&store, from, to, true).unwrap();
        assert_eq!(expanded.len(), 5);
        assert_eq!(expanded.iter().filter(|row| row.is_virtual).count(), 4);
        assert!(expanded.windows(2).all(|pair| pair[0].start <= pair[1].start));
        assert!(expanded
            .iter()
            .filter(|row| row.is_virtual)
            .all(|row| row.series == Some(series.id())));
    }
}
