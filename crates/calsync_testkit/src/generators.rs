//! Property-based test generators using proptest.

use crate::fixtures::t0;
use calsync_core::{Event, EventField, Frequency, RecurrenceRule};
use chrono::{DateTime, Duration, Utc, Weekday};
use proptest::prelude::*;

fn weekday(n: u8) -> Weekday {
    match n {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Strategy for instants within a year after [`t0`], on the minute.
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 60).prop_map(|minutes| t0() + Duration::minutes(minutes))
}

/// Strategy for valid, bounded recurrence rules.
pub fn rule_strategy() -> impl Strategy<Value = RecurrenceRule> {
    (
        prop_oneof![
            Just(Frequency::Daily),
            Just(Frequency::Weekly),
            Just(Frequency::Monthly),
        ],
        1u32..4,
        1u32..30,
        prop::collection::btree_set(0u8..7, 0..3),
    )
        .prop_map(|(frequency, interval, count, days)| {
            let mut rule = RecurrenceRule::new(frequency)
                .with_interval(interval)
                .with_count(count);
            if frequency == Frequency::Weekly {
                rule.by_days = days.into_iter().map(weekday).collect();
            }
            rule
        })
}

/// Strategy for single events with a title, start and length.
pub fn event_strategy() -> impl Strategy<Value = Event> {
    (
        prop::string::string_regex("[a-z][a-z ]{0,20}").expect("Invalid regex"),
        instant_strategy(),
        1i64..240,
    )
        .prop_map(|(title, start, minutes)| {
            Event::new(title, start, start + Duration::minutes(minutes))
        })
}

/// Strategy for per-field edit times, as offsets in minutes from [`t0`].
pub fn field_stamps_strategy() -> impl Strategy<Value = Vec<(EventField, Option<i64>)>> {
    let fields: Vec<_> = EventField::ALL
        .iter()
        .map(|field| (Just(*field), prop::option::of(0i64..1000)))
        .collect();
    fields
}
