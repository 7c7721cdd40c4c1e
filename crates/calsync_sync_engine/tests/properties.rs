//! Property tests over generated events, rules and edit histories.

use calsync_core::{EventField, FieldMerger, Materializer, TimestampMerger};
use calsync_sync_engine::SyncTrigger;
use calsync_testkit::prelude::*;
use chrono::Duration;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merge_keeps_the_newest_stamp_of_every_field(
        base in event_strategy(),
        local_stamps in field_stamps_strategy(),
        remote_stamps in field_stamps_strategy(),
    ) {
        let mut local = base.clone();
        local.content.title = "local".into();
        local.content.location = "local room".into();
        let mut remote = base;
        remote.content.title = "remote".into();
        remote.content.location = "remote room".into();

        for (field, offset) in &local_stamps {
            if let Some(minutes) = offset {
                local.last_update_key_map.insert(*field, t0() + Duration::minutes(*minutes));
            }
        }
        for (field, offset) in &remote_stamps {
            if let Some(minutes) = offset {
                remote.last_update_key_map.insert(*field, t0() + Duration::minutes(*minutes));
            }
        }

        let merged = TimestampMerger.merge(&local, &remote);
        prop_assert_eq!(merged.parent_event_id, local.parent_event_id);
        for field in EventField::ALL {
            let newest = local.field_timestamp(field).max(remote.field_timestamp(field));
            prop_assert_eq!(merged.field_timestamp(field), newest);
        }

        let remote_title = remote.field_timestamp(EventField::Title) >= local.field_timestamp(EventField::Title);
        prop_assert_eq!(merged.content.title.as_str(), if remote_title { "remote" } else { "local" });
        let remote_room = remote.field_timestamp(EventField::Location) >= local.field_timestamp(EventField::Location);
        prop_assert_eq!(merged.content.location.as_str(), if remote_room { "remote room" } else { "local room" });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_batch_is_pushed_exactly_once(events in prop::collection::vec(event_strategy(), 1..8)) {
        let harness = Harness::with_config(|config| config.with_push_batch_size(3));
        for event in &events {
            harness.store.put(event.clone()).unwrap();
        }

        let first = harness.sync(SyncTrigger::Manual);
        let second = harness.sync(SyncTrigger::Manual);

        prop_assert_eq!(first.pushed(), events.len());
        prop_assert_eq!(second.pushed(), 0);
        prop_assert_eq!(harness.server.stored_count(), events.len());
        prop_assert!(harness.store.unsynced_events(100).unwrap().is_empty());
    }

    #[test]
    fn pulled_series_expand_within_their_rule(
        rule in rule_strategy(),
        start in instant_strategy(),
    ) {
        let mut parent = event("series", start, 45);
        parent.plain.recurrence_rule = Some(rule.clone());

        let harness = Harness::new();
        harness.server.publish(&parent);
        harness.sync(SyncTrigger::Manual);

        let stored = harness.store.get(parent.id()).unwrap().unwrap();
        prop_assert_eq!(stored.plain.recurrence_rule.as_ref(), Some(&rule));

        let materializer = Materializer::default();
        let dates = materializer.date_set(&rule, start).unwrap();
        let occurrences = materializer
            .virtualize(&stored, start, start + Duration::days(4000), &Default::default())
            .unwrap();
        for occurrence in &occurrences {
            prop_assert!(occurrence.plain.start_date != start);
            prop_assert!(dates.contains(&occurrence.plain.start_date));
            prop_assert_eq!(occurrence.plain.parent_recurrence_id, Some(parent.id()));
        }
    }
}
