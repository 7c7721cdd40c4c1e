//! Virtual occurrences and rule-change reconciliation.

use super::{RRuleExpander, RecurrenceRule, RuleExpander};
use crate::error::{CoreError, CoreResult};
use crate::model::{Event, EventField, EventId};
use crate::store::StoreTransaction;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Occurrence dates already backed by a persisted child, per series.
#[derive(Debug, Clone, Default)]
pub struct MaterializedIndex {
    dates: HashMap<EventId, BTreeSet<DateTime<Utc>>>,
}

impl MaterializedIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index from loaded events; non-children are ignored.
    ///
    /// Soft-deleted children are included: a tombstone still covers its date.
    pub fn from_children<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut index = Self::new();
        for event in events {
            if let (Some(parent), Some(date)) =
                (event.plain.parent_recurrence_id, event.plain.recurrence_date)
            {
                index.insert(parent, date);
            }
        }
        index
    }

    /// Records that `parent` has a child at `date`.
    pub fn insert(&mut self, parent: EventId, date: DateTime<Utc>) {
        self.dates.entry(parent).or_default().insert(date);
    }

    /// Returns true if `parent` has a child at `date`.
    #[must_use]
    pub fn covers(&self, parent: EventId, date: DateTime<Utc>) -> bool {
        self.dates
            .get(&parent)
            .is_some_and(|dates| dates.contains(&date))
    }

    /// Returns the number of indexed children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dates.values().map(BTreeSet::len).sum()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rule and anchor of a series before an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesAnchor {
    /// Previous rule.
    pub rule: RecurrenceRule,
    /// Previous start of the parent.
    pub start: DateTime<Utc>,
}

impl SeriesAnchor {
    /// Captures the anchor of a recurring parent.
    #[must_use]
    pub fn of(parent: &Event) -> Option<Self> {
        parent.plain.recurrence_rule.clone().map(|rule| Self {
            rule,
            start: parent.plain.start_date,
        })
    }

    /// Returns true if `parent` still has exactly this rule and start.
    #[must_use]
    pub fn matches(&self, parent: &Event) -> bool {
        parent.plain.start_date == self.start
            && parent.plain.recurrence_rule.as_ref() == Some(&self.rule)
    }
}

/// How a rule change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileKind {
    /// Rule and anchor are unchanged; nothing was written.
    Unchanged,
    /// Same pattern and date count; children were remapped by index.
    PureShift,
    /// The series moved to a new parent id.
    Split {
        /// Id of the tombstoned parent.
        previous_id: EventId,
        /// Id the series continues under.
        new_id: EventId,
    },
    /// The rule was removed; every child was tombstoned.
    Detached,
}

/// Outcome of [`Materializer::reconcile_rule_change`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// What kind of change was applied.
    pub kind: ReconcileKind,
    /// Events that now exist under a new identity, or were remapped.
    pub added: Vec<Event>,
    /// Events that were soft-deleted.
    pub removed: Vec<Event>,
}

impl Reconciliation {
    fn unchanged() -> Self {
        Self {
            kind: ReconcileKind::Unchanged,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Expands series into occurrences and keeps children consistent with rule edits.
#[derive(Clone)]
pub struct Materializer {
    expander: Arc<dyn RuleExpander>,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(Arc::new(RRuleExpander))
    }
}

impl fmt::Debug for Materializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materializer").finish_non_exhaustive()
    }
}

impl Materializer {
    /// Creates a materializer over a custom expander.
    pub fn new(expander: Arc<dyn RuleExpander>) -> Self {
        Self { expander }
    }

    /// Returns the full, capped date set of a rule anchored at `start`.
    pub fn date_set(
        &self,
        rule: &RecurrenceRule,
        start: DateTime<Utc>,
    ) -> CoreResult<Vec<DateTime<Utc>>> {
        self.expander.expand_all(rule, start)
    }

    /// Computes the ephemeral occurrences of `parent` overlapping `[from, to]`.
    ///
    /// The parent's own start and every date covered by `index` are skipped.
    /// Each occurrence gets a fresh id.
    pub fn virtualize(
        &self,
        parent: &Event,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        index: &MaterializedIndex,
    ) -> CoreResult<Vec<Event>> {
        let Some(rule) = parent.plain.recurrence_rule.as_ref() else {
            return Ok(Vec::new());
        };
        if parent.plain.deleted {
            return Ok(Vec::new());
        }
        let duration = parent.duration();
        let anchor = parent.plain.start_date;
        let dates = self
            .expander
            .expand_between(rule, anchor, from - duration, to)?;

        Ok(dates
            .into_iter()
            .filter(|date| *date != anchor)
            .filter(|date| !index.covers(parent.parent_event_id, *date))
            .map(|date| parent.occurrence_at(date))
            .filter(|occurrence| {
                occurrence.plain.start_date <= to && occurrence.plain.end_date >= from
            })
            .collect())
    }

    /// Brings the persisted children of `parent` in line with its current rule.
    ///
    /// `previous` is the rule and start before the edit. `parent` carries the
    /// edited values; on a split it is re-keyed to the new series id. Every
    /// write, including the parent itself, goes through `txn`.
    pub fn reconcile_rule_change(
        &self,
        txn: &mut StoreTransaction<'_>,
        previous: &SeriesAnchor,
        parent: &mut Event,
    ) -> CoreResult<Reconciliation> {
        if previous.matches(parent) {
            return Ok(Reconciliation::unchanged());
        }
        let now = Utc::now();
        let old_id = parent.parent_event_id;
        let children = txn.children_of(old_id);

        let Some(new_rule) = parent.plain.recurrence_rule.clone() else {
            return Ok(detach(txn, parent, children, now));
        };

        let old_dates = self.date_set(&previous.rule, previous.start)?;
        let new_dates = self.date_set(&new_rule, parent.plain.start_date)?;

        if previous.rule.same_pattern(&new_rule) && old_dates.len() == new_dates.len() {
            let mut added = Vec::new();
            for mut child in children {
                let Some(date) = child.plain.recurrence_date else {
                    continue;
                };
                let Some(position) = old_dates.iter().position(|d| *d == date) else {
                    continue;
                };
                let shifted = new_dates[position];
                if shifted == date {
                    continue;
                }
                child.plain.recurrence_date = Some(shifted);
                child.touch(&[EventField::Series], now);
                txn.put_event(child.clone());
                added.push(child);
            }
            txn.put_event(parent.clone());
            tracing::debug!(
                parent = %old_id,
                remapped = added.len(),
                "recurrence change applied as pure shift"
            );
            return Ok(Reconciliation {
                kind: ReconcileKind::PureShift,
                added,
                removed: Vec::new(),
            });
        }

        let new_dates: BTreeSet<DateTime<Utc>> = new_dates.into_iter().collect();
        let new_id = EventId::new();
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for mut child in children {
            let fits = child
                .plain
                .recurrence_date
                .is_some_and(|date| new_dates.contains(&date));
            if fits {
                child.plain.parent_recurrence_id = Some(new_id);
                child.touch(&[EventField::Series], now);
                txn.put_event(child.clone());
                added.push(child);
            } else if !child.plain.deleted {
                child.mark_deleted(now);
                txn.put_event(child.clone());
                removed.push(child);
            }
        }

        let mut tombstone = txn
            .event(old_id)
            .cloned()
            .ok_or(CoreError::EventNotFound(old_id))?;
        tombstone.mark_deleted(now);
        txn.put_event(tombstone.clone());
        removed.push(tombstone);

        parent.parent_event_id = new_id;
        parent.local.created_at = now;
        parent.touch(&EventField::ALL, now);
        txn.put_event(parent.clone());
        added.push(parent.clone());

        tracing::info!(
            previous = %old_id,
            new = %new_id,
            kept = added.len() - 1,
            tombstoned = removed.len() - 1,
            "recurrence change split the series"
        );
        Ok(Reconciliation {
            kind: ReconcileKind::Split {
                previous_id: old_id,
                new_id,
            },
            added,
            removed,
        })
    }
}

fn detach(
    txn: &mut StoreTransaction<'_>,
    parent: &Event,
    children: Vec<Event>,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut removed = Vec::new();
    for mut child in children.into_iter().filter(|c| !c.plain.deleted) {
        child.mark_deleted(now);
        txn.put_event(child.clone());
        removed.push(child);
    }
    txn.put_event(parent.clone());
    Reconciliation {
        kind: ReconcileKind::Detached,
        added: Vec::new(),
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncState;
    use crate::store::EventStore;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    fn series(rule: RecurrenceRule) -> Event {
        let mut parent = Event::new("daily sync", t0(), t0() + Duration::minutes(30));
        parent.plain.recurrence_rule = Some(rule);
        parent
    }

    fn child_of(parent: &Event, date: DateTime<Utc>) -> Event {
        let mut child = parent.occurrence_at(date);
        child.content.title = "moved".into();
        child
    }

    #[test]
    fn virtualization_skips_anchor_and_materialized_dates() {
        let parent = series(RecurrenceRule::daily().with_count(12));
        let child = child_of(&parent, t0() + Duration::days(3));
        let index = MaterializedIndex::from_children([&child]);

        let occurrences = Materializer::default()
            .virtualize(&parent, t0(), t0() + Duration::days(30), &index)
            .unwrap();

        assert_eq!(occurrences.len(), 10);
        assert!(occurrences
            .iter()
            .all(|o| o.plain.recurrence_date != child.plain.recurrence_date));
        assert!(occurrences
            .iter()
            .all(|o| o.plain.parent_recurrence_id == Some(parent.id())));
    }

    #[test]
    fn virtual_ids_are_fresh_per_call() {
        let parent = series(RecurrenceRule::daily().with_count(3));
        let index = MaterializedIndex::new();
        let materializer = Materializer::default();
        let window_end = t0() + Duration::days(5);
        let first = materializer.virtualize(&parent, t0(), window_end, &index).unwrap();
        let second = materializer.virtualize(&parent, t0(), window_end, &index).unwrap();
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].id(), second[0].id());
        assert_eq!(first[0].plain.recurrence_date, second[0].plain.recurrence_date);
    }

    #[test]
    fn virtualization_includes_occurrence_overlapping_window_start() {
        let parent = series(RecurrenceRule::daily().with_count(5));
        let from = t0() + Duration::days(1) + Duration::minutes(10);
        let to = t0() + Duration::days(1) + Duration::minutes(20);
        let occurrences = Materializer::default()
            .virtualize(&parent, from, to, &MaterializedIndex::new())
            .unwrap();
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].plain.start_date, t0() + Duration::days(1));
    }

    #[test]
    fn pure_shift_moves_every_child_by_the_same_offset() {
        let store = EventStore::open_in_memory().unwrap();
        let parent = series(RecurrenceRule::daily().with_count(10));
        let children = [
            child_of(&parent, t0() + Duration::days(1)),
            child_of(&parent, t0() + Duration::days(4)),
        ];
        store
            .transaction(|txn| {
                txn.put_event(parent.clone());
                for child in &children {
                    txn.put_event(child.clone());
                }
                Ok(())
            })
            .unwrap();

        let previous = SeriesAnchor::of(&parent).unwrap();
        let mut edited = parent.clone();
        edited.plain.start_date = t0() + Duration::hours(1);
        edited.plain.end_date = edited.plain.start_date + Duration::minutes(30);

        let outcome = store
            .transaction(|txn| {
                Materializer::default().reconcile_rule_change(txn, &previous, &mut edited)
            })
            .unwrap();
        assert_eq!(outcome.kind, ReconcileKind::PureShift);
        assert_eq!(edited.id(), parent.id());

        for child in &children {
            let stored = store.get(child.id()).unwrap().unwrap();
            assert_eq!(stored.plain.parent_recurrence_id, Some(parent.id()));
            assert_eq!(
                stored.plain.recurrence_date,
                child.plain.recurrence_date.map(|d| d + Duration::hours(1))
            );
            assert_eq!(stored.local.sync_state, SyncState::Waiting);
        }
    }

    #[test]
    fn structural_change_splits_the_series() {
        let store = EventStore::open_in_memory().unwrap();
        let parent = series(RecurrenceRule::daily());
        let day_one = child_of(&parent, t0() + Duration::days(1));
        let day_two = child_of(&parent, t0() + Duration::days(2));
        store
            .transaction(|txn| {
                txn.put_event(parent.clone());
                txn.put_event(day_one.clone());
                txn.put_event(day_two.clone());
                Ok(())
            })
            .unwrap();

        let previous = SeriesAnchor::of(&parent).unwrap();
        let mut edited = parent.clone();
        edited.plain.recurrence_rule = Some(RecurrenceRule::daily().with_interval(2));

        let outcome = store
            .transaction(|txn| {
                Materializer::default().reconcile_rule_change(txn, &previous, &mut edited)
            })
            .unwrap();

        let ReconcileKind::Split {
            previous_id,
            new_id,
        } = outcome.kind
        else {
            panic!("expected split, got {:?}", outcome.kind);
        };
        assert_eq!(previous_id, parent.id());
        assert_eq!(edited.id(), new_id);

        let gone = store.get(day_one.id()).unwrap().unwrap();
        assert!(gone.plain.deleted);

        let kept = store.get(day_two.id()).unwrap().unwrap();
        assert!(!kept.plain.deleted);
        assert_eq!(kept.plain.parent_recurrence_id, Some(new_id));

        let old_parent = store.get(parent.id()).unwrap().unwrap();
        assert!(old_parent.plain.deleted);

        let new_parent = store.get(new_id).unwrap().unwrap();
        assert!(!new_parent.plain.deleted);
        assert_eq!(
            new_parent.plain.recurrence_rule,
            Some(RecurrenceRule::daily().with_interval(2))
        );
    }

    #[test]
    fn failed_reconciliation_leaves_no_partial_writes() {
        let store = EventStore::open_in_memory().unwrap();
        let parent = series(RecurrenceRule::daily());
        let child = child_of(&parent, t0() + Duration::days(1));
        store
            .transaction(|txn| {
                txn.put_event(parent.clone());
                txn.put_event(child.clone());
                Ok(())
            })
            .unwrap();

        let previous = SeriesAnchor::of(&parent).unwrap();
        let mut edited = parent.clone();
        edited.plain.recurrence_rule = Some(RecurrenceRule::daily().with_interval(0));

        let result = store.transaction(|txn| {
            Materializer::default().reconcile_rule_change(txn, &previous, &mut edited)
        });
        assert!(matches!(result, Err(CoreError::InvalidRule { .. })));
        assert_eq!(store.get(child.id()).unwrap().unwrap(), child);
        assert_eq!(store.get(parent.id()).unwrap().unwrap(), parent);
    }

    #[test]
    fn removing_the_rule_tombstones_children() {
        let store = EventStore::open_in_memory().unwrap();
        let parent = series(RecurrenceRule::daily().with_count(5));
        let child = child_of(&parent, t0() + Duration::days(2));
        store
            .transaction(|txn| {
                txn.put_event(parent.clone());
                txn.put_event(child.clone());
                Ok(())
            })
            .unwrap();

        let previous = SeriesAnchor::of(&parent).unwrap();
        let mut edited = parent.clone();
        edited.plain.recurrence_rule = None;
        let outcome = store
            .transaction(|txn| {
                Materializer::default().reconcile_rule_change(txn, &previous, &mut edited)
            })
            .unwrap();
        assert_eq!(outcome.kind, ReconcileKind::Detached);
        assert!(store.get(child.id()).unwrap().unwrap().plain.deleted);
        assert_eq!(edited.id(), parent.id());
    }

    proptest! {
        #[test]
        fn virtual_and_materialized_dates_partition_the_series(
            count in 2u32..40,
            picks in prop::collection::btree_set(1i64..40, 0..5),
        ) {
            let parent = series(RecurrenceRule::daily().with_count(count));
            let children: Vec<Event> = picks
                .iter()
                .filter(|day| **day < i64::from(count))
                .map(|day| child_of(&parent, t0() + Duration::days(*day)))
                .collect();
            let index = MaterializedIndex::from_children(&children);
            let occurrences = Materializer::default()
                .virtualize(&parent, t0(), t0() + Duration::days(60), &index)
                .unwrap();
            prop_assert_eq!(occurrences.len(), count as usize - 1 - children.len());
        }
    }
}
