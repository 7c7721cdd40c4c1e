//! Recurrence rules, expansion and the series materializer.
//!
//! Rules are stored as plain [`RecurrenceRule`] values and expanded on demand
//! through a [`RuleExpander`]. The [`Materializer`] covers both directions:
//!
//! - read path: [`Materializer::virtualize`] computes ephemeral occurrences for
//!   a window, skipping dates already backed by a persisted child;
//! - write path: [`Materializer::reconcile_rule_change`] keeps persisted
//!   children consistent when a parent's rule or start changes, either by
//!   remapping dates in place or by splitting the series under a new id.

mod expand;
mod materializer;
mod rule;

pub use expand::{RRuleExpander, RuleExpander, MAX_EXPANSION};
pub use materializer::{
    Materializer, MaterializedIndex, ReconcileKind, Reconciliation, SeriesAnchor,
};
pub use rule::{Frequency, RecurrenceRule};
