//! Date-set expansion of recurrence rules.

use super::RecurrenceRule;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration, Utc};
use rrule::RRuleSet;

/// Upper bound on the instances computed for one rule.
///
/// Unbounded rules are truncated here, so two unbounded rules with the same
/// pattern always yield date sets of equal length.
pub const MAX_EXPANSION: u16 = 1000;

/// Turns a rule anchored at a start instant into concrete occurrence starts.
pub trait RuleExpander: Send + Sync {
    /// Returns every occurrence start, capped at [`MAX_EXPANSION`], in order.
    ///
    /// The anchor itself is the first occurrence.
    fn expand_all(&self, rule: &RecurrenceRule, start: DateTime<Utc>)
        -> CoreResult<Vec<DateTime<Utc>>>;

    /// Returns the occurrence starts within `[from, to]`, in order.
    fn expand_between(
        &self,
        rule: &RecurrenceRule,
        start: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<DateTime<Utc>>> {
        Ok(self
            .expand_all(rule, start)?
            .into_iter()
            .filter(|date| *date >= from && *date <= to)
            .collect())
    }
}

/// [`RuleExpander`] backed by the `rrule` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RRuleExpander;

impl RRuleExpander {
    fn rule_set(rule: &RecurrenceRule, start: DateTime<Utc>) -> CoreResult<RRuleSet> {
        rule.validate()?;
        rule.to_ical(start)
            .parse()
            .map_err(|e| CoreError::invalid_rule(format!("{e}")))
    }
}

impl RuleExpander for RRuleExpander {
    fn expand_all(
        &self,
        rule: &RecurrenceRule,
        start: DateTime<Utc>,
    ) -> CoreResult<Vec<DateTime<Utc>>> {
        let result = Self::rule_set(rule, start)?.all(MAX_EXPANSION);
        if result.limited && !rule.is_unbounded() {
            tracing::warn!(
                count = ?rule.count,
                until = ?rule.until,
                cap = MAX_EXPANSION,
                "bounded recurrence truncated at expansion cap"
            );
        }
        Ok(result
            .dates
            .iter()
            .map(|date| date.with_timezone(&Utc))
            .collect())
    }

    fn expand_between(
        &self,
        rule: &RecurrenceRule,
        start: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<DateTime<Utc>>> {
        // after/before are exclusive; widen by a second and filter exactly below.
        let tz: rrule::Tz = Utc.into();
        let after = (from - Duration::seconds(1)).with_timezone(&tz);
        let before = (to + Duration::seconds(1)).with_timezone(&tz);
        let result = Self::rule_set(rule, start)?
            .after(after)
            .before(before)
            .all(MAX_EXPANSION);
        Ok(result
            .dates
            .iter()
            .map(|date| date.with_timezone(&Utc))
            .filter(|date| *date >= from && *date <= to)
            .collect())
    }
}
