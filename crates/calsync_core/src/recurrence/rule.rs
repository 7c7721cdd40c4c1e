//! Serializable recurrence rule.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Repetition unit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` months.
    Monthly,
    /// Every `interval` years.
    Yearly,
}

impl Frequency {
    fn as_rrule(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

/// Recurrence rule of a series parent.
///
/// Plain data that crosses every serialization boundary (journal, wire). It is
/// turned into an `rrule::RRuleSet` only when dates are needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    /// Repetition unit.
    pub frequency: Frequency,
    /// Units between occurrences, at least 1.
    pub interval: u32,
    /// Weekday filter.
    #[serde(default)]
    pub by_days: Vec<Weekday>,
    /// Total number of occurrences, including the first.
    #[serde(default)]
    pub count: Option<u32>,
    /// Last instant an occurrence may start at.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Occurrence starts removed from the series.
    #[serde(default)]
    pub exclusions: Vec<DateTime<Utc>>,
}

impl RecurrenceRule {
    /// Creates an unbounded rule with interval 1.
    #[must_use]
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_days: Vec::new(),
            count: None,
            until: None,
            exclusions: Vec::new(),
        }
    }

    /// Every day.
    #[must_use]
    pub fn daily() -> Self {
        Self::new(Frequency::Daily)
    }

    /// Every week on `days`.
    #[must_use]
    pub fn weekly(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            by_days: days.into_iter().collect(),
            ..Self::new(Frequency::Weekly)
        }
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Limits the series to `count` occurrences.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Ends the series at `until`.
    #[must_use]
    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Removes one occurrence.
    #[must_use]
    pub fn with_exclusion(mut self, date: DateTime<Utc>) -> Self {
        self.exclusions.push(date);
        self
    }

    /// Returns true if both rules repeat with the same unit, step and weekdays.
    ///
    /// Weekdays are compared by value, in order. Count, until and exclusions
    /// are not part of the pattern.
    #[must_use]
    pub fn same_pattern(&self, other: &RecurrenceRule) -> bool {
        self.frequency == other.frequency
            && self.interval == other.interval
            && self.by_days == other.by_days
    }

    /// Returns true if the rule has neither a count nor an end.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.count.is_none() && self.until.is_none()
    }

    /// Rejects rules that cannot be evaluated.
    pub fn validate(&self) -> CoreResult<()> {
        if self.interval == 0 {
            return Err(CoreError::invalid_rule("interval must be at least 1"));
        }
        if self.count == Some(0) {
            return Err(CoreError::invalid_rule("count must be at least 1"));
        }
        if self.count.is_some() && self.until.is_some() {
            return Err(CoreError::invalid_rule("count and until are exclusive"));
        }
        Ok(())
    }

    /// Renders the rule as iCalendar text anchored at `start`.
    #[must_use]
    pub fn to_ical(&self, start: DateTime<Utc>) -> String {
        let mut rule = format!(
            "FREQ={};INTERVAL={}",
            self.frequency.as_rrule(),
            self.interval
        );
        if !self.by_days.is_empty() {
            let days: Vec<&str> = self.by_days.iter().map(|d| weekday_code(*d)).collect();
            rule.push_str(";BYDAY=");
            rule.push_str(&days.join(","));
        }
        if let Some(count) = self.count {
            rule.push_str(&format!(";COUNT={count}"));
        }
        if let Some(until) = self.until {
            rule.push_str(&format!(";UNTIL={}", until.format(ICAL_UTC)));
        }

        let mut lines = vec![
            format!("DTSTART:{}", start.format(ICAL_UTC)),
            format!("RRULE:{rule}"),
        ];
        for exclusion in &self.exclusions {
            lines.push(format!("EXDATE:{}", exclusion.format(ICAL_UTC)));
        }
        lines.join("\n")
    }
}

const ICAL_UTC: &str = "%Y%m%dT%H%M%SZ";

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ical_text() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let rule = RecurrenceRule::weekly([Weekday::Mon, Weekday::Wed])
            .with_interval(2)
            .with_count(6)
            .with_exclusion(Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap());
        assert_eq!(
            rule.to_ical(start),
            "DTSTART:20240101T090000Z\n\
             RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=6\n\
             EXDATE:20240103T090000Z"
        );
    }

    #[test]
    fn bounds() {
        let until = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(RecurrenceRule::daily().is_unbounded());
        assert!(!RecurrenceRule::daily().with_count(3).is_unbounded());
        assert!(!RecurrenceRule::daily().with_until(until).is_unbounded());
    }

    #[test]
    fn pattern_ignores_bounds() {
        let a = RecurrenceRule::daily().with_count(3);
        let b = RecurrenceRule::daily().with_count(9);
        assert!(a.same_pattern(&b));
        assert!(!a.same_pattern(&RecurrenceRule::daily().with_interval(2)));
    }

    #[test]
    fn pattern_compares_weekdays_by_value() {
        let a = RecurrenceRule::weekly([Weekday::Mon, Weekday::Fri]);
        let b = RecurrenceRule::weekly(vec![Weekday::Mon, Weekday::Fri]);
        assert!(a.same_pattern(&b));
        let reordered = RecurrenceRule::weekly([Weekday::Fri, Weekday::Mon]);
        assert!(!a.same_pattern(&reordered));
    }

    #[test]
    fn validation() {
        assert!(RecurrenceRule::daily().validate().is_ok());
        assert!(RecurrenceRule::daily().with_interval(0).validate().is_err());
        assert!(RecurrenceRule::daily().with_count(0).validate().is_err());
        let both = RecurrenceRule::daily()
            .with_count(2)
            .with_until(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert!(both.validate().is_err());
    }
}
