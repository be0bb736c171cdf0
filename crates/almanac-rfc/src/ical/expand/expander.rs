//! Bounded expansion of a recurrence rule into local candidate start times.

use chrono::{DateTime, Month, TimeDelta, Utc, Weekday};
use chrono_tz::Tz;

use super::rule::{Frequency, RuleError, WeekdayCode, validate_month_days, validate_months};

/// Upper bound on candidates produced for a single rule.
pub const MAX_OCCURRENCES: u16 = 10_000;

/// Everything needed to expand one rule.
///
/// Built once from stored data and the computed boundary; expansion never
/// mutates it. Pattern overrides derive their own params with
/// [`ExpansionParams::with_pattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionParams {
    pub frequency: Frequency,
    pub interval: i32,
    /// First occurrence, as civil time in the event's zone.
    pub anchor: DateTime<Tz>,
    pub count: Option<i32>,
    /// Inclusive upper bound on candidate instants.
    pub boundary: Option<DateTime<Utc>>,
    pub by_day: Vec<WeekdayCode>,
    pub by_month: Vec<i16>,
    pub by_month_day: Vec<i16>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Option<Weekday>,
}

impl ExpansionParams {
    #[must_use]
    pub fn new(frequency: Frequency, anchor: DateTime<Tz>) -> Self {
        Self {
            frequency,
            interval: 1,
            anchor,
            count: None,
            boundary: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        }
    }

    /// Same anchor, count and boundary with a different repetition pattern.
    #[must_use]
    pub fn with_pattern(
        &self,
        frequency: Frequency,
        interval: i32,
        by_day: Vec<WeekdayCode>,
        by_month: Vec<i16>,
        by_month_day: Vec<i16>,
    ) -> Self {
        Self {
            frequency,
            interval,
            by_day,
            by_month,
            by_month_day,
            by_set_pos: Vec::new(),
            week_start: None,
            ..self.clone()
        }
    }

    fn to_rrule(&self) -> Result<rrule::RRule<rrule::Unvalidated>, RuleError> {
        let interval = u16::try_from(self.interval)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| RuleError::InvalidInterval(self.interval.to_string()))?;

        let mut rule = rrule::RRule::new(self.frequency.to_rrule()).interval(interval);

        if let Some(count) = self.count {
            let count =
                u32::try_from(count).map_err(|_e| RuleError::InvalidCount(count.to_string()))?;
            rule = rule.count(count);
        }
        if !self.by_day.is_empty() {
            rule = rule.by_weekday(self.by_day.iter().copied().map(WeekdayCode::to_rrule).collect());
        }
        if !self.by_month.is_empty() {
            let months = validate_months(&self.by_month)?
                .into_iter()
                .map(|m| Month::try_from(m).map_err(|_e| RuleError::InvalidMonth(i64::from(m))))
                .collect::<Result<Vec<_>, _>>()?;
            rule = rule.by_month(&months);
        }
        if !self.by_month_day.is_empty() {
            rule = rule.by_month_day(validate_month_days(&self.by_month_day)?);
        }
        if !self.by_set_pos.is_empty() {
            rule = rule.by_set_pos(self.by_set_pos.clone());
        }
        if let Some(week_start) = self.week_start {
            rule = rule.week_start(week_start);
        }

        Ok(rule)
    }

    /// ## Summary
    /// Expands the rule into ordered, distinct local start times.
    ///
    /// The sequence starts at the anchor, stops at the boundary (inclusive) and
    /// never exceeds [`MAX_OCCURRENCES`]. Candidates keep the anchor's wall-clock
    /// time across DST changes.
    ///
    /// ## Errors
    /// Returns a `RuleError` if the configuration is invalid.
    pub fn expand(&self) -> Result<Vec<DateTime<Tz>>, RuleError> {
        let rule = self.to_rrule()?;
        if self.count == Some(0) {
            return Ok(Vec::new());
        }

        let tz = self.anchor.timezone();
        let rrule_tz = rrule::Tz::Tz(tz);
        let mut set = rule
            .build(self.anchor.with_timezone(&rrule_tz))
            .map_err(|e| RuleError::Expansion(e.to_string()))?;
        if let Some(boundary) = self.boundary {
            // `before` is exclusive
            set = set.before((boundary + TimeDelta::seconds(1)).with_timezone(&rrule_tz));
        }

        let result = set.all(MAX_OCCURRENCES);
        if result.limited && self.count.is_none() && self.boundary.is_none() {
            tracing::warn!(
                anchor = %self.anchor,
                max = MAX_OCCURRENCES,
                "Unbounded recurrence truncated"
            );
        }

        let mut candidates: Vec<DateTime<Tz>> = result
            .dates
            .into_iter()
            .map(|dt| dt.with_timezone(&tz))
            .take_while(|dt| self.boundary.is_none_or(|b| dt.to_utc() <= b))
            .collect();
        candidates.dedup();

        Ok(candidates)
    }
}
