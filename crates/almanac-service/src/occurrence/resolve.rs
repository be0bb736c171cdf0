//! Applying exceptions to a candidate occurrence.
//!
//! Three tiers can supply an occurrence's values, highest first: an override
//! for that exact original instant, a pattern override whose secondary rule
//! also produces the instant, and the event itself. The tier is chosen once per
//! candidate; fields are then taken from the first tier that has a non-empty
//! value.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;

use almanac_db::model::event::Event;
use almanac_db::model::rule::{EventOverride, RecurrenceOverride};
use almanac_rfc::ical::expand::{ExpansionParams, RuleError, WeekdayCode, localize};

/// The tier that applies to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOverride<'a> {
    Exact(&'a EventOverride),
    Pattern(&'a RecurrenceOverride),
    Default,
}

/// An occurrence's final values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOccurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
}

/// Returns the first candidate that is present and not blank.
pub fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

/// Exceptions of one rule, keyed by the original UTC instant they apply to.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    exact: HashMap<DateTime<Utc>, EventOverride>,
    pattern: HashMap<DateTime<Utc>, RecurrenceOverride>,
}

impl OverrideSet {
    /// ## Summary
    /// Indexes exact overrides and matches pattern overrides against the rule.
    ///
    /// Each pattern is expanded with the parent's anchor, count and boundary.
    /// When several patterns produce the same instant, the highest `priority`
    /// wins, then the most recently created.
    ///
    /// ## Errors
    /// Returns a `RuleError` if a pattern's own configuration is invalid.
    pub fn new(
        exact: Vec<EventOverride>,
        patterns: &[RecurrenceOverride],
        params: &ExpansionParams,
    ) -> Result<Self, RuleError> {
        let mut ordered: Vec<&RecurrenceOverride> = patterns.iter().collect();
        ordered.sort_by_key(|p| (p.priority, p.created_at, p.id));

        let mut pattern = HashMap::new();
        for candidate in ordered {
            let pattern_params = params.with_pattern(
                candidate.frequency.into(),
                candidate.repeat_interval,
                WeekdayCode::parse_list(&candidate.by_day)?,
                candidate.by_month.clone(),
                candidate.by_month_day.clone(),
            );
            for instant in pattern_params.expand()? {
                pattern.insert(instant.to_utc(), candidate.clone());
            }
        }

        Ok(Self {
            exact: exact.into_iter().map(|o| (o.recurrence_at, o)).collect(),
            pattern,
        })
    }

    /// Chooses the tier for the candidate originally starting at `instant`.
    #[must_use]
    pub fn applied(&self, instant: DateTime<Utc>) -> AppliedOverride<'_> {
        if let Some(exact) = self.exact.get(&instant) {
            AppliedOverride::Exact(exact)
        } else if let Some(pattern) = self.pattern.get(&instant) {
            AppliedOverride::Pattern(pattern)
        } else {
            AppliedOverride::Default
        }
    }
}

/// ## Summary
/// Computes the final values of one candidate occurrence.
///
/// Exact overrides replace start/end with absolute instants. Pattern overrides
/// replace the time of day on the candidate's local date; an end time earlier
/// than the start moves to the next day. A missing start keeps the candidate,
/// a missing end is start plus `duration`.
#[must_use]
pub fn resolve_occurrence(
    candidate: DateTime<Tz>,
    event: &Event,
    duration: TimeDelta,
    applied: AppliedOverride<'_>,
) -> ResolvedOccurrence {
    let tz = candidate.timezone();
    let on_candidate_date =
        |time: NaiveTime| localize(candidate.date_naive().and_time(time), tz).to_utc();

    let (start, end, title, description, location) = match applied {
        AppliedOverride::Exact(o) => {
            let start = o.new_start.unwrap_or_else(|| candidate.to_utc());
            let end = o.new_end.map_or(start + duration, |end| end.max(start));
            (
                start,
                end,
                o.new_title.as_deref(),
                o.new_description.as_deref(),
                o.new_location.as_deref(),
            )
        }
        AppliedOverride::Pattern(p) => {
            let start = p
                .new_start_time
                .map_or_else(|| candidate.to_utc(), on_candidate_date);
            let end = p.new_end_time.map_or(start + duration, |time| {
                let end = on_candidate_date(time);
                if end < start {
                    localize(
                        (candidate.date_naive() + TimeDelta::days(1)).and_time(time),
                        tz,
                    )
                    .to_utc()
                } else {
                    end
                }
            });
            (
                start,
                end,
                p.new_title.as_deref(),
                p.new_description.as_deref(),
                p.new_location.as_deref(),
            )
        }
        AppliedOverride::Default => (candidate.to_utc(), candidate.to_utc() + duration, None, None, None),
    };

    ResolvedOccurrence {
        start,
        end,
        title: first_non_empty([title, Some(event.title.as_str())])
            .unwrap_or_default()
            .to_owned(),
        description: first_non_empty([description, event.description.as_deref()]).map(str::to_owned),
        location: first_non_empty([location, Some(event.location.as_str())])
            .unwrap_or(event.location.as_str())
            .to_owned(),
    }
}
