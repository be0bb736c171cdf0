//! Writing the occurrence rows of one event.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use almanac_db::db::enums::OccurrenceKind;
use almanac_db::db::store::StoreTx;
use almanac_db::model::event::Event;
use almanac_db::model::occurrence::NewEventOccurrence;
use almanac_db::model::rule::{EventOverride, RecurrenceOverride, RecurrenceRule, RuleDates};
use almanac_rfc::ical::expand::{ConversionError, ExpansionParams, RuleError, WeekdayCode};

use super::resolve::{OverrideSet, ResolvedOccurrence, resolve_occurrence};
use crate::error::ServiceResult;

/// Calendar cap for rules without a count when no source says otherwise.
pub const DEFAULT_HORIZON_DAYS: u32 = 180;

/// Events whose expansion is logged candidate by candidate.
#[derive(Debug, Clone, Default)]
pub struct ExpansionTrace {
    events: HashSet<Uuid>,
}

impl ExpansionTrace {
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_traced(&self, event_id: Uuid) -> bool {
        self.events.contains(&event_id)
    }
}

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub now: DateTime<Utc>,
    pub horizon_days: u32,
    pub trace: ExpansionTrace,
}

impl MaterializeOptions {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            horizon_days: DEFAULT_HORIZON_DAYS,
            trace: ExpansionTrace::default(),
        }
    }

    #[must_use]
    pub const fn with_horizon_days(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: ExpansionTrace) -> Self {
        self.trace = trace;
        self
    }
}

/// Rows to write for one recurring event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrencePlan {
    pub rows: Vec<NewEventOccurrence>,
    pub effective_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub event_id: Uuid,
    pub occurrences: usize,
    pub effective_until: Option<DateTime<Utc>>,
}

/// ## Summary
/// The boundary expansion actually uses.
///
/// A counted rule has none. Otherwise it is the rule's own `until` capped at
/// `now + horizon_days`, or just the cap when the rule is open-ended.
#[must_use]
pub fn effective_boundary(
    rule: &RecurrenceRule,
    now: DateTime<Utc>,
    horizon_days: u32,
) -> Option<DateTime<Utc>> {
    if rule.repeat_count.is_some() {
        return None;
    }
    let cap = now + TimeDelta::days(i64::from(horizon_days));
    Some(rule.until_at.map_or(cap, |until| until.min(cap)))
}

/// ## Summary
/// The zone an event's wall-clock times are defined in.
///
/// ## Errors
/// Returns `ConversionError::UnknownTimezone` if the stored name is not an IANA zone.
pub fn event_timezone(event: &Event) -> Result<Tz, ConversionError> {
    event
        .timezone
        .parse()
        .map_err(|_e| ConversionError::UnknownTimezone(event.timezone.clone()))
}

/// ## Summary
/// Builds expansion input from a stored rule.
///
/// ## Errors
/// Returns a `RuleError` if a stored by-day or week-start code is unknown.
pub fn expansion_params(
    rule: &RecurrenceRule,
    tz: Tz,
    boundary: Option<DateTime<Utc>>,
) -> Result<ExpansionParams, RuleError> {
    let week_start = rule
        .week_start
        .as_deref()
        .map(str::parse::<WeekdayCode>)
        .transpose()?
        .map(|code| code.weekday);

    Ok(ExpansionParams {
        interval: rule.repeat_interval,
        count: rule.repeat_count,
        boundary,
        by_day: WeekdayCode::parse_list(&rule.by_day)?,
        by_month: rule.by_month.clone(),
        by_month_day: rule.by_month_day.clone(),
        by_set_pos: rule.by_set_pos.clone(),
        week_start,
        ..ExpansionParams::new(rule.frequency.into(), rule.start_at.with_timezone(&tz))
    })
}

fn occurrence_row(
    event: &Event,
    resolved: ResolvedOccurrence,
    kind: OccurrenceKind,
    saved_at: DateTime<Utc>,
) -> NewEventOccurrence {
    NewEventOccurrence {
        id: Uuid::now_v7(),
        event_id: event.id,
        org_id: event.org_id,
        category_id: event.category_id,
        title: resolved.title,
        description: resolved.description,
        location: resolved.location,
        start_at: resolved.start,
        end_at: resolved.end,
        all_day: event.all_day,
        kind,
        source_url: event.source_url.clone(),
        event_saved_at: saved_at,
    }
}

/// ## Summary
/// Computes the occurrence rows of a recurring event without touching storage.
///
/// Rule candidates on an exclude date are dropped; the rest are resolved
/// against the overrides. Include dates that the rule did not already produce
/// and that are not excluded are added, within the same boundary. A resolved
/// start that repeats an earlier one is dropped.
///
/// ## Errors
/// Returns an error if the rule, a pattern override or the event timezone is invalid.
pub fn plan_occurrences(
    event: &Event,
    rule: &RecurrenceRule,
    dates: &RuleDates,
    exact: Vec<EventOverride>,
    patterns: &[RecurrenceOverride],
    options: &MaterializeOptions,
) -> ServiceResult<OccurrencePlan> {
    let traced = options.trace.is_traced(event.id);
    let tz = event_timezone(event)?;
    let boundary = effective_boundary(rule, options.now, options.horizon_days);
    let params = expansion_params(rule, tz, boundary)?;
    let candidates = params.expand()?;
    let overrides = OverrideSet::new(exact, patterns, &params)?;
    let duration = event.duration();

    let excluded: HashSet<DateTime<Utc>> = dates.exdates.iter().copied().collect();
    let produced: HashSet<DateTime<Utc>> = candidates.iter().map(DateTime::to_utc).collect();
    let mut starts = HashSet::new();
    let mut rows = Vec::with_capacity(candidates.len() + dates.rdates.len());

    let mut push = |candidate: DateTime<Tz>, rows: &mut Vec<NewEventOccurrence>| {
        let resolved = resolve_occurrence(
            candidate,
            event,
            duration,
            overrides.applied(candidate.to_utc()),
        );
        if traced {
            tracing::info!(
                event_id = %event.id,
                %candidate,
                start = %resolved.start,
                end = %resolved.end,
                title = %resolved.title,
                "Resolved occurrence"
            );
        }
        if !starts.insert(resolved.start) {
            tracing::warn!(event_id = %event.id, start = %resolved.start, "Dropping occurrence with duplicate start");
            return;
        }
        rows.push(occurrence_row(event, resolved, OccurrenceKind::Recurring, options.now));
    };

    for candidate in candidates {
        if excluded.contains(&candidate.to_utc()) {
            if traced {
                tracing::info!(event_id = %event.id, %candidate, "Candidate excluded");
            }
            continue;
        }
        push(candidate, &mut rows);
    }

    let mut rdates = dates.rdates.clone();
    rdates.sort_unstable();
    rdates.dedup();
    for rdate in rdates {
        if excluded.contains(&rdate) || produced.contains(&rdate) {
            continue;
        }
        if boundary.is_some_and(|b| rdate > b) {
            if traced {
                tracing::info!(event_id = %event.id, %rdate, "Include date beyond boundary");
            }
            continue;
        }
        push(rdate.with_timezone(&tz), &mut rows);
    }

    rows.sort_by_key(|row| row.start_at);
    tracing::debug!(
        event_id = %event.id,
        occurrences = rows.len(),
        boundary = ?boundary,
        "Planned occurrences"
    );

    Ok(OccurrencePlan {
        rows,
        effective_until: boundary,
    })
}

/// ## Summary
/// Replaces every occurrence of an event inside the caller's transaction.
///
/// A recurring event is expanded; any other event gets exactly one `one_time`
/// occurrence. The rule's `effective_until` and `last_expanded_at` and the
/// event's `updated_at` are set as part of the same write.
///
/// ## Errors
/// Returns an error if the rule cannot be expanded or the store fails.
#[tracing::instrument(skip_all, fields(event_id = %event.id))]
pub async fn materialize_event<T: StoreTx>(
    tx: &mut T,
    event: &Event,
    options: &MaterializeOptions,
) -> ServiceResult<MaterializeReport> {
    let now = options.now;

    let (rows, effective_until) = match tx.rule_for_event(event.id).await? {
        Some(rule) => {
            let dates = tx.rule_dates(rule.id).await?;
            let exact = tx.event_overrides(rule.id).await?;
            let patterns = tx.recurrence_overrides(rule.id).await?;
            let plan = plan_occurrences(event, &rule, &dates, exact, &patterns, options)?;
            tx.mark_rule_expanded(rule.id, plan.effective_until, now)
                .await?;
            (plan.rows, plan.effective_until)
        }
        None => {
            let resolved = ResolvedOccurrence {
                start: event.start_at,
                end: event.start_at + event.duration(),
                title: event.title.clone(),
                description: event.description.clone(),
                location: event.location.clone(),
            };
            (
                vec![occurrence_row(event, resolved, OccurrenceKind::OneTime, now)],
                None,
            )
        }
    };

    let written = tx.replace_occurrences(event.id, &rows).await?;
    tx.touch_event(event.id, now).await?;

    tracing::debug!(occurrences = written, "Materialized event");

    Ok(MaterializeReport {
        event_id: event.id,
        occurrences: written,
        effective_until,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_db::db::enums::RuleFrequency;
    use almanac_db::db::store::{EventStore, MemoryStore};
    use almanac_db::model::rule::{NewRecurrenceOverride, NewRecurrenceRule};
    use chrono::{NaiveTime, TimeZone, Timelike};

    use crate::test_support::{insert_event, sample_event, ny, utc};

    fn weekly_rule(event: &Event) -> RecurrenceRule {
        RecurrenceRule {
            id: Uuid::now_v7(),
            event_id: event.id,
            frequency: RuleFrequency::Weekly,
            repeat_interval: 1,
            start_at: event.start_at,
            repeat_count: None,
            until_at: None,
            effective_until: None,
            by_day: vec!["MO".to_owned()],
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
            last_expanded_at: None,
            created_at: utc(2026, 9, 1, 0, 0),
        }
    }

    fn plan(event: &Event, rule: &RecurrenceRule, dates: &RuleDates) -> OccurrencePlan {
        plan_occurrences(
            event,
            rule,
            dates,
            Vec::new(),
            &[],
            &MaterializeOptions::new(utc(2026, 9, 1, 0, 0)),
        )
        .unwrap()
    }

    #[test]
    fn boundary_respects_count_until_and_horizon() {
        let event = sample_event();
        let now = utc(2026, 9, 1, 0, 0);
        let mut rule = weekly_rule(&event);

        assert_eq!(effective_boundary(&rule, now, 180), Some(now + TimeDelta::days(180)));

        rule.until_at = Some(utc(2026, 10, 1, 0, 0));
        assert_eq!(effective_boundary(&rule, now, 180), rule.until_at);

        rule.until_at = Some(utc(2030, 1, 1, 0, 0));
        assert_eq!(effective_boundary(&rule, now, 30), Some(now + TimeDelta::days(30)));

        rule.repeat_count = Some(400);
        assert_eq!(effective_boundary(&rule, now, 30), None);
    }

    #[test]
    fn open_ended_rule_stops_at_horizon() {
        let event = sample_event();
        let rule = weekly_rule(&event);
        let plan = plan(&event, &rule, &RuleDates::default());
        let horizon = utc(2026, 9, 1, 0, 0) + TimeDelta::days(180);
        assert!(!plan.rows.is_empty());
        assert!(plan.rows.iter().all(|row| row.start_at <= horizon));
        assert_eq!(plan.effective_until, Some(horizon));
        // 2026-09-14 through 2027-02-22
        assert_eq!(plan.rows.len(), 24);
    }

    #[test]
    fn count_ignores_horizon() {
        let event = sample_event();
        let rule = RecurrenceRule {
            repeat_count: Some(40),
            ..weekly_rule(&event)
        };
        let plan = plan(&event, &rule, &RuleDates::default());
        assert_eq!(plan.rows.len(), 40);
        assert_eq!(plan.effective_until, None);
    }

    #[test]
    fn exdates_removed_and_rdates_added_once() {
        let event = sample_event();
        let rule = RecurrenceRule {
            repeat_count: Some(4),
            ..weekly_rule(&event)
        };
        let second = ny(2026, 9, 21, 18, 0).to_utc();
        let third = ny(2026, 9, 28, 18, 0).to_utc();
        let extra = ny(2026, 9, 24, 18, 0).to_utc();
        let dates = RuleDates {
            exdates: vec![second],
            rdates: vec![extra, third, extra, second],
        };
        let plan = plan(&event, &rule, &dates);
        let starts: Vec<DateTime<Utc>> = plan.rows.iter().map(|r| r.start_at).collect();
        assert_eq!(
            starts,
            vec![
                ny(2026, 9, 14, 18, 0).to_utc(),
                extra,
                third,
                ny(2026, 10, 5, 18, 0).to_utc(),
            ]
        );
    }

    #[test]
    fn rdates_beyond_boundary_are_dropped_without_count() {
        let event = sample_event();
        let rule = RecurrenceRule {
            until_at: Some(utc(2026, 10, 1, 0, 0)),
            ..weekly_rule(&event)
        };
        let dates = RuleDates {
            exdates: Vec::new(),
            rdates: vec![utc(2026, 12, 1, 12, 0)],
        };
        let plan = plan(&event, &rule, &dates);
        assert_eq!(plan.rows.len(), 3);
        assert!(plan.rows.iter().all(|r| r.start_at < utc(2026, 10, 1, 0, 0)));
    }

    #[test]
    fn wall_clock_is_stable_across_dst() {
        let event = sample_event();
        let rule = RecurrenceRule {
            repeat_count: Some(10),
            ..weekly_rule(&event)
        };
        let plan = plan(&event, &rule, &RuleDates::default());
        let local: Vec<_> = plan
            .rows
            .iter()
            .map(|r| r.start_at.with_timezone(&Tz::America__New_York))
            .collect();
        assert!(local.iter().all(|t| t.hour() == 18 && t.minute() == 0));
        assert_eq!(plan.rows[0].start_at.hour(), 22);
        assert_eq!(plan.rows[9].start_at.hour(), 23);
        assert!(plan.rows.iter().all(|r| r.end_at - r.start_at == TimeDelta::minutes(90)));
    }

    #[test]
    fn until_is_never_rewritten() {
        let event = sample_event();
        let rule = RecurrenceRule {
            until_at: Some(utc(2030, 1, 1, 0, 0)),
            ..weekly_rule(&event)
        };
        let plan = plan(&event, &rule, &RuleDates::default());
        assert_eq!(rule.until_at, Some(utc(2030, 1, 1, 0, 0)));
        assert_eq!(
            plan.effective_until,
            Some(utc(2026, 9, 1, 0, 0) + TimeDelta::days(180))
        );
    }

    #[test_log::test(tokio::test)]
    async fn materialize_replaces_rows_and_stamps_rule() {
        let store = MemoryStore::new();
        let now = utc(2026, 9, 1, 0, 0);
        let mut tx = store.begin().await.unwrap();
        let event = insert_event(&mut tx).await;
        let rule = tx
            .insert_rule(&NewRecurrenceRule {
                id: Uuid::now_v7(),
                event_id: event.id,
                frequency: RuleFrequency::Weekly,
                repeat_interval: 1,
                start_at: event.start_at,
                repeat_count: Some(6),
                until_at: None,
                by_day: vec!["MO".to_owned()],
                by_month: Vec::new(),
                by_month_day: Vec::new(),
                by_set_pos: Vec::new(),
                week_start: None,
            })
            .await
            .unwrap();
        tx.insert_recurrence_override(&NewRecurrenceOverride {
            id: Uuid::now_v7(),
            rule_id: rule.id,
            frequency: RuleFrequency::Weekly,
            repeat_interval: 2,
            by_day: vec!["MO".to_owned()],
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            new_start_time: NaiveTime::from_hms_opt(9, 0, 0),
            new_end_time: NaiveTime::from_hms_opt(10, 0, 0),
            new_title: Some("Morning session".to_owned()),
            new_description: None,
            new_location: None,
            priority: 0,
        })
        .await
        .unwrap();

        let options = MaterializeOptions::new(now);
        let report = materialize_event(&mut tx, &event, &options).await.unwrap();
        assert_eq!(report.occurrences, 6);

        let rows = tx.occurrences(event.id).await.unwrap();
        let morning: Vec<_> = rows.iter().filter(|r| r.title == "Morning session").collect();
        assert_eq!(morning.len(), 3);
        assert_eq!(
            morning[0].start_at,
            Tz::America__New_York
                .with_ymd_and_hms(2026, 9, 14, 9, 0, 0)
                .unwrap()
                .to_utc()
        );
        assert!(rows.iter().all(|r| r.kind == OccurrenceKind::Recurring && r.event_saved_at == now));

        let rule = tx.rule_for_event(event.id).await.unwrap().unwrap();
        assert_eq!(rule.last_expanded_at, Some(now));
        assert_eq!(rule.effective_until, None);
        assert_eq!(tx.event(event.id).await.unwrap().unwrap().updated_at, now);

        // A second run replaces rather than accumulates.
        materialize_event(&mut tx, &event, &options).await.unwrap();
        assert_eq!(tx.occurrences(event.id).await.unwrap().len(), 6);
    }

    #[test_log::test(tokio::test)]
    async fn non_recurring_event_gets_one_occurrence() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let event = insert_event(&mut tx).await;
        let options = MaterializeOptions::new(utc(2026, 9, 1, 0, 0));
        materialize_event(&mut tx, &event, &options).await.unwrap();
        materialize_event(&mut tx, &event, &options).await.unwrap();

        let rows = tx.occurrences(event.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, OccurrenceKind::OneTime);
        assert_eq!(rows[0].start_at, event.start_at);
        assert_eq!(rows[0].end_at, event.end_at);
    }
}
