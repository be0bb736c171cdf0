//! Applying a parsed feed to the events of one source.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use almanac_db::db::enums::DeletionPolicy;
use almanac_db::db::store::{EventStore, StoreTx};
use almanac_db::model::event::{DEFAULT_LOCATION, Event, LegacyEventKey, NewEvent};
use almanac_db::model::rule::{NewEventOverride, NewRecurrenceRule, RecurrenceRule, RuleDates};
use almanac_db::model::source::CalendarSource;
use almanac_rfc::ical::expand::{RuleDefinition, RuleError, TimeZoneResolver, WeekdayCode, localize};
use almanac_rfc::ical::feed::{FeedEntry, read_feed};
use almanac_rfc::ical::parse::DateValue;

use crate::error::{ImportError, ServiceResult};
use crate::occurrence::{DEFAULT_HORIZON_DAYS, ExpansionTrace, MaterializeOptions, materialize_event};

/// Counts of what an import did, by feed group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub adopted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub occurrences: usize,
    /// Events created, updated or adopted.
    pub event_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Appended to the edit history of every event the import changes.
    pub actor: String,
    pub now: DateTime<Utc>,
    pub max_entry_age_days: u32,
    pub trace: ExpansionTrace,
}

impl ImportOptions {
    #[must_use]
    pub fn new(actor: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            now,
            max_entry_age_days: 365,
            trace: ExpansionTrace::default(),
        }
    }
}

/// A feed group reduced to the values stored on its event.
struct SeriesInput<'a> {
    uid: &'a str,
    base: &'a FeedEntry,
    exceptions: Vec<&'a FeedEntry>,
    tz: Tz,
    anchor: DateTime<Tz>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

enum Change {
    Created,
    Updated,
    Adopted,
}

/// ## Summary
/// Imports feed text into the events of `source` in one transaction.
///
/// Entries are grouped by UID; each group is matched to a stored event by
/// external id, or adopted from a manually entered event with the same
/// identity. Groups that did not change since the last import are left alone.
/// Under the mirror policy, events whose UID left the feed are deleted.
///
/// ## Errors
/// `ICAL_PARSE_ERROR` when the text is not iCalendar; `ICAL_IMPORT_FAILED`
/// when a rule cannot be stored or expanded or the store fails. Nothing is
/// written in either case.
#[tracing::instrument(skip_all, fields(source_id = %source.id))]
pub async fn import_feed<S: EventStore>(
    store: &S,
    source: &CalendarSource,
    text: &str,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let mut resolver = TimeZoneResolver::new();
    let feed = read_feed(text, &mut resolver)?;
    let oldest = options
        .now
        .checked_sub_signed(TimeDelta::days(i64::from(options.max_entry_age_days)));

    let mut summary = ImportSummary::default();
    let mut tx = store.begin().await?;

    for (uid, entries) in feed.grouped() {
        let Some(series) = series_input(uid, &entries, feed.timezone, &mut resolver) else {
            tracing::debug!(uid, "Skipping group without a base entry");
            summary.skipped += 1;
            continue;
        };
        if oldest.is_some_and(|oldest| series.start < oldest) {
            tracing::debug!(uid, start = %series.start, "Skipping entry older than the import window");
            summary.skipped += 1;
            continue;
        }
        apply_series(&mut tx, source, &series, &mut resolver, options, &mut summary).await?;
    }

    if source.deletion_policy == DeletionPolicy::Mirror {
        let stale: Vec<Uuid> = tx
            .source_events(source.id)
            .await?
            .into_iter()
            .filter(|event| {
                event
                    .external_id
                    .as_deref()
                    .is_none_or(|uid| !feed.contains_uid(uid))
            })
            .map(|event| event.id)
            .collect();
        summary.deleted = tx.delete_events(&stale).await?;
    }

    tx.commit().await?;

    tracing::info!(
        created = summary.created,
        updated = summary.updated,
        adopted = summary.adopted,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        deleted = summary.deleted,
        occurrences = summary.occurrences,
        "Imported feed"
    );

    Ok(summary)
}

/// Picks the base entry of a group and computes its instants.
///
/// The base is the first entry with a rule, else the earliest entry without
/// a RECURRENCE-ID.
fn series_input<'a>(
    uid: &'a str,
    entries: &[&'a FeedEntry],
    calendar_tz: Tz,
    resolver: &mut TimeZoneResolver,
) -> Option<SeriesInput<'a>> {
    let (bases, exceptions): (Vec<&FeedEntry>, Vec<&FeedEntry>) = entries
        .iter()
        .copied()
        .partition(|entry| entry.recurrence_id.is_none());

    let base = match bases.iter().find(|entry| entry.rule.is_some()) {
        Some(base) => *base,
        None => *bases
            .iter()
            .min_by_key(|entry| resolver.to_utc(&entry.start, calendar_tz))?,
    };

    let tz = resolver.zone_of(&base.start, calendar_tz);
    let start = resolver.to_utc(&base.start, tz);
    let end = match &base.end {
        Some(end) => resolver.to_utc(end, tz).max(start),
        None if base.is_all_day() => start + TimeDelta::days(1),
        None => start,
    };

    Some(SeriesInput {
        uid,
        base,
        exceptions,
        tz,
        anchor: start.with_timezone(&tz),
        start,
        end,
    })
}

/// Instant of one instance of a series named by EXDATE, RDATE or RECURRENCE-ID.
///
/// A bare date on a timed series refers to the instance on that date at the
/// series' local start time.
fn instance_instant(
    value: &DateValue,
    series: &SeriesInput<'_>,
    resolver: &mut TimeZoneResolver,
) -> DateTime<Utc> {
    match value {
        DateValue::Date(date) if !series.base.is_all_day() => {
            localize(date.and_time(series.anchor.time()), series.tz).to_utc()
        }
        _ => resolver.to_utc(value, series.tz),
    }
}

/// Stored rule boundary for an `UNTIL` value. A date means the end of that
/// local day.
fn until_instant(
    value: &DateValue,
    tz: Tz,
    resolver: &mut TimeZoneResolver,
) -> DateTime<Utc> {
    match value {
        DateValue::Date(date) => {
            let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
            localize(date.and_time(end_of_day), tz).to_utc()
        }
        _ => resolver.to_utc(value, tz),
    }
}

fn is_changed(existing: &Event, base: &FeedEntry) -> bool {
    if base.sequence > existing.revision {
        return true;
    }
    match (base.last_modified, existing.source_modified_at) {
        (Some(incoming), Some(stored)) => incoming > stored,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

async fn apply_series<T: StoreTx>(
    tx: &mut T,
    source: &CalendarSource,
    series: &SeriesInput<'_>,
    resolver: &mut TimeZoneResolver,
    options: &ImportOptions,
    summary: &mut ImportSummary,
) -> ServiceResult<()> {
    let base = series.base;
    let title = base.summary.clone().unwrap_or_default();
    let location = base
        .location
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCATION.to_owned());

    let (existing, adopted) = match tx.event_by_external_id(source.id, series.uid).await? {
        Some(event) => (Some(event), false),
        None => {
            let legacy = tx
                .legacy_event(LegacyEventKey {
                    org_id: source.org_id,
                    title: &title,
                    start_at: series.start,
                    end_at: series.end,
                    location: &location,
                })
                .await?;
            let adopted = legacy.is_some();
            (legacy, adopted)
        }
    };

    if let Some(event) = &existing
        && !adopted
        && !is_changed(event, base)
    {
        // A one-off whose occurrence went missing is rewritten as it stands.
        if base.rule.is_none() && !tx.has_occurrence(event.id, event.start_at, event.end_at).await? {
            tracing::debug!(uid = series.uid, event_id = %event.id, "Repairing missing occurrence");
            let report = materialize_event(tx, event, &materialize_options(source, options)).await?;
            summary.occurrences += report.occurrences;
        }
        summary.unchanged += 1;
        return Ok(());
    }

    let (event, change) = match existing {
        Some(mut event) => {
            event.title = title;
            event.description.clone_from(&base.description);
            event.location = location;
            event.start_at = series.start;
            event.end_at = series.end;
            event.all_day = base.is_all_day();
            event.timezone = series.tz.name().to_owned();
            event.source_id = Some(source.id);
            event.external_id = Some(series.uid.to_owned());
            event.revision = base.sequence;
            event.source_modified_at = base.last_modified;
            event.source_url = Some(source.url.clone());
            if event.event_type.is_none() {
                event.event_type.clone_from(&source.default_event_type);
            }
            event.edit_history.push(options.actor.clone());
            event.updated_at = options.now;
            tx.update_event(&event).await?;
            (event, if adopted { Change::Adopted } else { Change::Updated })
        }
        None => {
            let event = tx
                .insert_event(&NewEvent {
                    id: Uuid::now_v7(),
                    org_id: source.org_id,
                    category_id: source.category_id,
                    title,
                    description: base.description.clone(),
                    location,
                    start_at: series.start,
                    end_at: series.end,
                    all_day: base.is_all_day(),
                    timezone: series.tz.name().to_owned(),
                    source_id: Some(source.id),
                    external_id: Some(series.uid.to_owned()),
                    revision: base.sequence,
                    source_modified_at: base.last_modified,
                    source_url: Some(source.url.clone()),
                    event_type: source.default_event_type.clone(),
                    edit_history: vec![options.actor.clone()],
                    updated_at: options.now,
                })
                .await?;
            (event, Change::Created)
        }
    };

    let previous_rule = tx.rule_for_event(event.id).await?;
    match &base.rule {
        Some(rule_text) => {
            let definition: RuleDefinition = rule_text.parse()?;
            let rule_id = store_rule(tx, &event, previous_rule, &definition, series, resolver).await?;

            let mut dates = RuleDates {
                exdates: base
                    .exdates
                    .iter()
                    .map(|value| instance_instant(value, series, resolver))
                    .collect(),
                rdates: base
                    .rdates
                    .iter()
                    .map(|value| instance_instant(value, series, resolver))
                    .collect(),
            };
            dates.exdates.sort_unstable();
            dates.exdates.dedup();
            dates.rdates.sort_unstable();
            dates.rdates.dedup();
            tx.replace_rule_dates(rule_id, &dates).await?;

            let overrides = exception_overrides(rule_id, series, resolver);
            tx.replace_event_overrides(rule_id, &overrides).await?;
        }
        None => {
            if let Some(rule) = previous_rule {
                tx.delete_rule(rule.id).await?;
            }
        }
    }

    let report = materialize_event(tx, &event, &materialize_options(source, options)).await?;
    summary.occurrences += report.occurrences;
    summary.event_ids.push(event.id);
    match change {
        Change::Created => summary.created += 1,
        Change::Updated => summary.updated += 1,
        Change::Adopted => summary.adopted += 1,
    }

    tracing::debug!(
        uid = series.uid,
        event_id = %event.id,
        occurrences = report.occurrences,
        "Applied feed entry"
    );

    Ok(())
}

fn materialize_options(source: &CalendarSource, options: &ImportOptions) -> MaterializeOptions {
    MaterializeOptions::new(options.now)
        .with_horizon_days(u32::try_from(source.horizon_days).unwrap_or(DEFAULT_HORIZON_DAYS))
        .with_trace(options.trace.clone())
}

/// Writes the series rule, reusing the stored row when there is one.
async fn store_rule<T: StoreTx>(
    tx: &mut T,
    event: &Event,
    previous: Option<RecurrenceRule>,
    definition: &RuleDefinition,
    series: &SeriesInput<'_>,
    resolver: &mut TimeZoneResolver,
) -> ServiceResult<Uuid> {
    let repeat_count = definition
        .count
        .map(|count| i32::try_from(count).map_err(|_e| RuleError::InvalidCount(count.to_string())))
        .transpose()?;
    let until_at = definition
        .until
        .as_ref()
        .map(|until| until_instant(until, series.tz, resolver));
    let by_day: Vec<String> = definition.by_day.iter().map(ToString::to_string).collect();
    let by_month: Vec<i16> = definition.by_month.iter().copied().map(i16::from).collect();
    let by_month_day: Vec<i16> = definition
        .by_month_day
        .iter()
        .copied()
        .map(i16::from)
        .collect();
    let week_start = definition
        .week_start
        .map(|weekday| WeekdayCode::every(weekday).to_string());

    if let Some(mut rule) = previous {
        rule.frequency = definition.frequency.into();
        rule.repeat_interval = i32::from(definition.interval);
        rule.start_at = series.start;
        rule.repeat_count = repeat_count;
        rule.until_at = until_at;
        rule.by_day = by_day;
        rule.by_month = by_month;
        rule.by_month_day = by_month_day;
        rule.by_set_pos.clone_from(&definition.by_set_pos);
        rule.week_start = week_start;
        tx.update_rule(&rule).await?;
        return Ok(rule.id);
    }

    let rule = tx
        .insert_rule(&NewRecurrenceRule {
            id: Uuid::now_v7(),
            event_id: event.id,
            frequency: definition.frequency.into(),
            repeat_interval: i32::from(definition.interval),
            start_at: series.start,
            repeat_count,
            until_at,
            by_day,
            by_month,
            by_month_day,
            by_set_pos: definition.by_set_pos.clone(),
            week_start,
        })
        .await?;
    Ok(rule.id)
}

/// Exact-date overrides from the group's RECURRENCE-ID entries. When two
/// entries name the same instance the later one wins.
fn exception_overrides(
    rule_id: Uuid,
    series: &SeriesInput<'_>,
    resolver: &mut TimeZoneResolver,
) -> Vec<NewEventOverride> {
    let duration = series.end - series.start;
    let mut by_instance = BTreeMap::new();
    for exception in &series.exceptions {
        let Some(recurrence_id) = &exception.recurrence_id else {
            continue;
        };
        let recurrence_at = instance_instant(recurrence_id, series, resolver);
        let tz = resolver.zone_of(&exception.start, series.tz);
        let new_start = resolver.to_utc(&exception.start, tz);
        let new_end = exception
            .end
            .as_ref()
            .map_or(new_start + duration, |end| resolver.to_utc(end, tz));
        by_instance.insert(
            recurrence_at,
            NewEventOverride {
                id: Uuid::now_v7(),
                rule_id,
                recurrence_at,
                new_start: Some(new_start),
                new_end: Some(new_end),
                new_title: exception.summary.clone(),
                new_description: exception.description.clone(),
                new_location: exception.location.clone(),
            },
        );
    }
    by_instance.into_values().collect()
}
