//! Extraction of schedulable entries from a published calendar feed.
//!
//! A feed is read into [`FeedEntry`] values carrying exactly the identity,
//! timing and recurrence fields synchronization needs. Entries are grouped by
//! UID; each group holds one series and its date-specific exceptions.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use super::core::{Component, ContentLine};
use super::expand::TimeZoneResolver;
use super::parse::{DateValue, ParseResult, parse, parse_date_list, parse_date_value, unescape_text};

/// One `VEVENT` of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub uid: String,
    /// Original start of the instance this entry replaces, for exceptions.
    pub recurrence_id: Option<DateValue>,
    pub start: DateValue,
    pub end: Option<DateValue>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub sequence: i64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Raw `RRULE` value; parsed by the importer so rule errors are reported per series.
    pub rule: Option<String>,
    pub exdates: Vec<DateValue>,
    pub rdates: Vec<DateValue>,
}

impl FeedEntry {
    #[must_use]
    pub const fn is_all_day(&self) -> bool {
        self.start.is_date()
    }
}

/// A parsed feed: its default zone and entries in document order.
#[derive(Debug, Clone)]
pub struct FeedCalendar {
    pub timezone: Tz,
    pub entries: Vec<FeedEntry>,
    /// Every UID in the document, including entries that were skipped.
    pub uids: BTreeSet<String>,
}

impl FeedCalendar {
    /// Groups entries by UID, keeping the order in which UIDs first appear.
    #[must_use]
    pub fn grouped(&self) -> Vec<(&str, Vec<&FeedEntry>)> {
        let mut groups: Vec<(&str, Vec<&FeedEntry>)> = Vec::new();
        let mut positions = std::collections::HashMap::new();
        for entry in &self.entries {
            let position = *positions.entry(entry.uid.as_str()).or_insert_with(|| {
                groups.push((entry.uid.as_str(), Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(entry);
        }
        groups
    }

    /// Whether any `VEVENT` in the document carries `uid`, readable or not.
    #[must_use]
    pub fn contains_uid(&self, uid: &str) -> bool {
        self.uids.contains(uid)
    }
}

/// ## Summary
/// Parses feed text into entries.
///
/// Entries without a UID are ignored. Entries whose DTSTART is missing or whose
/// dates are malformed are skipped with a warning; one bad entry does not
/// reject the feed.
///
/// ## Errors
/// Returns a `ParseError` if the document structure is not valid iCalendar.
#[tracing::instrument(skip_all, fields(input_len = input.len()))]
pub fn read_feed(input: &str, resolver: &mut TimeZoneResolver) -> ParseResult<FeedCalendar> {
    let calendar = parse(input)?;
    let timezone = resolver.calendar_timezone(&calendar);

    let mut entries = Vec::new();
    let mut uids = BTreeSet::new();
    let mut skipped = 0_usize;
    for component in calendar.events() {
        let Some(uid) = text(component, "UID") else {
            tracing::debug!("Ignoring VEVENT without UID");
            skipped += 1;
            continue;
        };
        uids.insert(uid.clone());
        match read_entry(component, uid) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => skipped += 1,
            Err(error) => {
                tracing::warn!(%error, "Skipping VEVENT with malformed dates");
                skipped += 1;
            }
        }
    }

    tracing::debug!(entries = entries.len(), skipped, %timezone, "Read feed");

    Ok(FeedCalendar {
        timezone,
        entries,
        uids,
    })
}

fn read_entry(component: &Component, uid: String) -> ParseResult<Option<FeedEntry>> {
    let Some(start) = component.property("DTSTART").map(date_value).transpose()? else {
        tracing::warn!(uid = %uid, "Skipping VEVENT without DTSTART");
        return Ok(None);
    };

    let mut exdates = Vec::new();
    for line in component.properties_named("EXDATE") {
        exdates.extend(date_list(line)?);
    }
    let mut rdates = Vec::new();
    for line in component.properties_named("RDATE") {
        rdates.extend(date_list(line)?);
    }

    let sequence = component
        .property("SEQUENCE")
        .and_then(|line| {
            line.raw_value.trim().parse::<i64>().map_or_else(
                |_e| {
                    tracing::warn!(uid = %uid, value = %line.raw_value, "Ignoring invalid SEQUENCE");
                    None
                },
                Some,
            )
        })
        .unwrap_or(0);

    let last_modified = component
        .property("LAST-MODIFIED")
        .map(date_value)
        .transpose()?
        .map(|value| match value {
            DateValue::Utc(instant) => instant,
            DateValue::Floating(local) | DateValue::Zoned { local, .. } => local.and_utc(),
            DateValue::Date(date) => date.and_time(NaiveTime::MIN).and_utc(),
        });

    Ok(Some(FeedEntry {
        recurrence_id: component
            .property("RECURRENCE-ID")
            .map(date_value)
            .transpose()?,
        start,
        end: component.property("DTEND").map(date_value).transpose()?,
        summary: text(component, "SUMMARY"),
        description: text(component, "DESCRIPTION"),
        location: text(component, "LOCATION"),
        sequence,
        last_modified,
        rule: component
            .property("RRULE")
            .map(|line| line.raw_value.trim().to_owned())
            .filter(|rule| !rule.is_empty()),
        exdates,
        rdates,
        uid,
    }))
}

fn date_value(line: &ContentLine) -> ParseResult<DateValue> {
    parse_date_value(&line.raw_value, line.tzid(), line.value_type(), line.line)
}

fn date_list(line: &ContentLine) -> ParseResult<Vec<DateValue>> {
    parse_date_list(&line.raw_value, line.tzid(), line.value_type(), line.line)
}

/// Unescaped, trimmed text of a property; `None` when absent or blank.
fn text(component: &Component, name: &str) -> Option<String> {
    component
        .property(name)
        .map(|line| unescape_text(&line.raw_value).trim().to_owned())
        .filter(|value| !value.is_empty())
}
