//! Timezone resolution and UTC conversion for iCalendar date-times.
//!
//! Uses ICU4X for Windows timezone ID to IANA mapping and timezone canonicalization.

use chrono::{DateTime, LocalResult, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use icu::time::zone::WindowsParser;
use icu::time::zone::iana::IanaParserExtended;
use std::collections::HashMap;
use std::str::FromStr;

use crate::ical::core::ICalendar;
use crate::ical::parse::DateValue;

/// Error during timezone conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Unknown or invalid timezone identifier.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Resolver for timezone identifiers.
///
/// Maintains a cache of resolved timezones, keyed by the TZID as written in
/// the feed.
#[derive(Debug, Default)]
pub struct TimeZoneResolver {
    cache: HashMap<String, Tz>,
}

impl TimeZoneResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// ## Summary
    /// Resolves a timezone identifier to a `chrono_tz::Tz`.
    ///
    /// Vendor prefixes, Windows zone names and IANA aliases are normalized first.
    ///
    /// ## Errors
    ///
    /// Returns `ConversionError::UnknownTimezone` if the TZID cannot be resolved.
    pub fn resolve(&mut self, tzid: &str) -> Result<Tz, ConversionError> {
        if let Some(tz) = self.cache.get(tzid) {
            return Ok(*tz);
        }

        let normalized = normalize_tzid(tzid.trim());
        let tz = Tz::from_str(&normalized)
            .map_err(|_e| ConversionError::UnknownTimezone(tzid.to_owned()))?;

        self.cache.insert(tzid.to_owned(), tz);

        Ok(tz)
    }

    /// ## Summary
    /// Determines the zone floating times in a calendar are interpreted in.
    ///
    /// `X-WR-TIMEZONE` wins, then the first `VTIMEZONE` whose TZID resolves,
    /// then UTC.
    pub fn calendar_timezone(&mut self, calendar: &ICalendar) -> Tz {
        if let Some(declared) = calendar.root.property("X-WR-TIMEZONE") {
            match self.resolve(&declared.raw_value) {
                Ok(tz) => return tz,
                Err(error) => tracing::warn!(%error, "Ignoring X-WR-TIMEZONE"),
            }
        }

        calendar
            .timezones()
            .filter_map(|vtimezone| vtimezone.property("TZID"))
            .find_map(|tzid| self.resolve(&tzid.raw_value).ok())
            .unwrap_or(Tz::UTC)
    }

    /// ## Summary
    /// Zone a value is expressed in: its own TZID when resolvable, else `fallback`.
    pub fn zone_of(&mut self, value: &DateValue, fallback: Tz) -> Tz {
        match value {
            DateValue::Zoned { tzid, .. } => self.resolve(tzid).unwrap_or_else(|error| {
                tracing::warn!(%error, fallback = %fallback, "Falling back to calendar timezone");
                fallback
            }),
            DateValue::Utc(_) | DateValue::Date(_) | DateValue::Floating(_) => fallback,
        }
    }

    /// ## Summary
    /// Converts a feed date value to an absolute instant.
    ///
    /// Dates become local midnight; floating times and unresolvable TZIDs are
    /// interpreted in `fallback`.
    pub fn to_utc(&mut self, value: &DateValue, fallback: Tz) -> DateTime<Utc> {
        match value {
            DateValue::Utc(instant) => *instant,
            DateValue::Date(date) => localize(date.and_time(NaiveTime::MIN), fallback).to_utc(),
            DateValue::Floating(local) => localize(*local, fallback).to_utc(),
            DateValue::Zoned { local, .. } => {
                let tz = self.zone_of(value, fallback);
                localize(*local, tz).to_utc()
            }
        }
    }
}

/// ## Summary
/// Places a civil date-time in `tz`.
///
/// A time inside a DST gap is moved forward by the length of the gap (02:30 on
/// a spring-forward night becomes 03:30); a time inside a DST fold takes the
/// earlier of its two instants.
#[must_use]
pub fn localize(local: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => {
            let before_gap = tz
                .offset_from_utc_datetime(&(local - TimeDelta::days(1)))
                .fix();
            let instant = local - TimeDelta::seconds(i64::from(before_gap.local_minus_utc()));
            tz.from_utc_datetime(&instant)
        }
    }
}

/// Normalizes common CalDAV/iCalendar timezone identifiers to IANA names.
///
/// Uses ICU4X for Windows timezone ID mapping and IANA canonicalization.
fn normalize_tzid(tzid: &str) -> String {
    let stripped = tzid
        .strip_prefix("/mozilla.org/")
        .or_else(|| tzid.strip_prefix("/softwarestudio.org/"))
        .unwrap_or(tzid);

    let windows_parser = WindowsParser::new();
    if let Some(tz) = windows_parser.parse(stripped, None) {
        let iana_parser = IanaParserExtended::new();
        if let Some(entry) = iana_parser.iter().find(|entry| entry.time_zone == tz) {
            return entry.canonical.to_string();
        }
    }

    let iana_parser = IanaParserExtended::new();
    let parsed = iana_parser.parse(stripped);
    if parsed.time_zone != icu::time::TimeZone::UNKNOWN {
        return parsed.canonical.to_string();
    }

    stripped.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ical::core::{Component, ContentLine};
    use chrono::{NaiveDate, Timelike};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn calendar(properties: &[(&str, &str)], tzids: &[&str]) -> ICalendar {
        let mut root = Component::new("VCALENDAR");
        for (name, value) in properties {
            root.add_property(ContentLine::new(*name, *value));
        }
        for tzid in tzids {
            let mut vtimezone = Component::new("VTIMEZONE");
            vtimezone.add_property(ContentLine::new("TZID", *tzid));
            root.add_child(vtimezone);
        }
        ICalendar { root }
    }

    #[test]
    fn resolves_and_caches_iana_names() {
        let mut resolver = TimeZoneResolver::new();
        assert_eq!(
            resolver.resolve("America/New_York").unwrap(),
            Tz::America__New_York
        );
        assert!(resolver.cache.contains_key("America/New_York"));
    }

    #[test]
    fn resolves_vendor_and_windows_names() {
        let mut resolver = TimeZoneResolver::new();
        assert_eq!(
            resolver.resolve("/mozilla.org/Europe/Berlin").unwrap(),
            Tz::Europe__Berlin
        );
        assert_eq!(
            resolver.resolve("Eastern Standard Time").unwrap(),
            Tz::America__New_York
        );
    }

    #[test]
    fn rejects_unknown_zone() {
        let mut resolver = TimeZoneResolver::new();
        assert!(matches!(
            resolver.resolve("Mars/Olympus_Mons"),
            Err(ConversionError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn calendar_timezone_prefers_declared_zone() {
        let mut resolver = TimeZoneResolver::new();
        let cal = calendar(&[("X-WR-TIMEZONE", "Europe/Paris")], &["America/Chicago"]);
        assert_eq!(resolver.calendar_timezone(&cal), Tz::Europe__Paris);
    }

    #[test]
    fn calendar_timezone_uses_first_resolvable_vtimezone() {
        let mut resolver = TimeZoneResolver::new();
        let cal = calendar(
            &[("X-WR-TIMEZONE", "Not/AZone")],
            &["Custom Campus Time", "America/Chicago"],
        );
        assert_eq!(resolver.calendar_timezone(&cal), Tz::America__Chicago);
    }

    #[test]
    fn calendar_timezone_defaults_to_utc() {
        let mut resolver = TimeZoneResolver::new();
        assert_eq!(resolver.calendar_timezone(&calendar(&[], &[])), Tz::UTC);
    }

    #[test]
    fn converts_each_date_form() {
        let mut resolver = TimeZoneResolver::new();
        let chicago = Tz::America__Chicago;

        let date = DateValue::Date(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
        assert_eq!(
            resolver.to_utc(&date, chicago),
            Utc.with_ymd_and_hms(2026, 1, 15, 6, 0, 0).unwrap()
        );

        let floating = DateValue::Floating(local(2026, 7, 15, 10, 0));
        assert_eq!(
            resolver.to_utc(&floating, chicago),
            Utc.with_ymd_and_hms(2026, 7, 15, 15, 0, 0).unwrap()
        );

        let zoned = DateValue::Zoned {
            local: local(2026, 1, 15, 10, 0),
            tzid: "America/New_York".to_owned(),
        };
        assert_eq!(
            resolver.to_utc(&zoned, chicago),
            Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap()
        );

        let unknown = DateValue::Zoned {
            local: local(2026, 1, 15, 10, 0),
            tzid: "Nowhere/Special".to_owned(),
        };
        assert_eq!(resolver.zone_of(&unknown, chicago), chicago);
        assert_eq!(
            resolver.to_utc(&unknown, chicago),
            Utc.with_ymd_and_hms(2026, 1, 15, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn localize_shifts_gap_forward() {
        // 2026-03-08 02:30 does not exist in New York.
        let dt = localize(local(2026, 3, 8, 2, 30), Tz::America__New_York);
        assert_eq!(dt.hour(), 3);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.to_utc(), Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap());
    }

    #[test]
    fn localize_takes_earliest_in_fold() {
        // 2026-11-01 01:30 happens twice in New York; the EDT one comes first.
        let dt = localize(local(2026, 11, 1, 1, 30), Tz::America__New_York);
        assert_eq!(dt.to_utc(), Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }
}
