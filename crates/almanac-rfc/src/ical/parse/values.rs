//! Value decoding for the property types feeds rely on (RFC 5545 §3.3).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::error::{ParseError, ParseErrorKind, ParseResult};

/// A DATE or DATE-TIME value in one of its three RFC 5545 forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateValue {
    /// `VALUE=DATE`, an all-day value.
    Date(NaiveDate),
    /// Local time without a zone, interpreted in the calendar's zone.
    Floating(NaiveDateTime),
    /// Absolute time (`Z` suffix).
    Utc(DateTime<Utc>),
    /// Local time in the zone named by the `TZID` parameter.
    Zoned { local: NaiveDateTime, tzid: String },
}

impl DateValue {
    #[must_use]
    pub const fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// The `TZID` this value was declared in, if any.
    #[must_use]
    pub fn tzid(&self) -> Option<&str> {
        match self {
            Self::Zoned { tzid, .. } => Some(tzid),
            _ => None,
        }
    }
}

/// Parses a DATE value (RFC 5545 §3.3.4).
///
/// Format: YYYYMMDD (e.g., "19970714")
fn parse_date(s: &str, line: usize) -> ParseResult<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(ParseErrorKind::InvalidDate, line, 1)
            .with_context(format!("'{s}'")));
    }
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|e| ParseError::new(ParseErrorKind::InvalidDate, line, 1).with_context(e.to_string()))
}

/// Parses a TIME value (RFC 5545 §3.3.12) without the UTC designator.
fn parse_time(s: &str, line: usize) -> ParseResult<NaiveTime> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(ParseErrorKind::InvalidTime, line, 1)
            .with_context(format!("'{s}'")));
    }
    NaiveTime::parse_from_str(s, "%H%M%S")
        .map_err(|e| ParseError::new(ParseErrorKind::InvalidTime, line, 1).with_context(e.to_string()))
}

/// Parses a DATE or DATE-TIME property value.
///
/// `VALUE=DATE` or an 8-character value yields [`DateValue::Date`]; a trailing
/// `Z` yields [`DateValue::Utc`]; otherwise the `TZID` parameter decides
/// between zoned and floating.
///
/// ## Errors
/// Returns an error if the value is not a valid date or date-time.
pub fn parse_date_value(
    raw: &str,
    tzid: Option<&str>,
    value_type: Option<&str>,
    line: usize,
) -> ParseResult<DateValue> {
    let raw = raw.trim();
    let is_date = value_type.is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || !raw.contains('T');
    if is_date {
        return parse_date(raw, line).map(DateValue::Date);
    }

    let (date_part, time_part) = raw
        .split_once('T')
        .ok_or_else(|| ParseError::new(ParseErrorKind::InvalidDateTime, line, 1))?;
    let date = parse_date(date_part, line)?;

    if let Some(utc_time) = time_part.strip_suffix(['Z', 'z']) {
        let time = parse_time(utc_time, line)?;
        return Ok(DateValue::Utc(date.and_time(time).and_utc()));
    }

    let local = date.and_time(parse_time(time_part, line)?);
    Ok(match tzid {
        Some(tzid) => DateValue::Zoned {
            local,
            tzid: tzid.to_owned(),
        },
        None => DateValue::Floating(local),
    })
}

/// Parses a comma-separated EXDATE/RDATE list.
///
/// RDATE `PERIOD` values contribute their start.
///
/// ## Errors
/// Returns an error if any element is not a valid date or date-time.
pub fn parse_date_list(
    raw: &str,
    tzid: Option<&str>,
    value_type: Option<&str>,
    line: usize,
) -> ParseResult<Vec<DateValue>> {
    let value_type = value_type.filter(|v| !v.eq_ignore_ascii_case("PERIOD"));
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let start = item.split_once('/').map_or(item, |(start, _)| start);
            parse_date_value(start, tzid, value_type, line)
        })
        .collect()
}

/// Unescapes text values (RFC 5545 §3.3.11).
///
/// Escape sequences: \\ \, \; \n \N
#[must_use]
pub fn unescape_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => result.push('\n'),
            Some(escaped @ (',' | ';' | '\\')) => result.push(escaped),
            None => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
        }
    }

    result
}
