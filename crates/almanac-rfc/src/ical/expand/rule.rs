//! The recurrence rule language (RFC 5545 §3.3.10), restricted to the
//! frequencies and parts schedules use.

use std::fmt;
use std::str::FromStr;

use chrono::Weekday;

use crate::ical::parse::{DateValue, parse_date_value};

/// Invalid recurrence configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("recurrence rule has no FREQ")]
    MissingFrequency,
    #[error("unknown frequency '{0}'")]
    UnknownFrequency(String),
    #[error("unsupported frequency '{0}', only daily, weekly, monthly and yearly rules are expanded")]
    UnsupportedFrequency(String),
    #[error("interval must be a positive number, got '{0}'")]
    InvalidInterval(String),
    #[error("count must be a non-negative number, got '{0}'")]
    InvalidCount(String),
    #[error("invalid UNTIL value '{0}'")]
    InvalidUntil(String),
    #[error("unknown weekday code '{0}'")]
    UnknownWeekday(String),
    #[error("by-month value {0} is outside 1..=12")]
    InvalidMonth(i64),
    #[error("by-month-day value {0} is outside -31..=-1 and 1..=31")]
    InvalidMonthDay(i64),
    #[error("invalid BYSETPOS value '{0}'")]
    InvalidSetPosition(String),
    #[error("malformed rule part '{0}'")]
    Malformed(String),
    #[error("recurrence could not be expanded: {0}")]
    Expansion(String),
}

/// How often a rule repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub(crate) const fn to_rrule(self) -> rrule::Frequency {
        match self {
            Self::Daily => rrule::Frequency::Daily,
            Self::Weekly => rrule::Frequency::Weekly,
            Self::Monthly => rrule::Frequency::Monthly,
            Self::Yearly => rrule::Frequency::Yearly,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = RuleError;

    /// Accepts both the stored lowercase form and the RRULE uppercase form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "hourly" | "minutely" | "secondly" => Err(RuleError::UnsupportedFrequency(s.to_owned())),
            _ => Err(RuleError::UnknownFrequency(s.to_owned())),
        }
    }
}

/// A BYDAY entry: a weekday with an optional ordinal (`MO`, `1MO`, `-1FR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekdayCode {
    pub ordinal: Option<i16>,
    pub weekday: Weekday,
}

impl WeekdayCode {
    #[must_use]
    pub const fn every(weekday: Weekday) -> Self {
        Self {
            ordinal: None,
            weekday,
        }
    }

    /// Parses stored by-day codes.
    ///
    /// ## Errors
    /// Returns `RuleError::UnknownWeekday` for the first code that is not a weekday.
    pub fn parse_list<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Self>, RuleError> {
        codes.iter().map(|code| code.as_ref().parse()).collect()
    }

    pub(crate) const fn to_rrule(self) -> rrule::NWeekday {
        match self.ordinal {
            Some(n) => rrule::NWeekday::Nth(n, self.weekday),
            None => rrule::NWeekday::Every(self.weekday),
        }
    }
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    Some(match code.to_ascii_uppercase().as_str() {
        "MO" => Weekday::Mon,
        "TU" => Weekday::Tue,
        "WE" => Weekday::Wed,
        "TH" => Weekday::Thu,
        "FR" => Weekday::Fri,
        "SA" => Weekday::Sat,
        "SU" => Weekday::Sun,
        _ => return None,
    })
}

const fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

impl FromStr for WeekdayCode {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unknown = || RuleError::UnknownWeekday(s.to_owned());
        let split = s.len().checked_sub(2).filter(|at| s.is_char_boundary(*at)).ok_or_else(unknown)?;
        let (ordinal, day) = s.split_at(split);
        let weekday = weekday_from_code(day).ok_or_else(unknown)?;
        let ordinal = if ordinal.is_empty() {
            None
        } else {
            let n: i16 = ordinal.parse().map_err(|_e| unknown())?;
            if n == 0 || n.unsigned_abs() > 53 {
                return Err(unknown());
            }
            Some(n)
        };
        Ok(Self { ordinal, weekday })
    }
}

impl fmt::Display for WeekdayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

/// Checks a by-month list.
///
/// ## Errors
/// Returns `RuleError::InvalidMonth` for the first value outside 1..=12.
pub fn validate_months<T: Copy + Into<i64>>(values: &[T]) -> Result<Vec<u8>, RuleError> {
    values
        .iter()
        .map(|v| {
            let v: i64 = (*v).into();
            u8::try_from(v)
                .ok()
                .filter(|m| (1..=12).contains(m))
                .ok_or(RuleError::InvalidMonth(v))
        })
        .collect()
}

/// Checks a by-month-day list.
///
/// ## Errors
/// Returns `RuleError::InvalidMonthDay` for zero or values beyond ±31.
pub fn validate_month_days<T: Copy + Into<i64>>(values: &[T]) -> Result<Vec<i8>, RuleError> {
    values
        .iter()
        .map(|v| {
            let v: i64 = (*v).into();
            i8::try_from(v)
                .ok()
                .filter(|d| *d != 0 && (-31..=31).contains(d))
                .ok_or(RuleError::InvalidMonthDay(v))
        })
        .collect()
}

/// A parsed `RRULE` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    pub frequency: Frequency,
    pub interval: u16,
    pub count: Option<u32>,
    pub until: Option<DateValue>,
    pub by_day: Vec<WeekdayCode>,
    pub by_month: Vec<u8>,
    pub by_month_day: Vec<i8>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Option<Weekday>,
}

impl FromStr for RuleDefinition {
    type Err = RuleError;

    /// Parses `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;...`, with or without an
    /// `RRULE:` prefix. Parts outside the supported set are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim();
        let body = body
            .get(..6)
            .filter(|prefix| prefix.eq_ignore_ascii_case("RRULE:"))
            .map_or(body, |_| &body[6..]);

        let mut frequency = None;
        let mut rule = Self {
            frequency: Frequency::Daily,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: None,
        };

        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RuleError::Malformed(part.to_owned()))?;
            let value = value.trim();
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => frequency = Some(value.parse()?),
                "INTERVAL" => {
                    rule.interval = value
                        .parse()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| RuleError::InvalidInterval(value.to_owned()))?;
                }
                "COUNT" => {
                    rule.count = Some(
                        value
                            .parse()
                            .map_err(|_e| RuleError::InvalidCount(value.to_owned()))?,
                    );
                }
                "UNTIL" => {
                    rule.until = Some(
                        parse_date_value(value, None, None, 0)
                            .map_err(|_e| RuleError::InvalidUntil(value.to_owned()))?,
                    );
                }
                "BYDAY" => {
                    rule.by_day = list(value)?
                        .into_iter()
                        .map(str::parse::<WeekdayCode>)
                        .collect::<Result<_, _>>()?;
                }
                "BYMONTH" => rule.by_month = validate_months(&int_list(value)?)?,
                "BYMONTHDAY" => rule.by_month_day = validate_month_days(&int_list(value)?)?,
                "BYSETPOS" => {
                    rule.by_set_pos = list(value)?
                        .into_iter()
                        .map(|v| {
                            v.parse::<i32>()
                                .ok()
                                .filter(|n| *n != 0 && n.unsigned_abs() <= 366)
                                .ok_or_else(|| RuleError::InvalidSetPosition(v.to_owned()))
                        })
                        .collect::<Result<_, _>>()?;
                }
                "WKST" => {
                    rule.week_start = Some(
                        weekday_from_code(value)
                            .ok_or_else(|| RuleError::UnknownWeekday(value.to_owned()))?,
                    );
                }
                other => tracing::warn!(part = other, "Ignoring unsupported recurrence rule part"),
            }
        }

        rule.frequency = frequency.ok_or(RuleError::MissingFrequency)?;
        Ok(rule)
    }
}

fn list(value: &str) -> Result<Vec<&str>, RuleError> {
    let items: Vec<&str> = value.split(',').map(str::trim).collect();
    if items.iter().any(|item| item.is_empty()) {
        return Err(RuleError::Malformed(value.to_owned()));
    }
    Ok(items)
}

fn int_list(value: &str) -> Result<Vec<i64>, RuleError> {
    list(value)?
        .into_iter()
        .map(|v| {
            v.trim_start_matches('+')
                .parse()
                .map_err(|_e| RuleError::Malformed(value.to_owned()))
        })
        .collect()
}
