//! Recurrence rules, their expansion, and timezone handling.

mod expander;
mod rule;
mod timezone;

pub use expander::{ExpansionParams, MAX_OCCURRENCES};
pub use rule::{
    Frequency, RuleDefinition, RuleError, WeekdayCode, validate_month_days, validate_months,
};
pub use timezone::{ConversionError, TimeZoneResolver, localize};
