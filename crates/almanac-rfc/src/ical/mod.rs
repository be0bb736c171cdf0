//! iCalendar feed handling: a lenient RFC 5545 parser, the recurrence rule
//! language and its expansion, and extraction of feed entries.

pub mod core;
pub mod expand;
pub mod feed;
pub mod parse;
