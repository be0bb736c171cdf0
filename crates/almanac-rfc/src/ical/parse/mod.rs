//! iCalendar text parsing (RFC 5545 §3.1-3.3).

mod error;
mod lexer;
mod parser;
mod values;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use lexer::{parse_content_line, split_lines};
pub use parser::parse;
pub use values::{DateValue, parse_date_list, parse_date_value, unescape_text};
