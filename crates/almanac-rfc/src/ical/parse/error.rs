//! Parse errors carrying the position of the offending content line.

use std::fmt;

/// Category of an iCalendar parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    MissingBegin,
    MissingEnd,
    MismatchedComponent,
    MissingPropertyName,
    InvalidPropertyName,
    InvalidParameter,
    UnclosedQuote,
    MissingColon,
    InvalidDate,
    InvalidTime,
    InvalidDateTime,
}

impl ParseErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingBegin => "missing BEGIN",
            Self::MissingEnd => "missing END",
            Self::MismatchedComponent => "mismatched component",
            Self::MissingPropertyName => "missing property name",
            Self::InvalidPropertyName => "invalid property name",
            Self::InvalidParameter => "invalid parameter",
            Self::UnclosedQuote => "unclosed quoted parameter value",
            Self::MissingColon => "missing ':' separator",
            Self::InvalidDate => "invalid DATE value",
            Self::InvalidTime => "invalid TIME value",
            Self::InvalidDateTime => "invalid DATE-TIME value",
        }
    }
}

/// An iCalendar parse error with line/column information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
    pub context: Option<String>,
}

impl ParseError {
    #[must_use]
    pub const fn new(kind: ParseErrorKind, line: usize, column: usize) -> Self {
        Self {
            kind,
            line,
            column,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.kind.as_str(),
            self.line,
            self.column
        )?;
        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }
        Ok(())
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
