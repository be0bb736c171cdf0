//! iCalendar document parser (RFC 5545).
//!
//! Builds the component tree from content lines. Property values stay raw.

use super::error::{ParseError, ParseErrorKind, ParseResult};
use super::lexer::{parse_content_line, split_lines};
use crate::ical::core::{Component, ContentLine, ICalendar};

/// Parses an iCalendar document from a string.
///
/// ## Errors
///
/// Returns an error if the input is not valid iCalendar.
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
pub fn parse(input: &str) -> ParseResult<ICalendar> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let lines = split_lines(input);

    if lines.is_empty() {
        tracing::warn!("Empty iCalendar input");
        return Err(ParseError::new(ParseErrorKind::MissingBegin, 1, 1)
            .with_context("empty document"));
    }

    tracing::debug!(count = lines.len(), "Split lines");

    let mut content_lines = lines
        .into_iter()
        .map(|(line_num, line)| parse_content_line(&line, line_num).map(|cl| (line_num, cl)));

    let Some(first) = content_lines.next().transpose()? else {
        return Err(ParseError::new(ParseErrorKind::MissingBegin, 1, 1));
    };
    let (line_num, begin) = first;
    if begin.name != "BEGIN" || !begin.raw_value.trim().eq_ignore_ascii_case("VCALENDAR") {
        tracing::warn!("Root component is not VCALENDAR");
        return Err(ParseError::new(ParseErrorKind::MissingBegin, line_num, 1)
            .with_context("expected BEGIN:VCALENDAR"));
    }

    let root = parse_component(&mut content_lines, line_num, "VCALENDAR")?;

    tracing::debug!(
        children = root.children.len(),
        "iCalendar document parsed successfully"
    );

    Ok(ICalendar { root })
}

/// Parses the body of a component whose BEGIN line was already consumed.
fn parse_component(
    lines: &mut impl Iterator<Item = ParseResult<(usize, ContentLine)>>,
    begin_line: usize,
    name: &str,
) -> ParseResult<Component> {
    let mut component = Component::new(name);
    let mut last_line = begin_line;

    loop {
        let Some(next) = lines.next() else {
            return Err(ParseError::new(ParseErrorKind::MissingEnd, last_line, 1)
                .with_context(format!("missing END:{name}")));
        };
        let (line_num, content_line) = next?;
        last_line = line_num;

        match content_line.name.as_str() {
            "BEGIN" => {
                let nested_name = content_line.raw_value.trim().to_ascii_uppercase();
                let nested = parse_component(lines, line_num, &nested_name)?;
                component.add_child(nested);
            }
            "END" => {
                let end_name = content_line.raw_value.trim().to_ascii_uppercase();
                if end_name != component.name {
                    return Err(
                        ParseError::new(ParseErrorKind::MismatchedComponent, line_num, 1)
                            .with_context(format!(
                                "expected END:{}, got END:{end_name}",
                                component.name
                            )),
                    );
                }
                return Ok(component);
            }
            _ => component.add_property(content_line),
        }
    }
}
