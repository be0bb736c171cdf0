//! Content line lexer for iCalendar (RFC 5545 §3.1).
//!
//! Handles line unfolding and tokenization of content lines.

use super::error::{ParseError, ParseErrorKind, ParseResult};
use crate::ical::core::{ContentLine, Parameter};

/// Splits input into content lines, merging folded continuations.
///
/// Handles both CRLF and bare LF line endings. Lines starting with SP/HTAB are
/// continuations of the previous line; unfolding drops the line break and the
/// single leading whitespace character. Each line carries its 1-based number.
#[must_use]
pub fn split_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (index, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let continuation = line
            .strip_prefix(' ')
            .or_else(|| line.strip_prefix('\t'))
            // Some publishers wrap long text without the leading space.
            .or_else(|| (!line.contains(':')).then_some(line));

        match (continuation, lines.last_mut()) {
            (Some(rest), Some((_, previous))) => previous.push_str(rest),
            (Some(rest), None) => lines.push((index + 1, rest.to_owned())),
            (None, _) => lines.push((index + 1, line.to_owned())),
        }
    }

    lines
}

/// Parses a single unfolded content line.
///
/// Format: `name *(";" param) ":" value`
///
/// ## Errors
/// Returns an error if the line is malformed or contains invalid characters.
pub fn parse_content_line(line: &str, line_num: usize) -> ParseResult<ContentLine> {
    let colon = find_unquoted(line, ':', line_num)?
        .ok_or_else(|| ParseError::new(ParseErrorKind::MissingColon, line_num, line.len()))?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let name_end = head.find(';').unwrap_or(head.len());
    let name = &head[..name_end];
    if name.is_empty() {
        return Err(ParseError::new(
            ParseErrorKind::MissingPropertyName,
            line_num,
            1,
        ));
    }
    if let Some(offset) = name.find(|c: char| !c.is_ascii_alphanumeric() && c != '-') {
        return Err(ParseError::new(
            ParseErrorKind::InvalidPropertyName,
            line_num,
            offset + 1,
        ));
    }

    let mut params = Vec::new();
    let mut rest = &head[name_end..];
    let mut column = name_end + 1;
    while let Some(after_semicolon) = rest.strip_prefix(';') {
        let end = find_unquoted(after_semicolon, ';', line_num)?.unwrap_or(after_semicolon.len());
        params.push(parse_parameter(&after_semicolon[..end], line_num, column + 1)?);
        column += end + 1;
        rest = &after_semicolon[end..];
    }

    Ok(ContentLine {
        name: name.to_ascii_uppercase(),
        params,
        raw_value: value.to_owned(),
        line: line_num,
    })
}

/// Finds the byte offset of `needle` outside double-quoted sections.
fn find_unquoted(s: &str, needle: char, line_num: usize) -> ParseResult<Option<usize>> {
    let mut quote_start = None;
    for (i, c) in s.char_indices() {
        match c {
            '"' if quote_start.is_some() => quote_start = None,
            '"' => quote_start = Some(i),
            c if c == needle && quote_start.is_none() => return Ok(Some(i)),
            _ => {}
        }
    }
    match quote_start {
        Some(start) => Err(ParseError::new(
            ParseErrorKind::UnclosedQuote,
            line_num,
            start + 1,
        )),
        None => Ok(None),
    }
}

/// Parses `NAME=value[,value...]`.
fn parse_parameter(raw: &str, line_num: usize, column: usize) -> ParseResult<Parameter> {
    let Some((name, raw_values)) = raw.split_once('=') else {
        return Err(ParseError::new(ParseErrorKind::InvalidParameter, line_num, column)
            .with_context(format!("parameter '{raw}' has no value")));
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ParseError::new(
            ParseErrorKind::InvalidParameter,
            line_num,
            column,
        ));
    }

    let mut values = Vec::new();
    let mut rest = raw_values;
    loop {
        let end = find_unquoted(rest, ',', line_num)?.unwrap_or(rest.len());
        values.push(decode_param_value(&rest[..end]));
        match rest.get(end + 1..) {
            Some(next) => rest = next,
            None => break,
        }
    }

    Ok(Parameter::with_values(name, values))
}

/// Strips surrounding quotes and applies RFC 6868 caret decoding.
fn decode_param_value(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_owned();
    };

    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '^' {
            value.push(c);
            continue;
        }
        match chars.peek() {
            Some('^') => value.push('^'),
            Some('n') => value.push('\n'),
            Some('\'') => value.push('"'),
            _ => {
                value.push('^');
                continue;
            }
        }
        chars.next();
    }
    value
}
