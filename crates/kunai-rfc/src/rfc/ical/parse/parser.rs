//! iCalendar document parser (RFC 5545).

use super::error::{ParseError, ParseErrorKind, ParseResult};
use super::lexer::{parse_content_line, split_lines};
use crate::rfc::ical::core::{Component, ContentLine, ICalendar};

/// Parses an iCalendar document from a string.
///
/// ## Errors
///
/// Returns an error if the input is not a single well-formed VCALENDAR.
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
pub fn parse(input: &str) -> ParseResult<ICalendar> {
    let lines = split_lines(input);

    if lines.is_empty() {
        tracing::warn!("Empty iCalendar input");
        return Err(ParseError::new(ParseErrorKind::MissingBegin, 1, 1));
    }

    tracing::trace!(count = lines.len(), "Split lines");

    let mut iter = lines.into_iter();
    let (first_num, first_line) = iter
        .next()
        .ok_or_else(|| ParseError::new(ParseErrorKind::MissingBegin, 1, 1))?;
    let begin = parse_content_line(&first_line, first_num)?;

    if begin.name != "BEGIN" || !begin.raw_value.eq_ignore_ascii_case("VCALENDAR") {
        tracing::warn!("Root component is not VCALENDAR");
        return Err(ParseError::new(ParseErrorKind::MissingBegin, first_num, 1)
            .with_context("expected BEGIN:VCALENDAR"));
    }

    let root = parse_component(&mut iter, first_num, &begin.raw_value)?;

    if let Some((line_num, _)) = iter.next() {
        return Err(ParseError::new(ParseErrorKind::TrailingContent, line_num, 1));
    }

    tracing::trace!("iCalendar document parsed successfully");

    Ok(ICalendar { root })
}

/// Parses the body of a component whose BEGIN line was already consumed.
fn parse_component(
    iter: &mut impl Iterator<Item = (usize, String)>,
    begin_line_num: usize,
    name: &str,
) -> ParseResult<Component> {
    let mut component = Component::named(name);
    let mut last_line_num = begin_line_num;

    loop {
        let Some((line_num, line)) = iter.next() else {
            return Err(ParseError::new(ParseErrorKind::MissingEnd, last_line_num, 1)
                .with_context(format!("missing END:{}", component.name)));
        };
        last_line_num = line_num;

        let content_line: ContentLine = parse_content_line(&line, line_num)?;
        match content_line.name.as_str() {
            "BEGIN" => {
                let nested = parse_component(iter, line_num, &content_line.raw_value)?;
                component.children.push(nested);
            }
            "END" => {
                let end_name = content_line.raw_value.to_ascii_uppercase();
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
            _ => component.properties.push(content_line.into()),
        }
    }
}
