//! Content line lexer for iCalendar (RFC 5545 §3.1).

use super::error::{ParseError, ParseErrorKind, ParseResult};
use crate::rfc::ical::core::{ContentLine, Parameter};

/// Splits input into unfolded content lines, tagged with their 1-based
/// starting line number.
///
/// Accepts both CRLF and bare LF. A line starting with SP or HTAB continues
/// the previous one; unfolding drops the line break and that single
/// whitespace character. Blank lines are skipped.
#[must_use]
pub fn split_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (i, raw_line) in input.split('\n').enumerate() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }

        match (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(continuation), Some((_, prev))) => prev.push_str(continuation),
            (Some(continuation), None) => lines.push((i + 1, continuation.to_string())),
            (None, _) => lines.push((i + 1, line.to_string())),
        }
    }

    lines
}

/// Returns the byte offsets of `sep` in `s` that are not inside a
/// double-quoted section.
fn unquoted_positions(s: &str, sep: char) -> impl Iterator<Item = usize> + '_ {
    let mut quoted = false;
    s.char_indices().filter_map(move |(i, c)| {
        if c == '"' {
            quoted = !quoted;
            None
        } else if c == sep && !quoted {
            Some(i)
        } else {
            None
        }
    })
}

/// Splits `s` on every unquoted `sep`.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for pos in unquoted_positions(s, sep) {
        parts.push(&s[start..pos]);
        start = pos + sep.len_utf8();
    }
    parts.push(&s[start..]);
    parts
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Parses a single unfolded content line.
///
/// Format: `name *(";" param) ":" value`
///
/// ## Errors
/// Returns an error if the line is malformed.
pub fn parse_content_line(line: &str, line_num: usize) -> ParseResult<ContentLine> {
    let Some(colon) = unquoted_positions(line, ':').next() else {
        let kind = if line.matches('"').count() % 2 == 0 {
            ParseErrorKind::MissingColon
        } else {
            ParseErrorKind::UnclosedQuote
        };
        return Err(ParseError::new(kind, line_num, line.len()));
    };

    let mut segments = split_unquoted(&line[..colon], ';').into_iter();
    let name = segments.next().unwrap_or_default();

    if name.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingPropertyName, line_num, 1));
    }
    if let Some(pos) = name.find(|c| !is_name_char(c)) {
        return Err(ParseError::new(
            ParseErrorKind::InvalidPropertyName,
            line_num,
            pos + 1,
        ));
    }

    let params = segments
        .map(|segment| parse_parameter(segment, line_num))
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(ContentLine {
        name: name.to_ascii_uppercase(),
        params,
        raw_value: line[colon + 1..].to_string(),
    })
}

fn parse_parameter(segment: &str, line_num: usize) -> ParseResult<Parameter> {
    let (name, raw_values) = segment.split_once('=').ok_or_else(|| {
        ParseError::new(ParseErrorKind::InvalidParameter, line_num, 1)
            .with_context(format!("parameter without value: {segment}"))
    })?;

    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(ParseError::new(ParseErrorKind::InvalidParameter, line_num, 1)
            .with_context(format!("invalid parameter name: {name}")));
    }

    let values = split_unquoted(raw_values, ',')
        .into_iter()
        .map(decode_param_value)
        .collect();

    Ok(Parameter::with_values(name, values))
}

/// Strips surrounding quotes and decodes RFC 6868 caret escapes.
fn decode_param_value(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_unfolds_continuations() {
        let input = "BEGIN:VCALENDAR\r\nDESCRIPTION:First\r\n Second\r\n\tThird\r\nEND:VCALENDAR\r\n";
        let lines = split_lines(input);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], (2, "DESCRIPTION:FirstSecondThird".to_string()));
    }

    #[test]
    fn split_accepts_bare_lf() {
        let lines = split_lines("A:1\nB:2\n");
        assert_eq!(lines, vec![(1, "A:1".to_string()), (2, "B:2".to_string())]);
    }

    #[test]
    fn parses_simple_line() {
        let line = parse_content_line("summary:Team Meeting", 1).unwrap();
        assert_eq!(line.name, "SUMMARY");
        assert!(line.params.is_empty());
        assert_eq!(line.raw_value, "Team Meeting");
    }

    #[test]
    fn parses_quoted_parameters_with_colons() {
        let line = parse_content_line(
            "ATTENDEE;CN=\"Doe, Jane: PhD\";PARTSTAT=NEEDS-ACTION:mailto:jane@example.com",
            3,
        )
        .unwrap();
        assert_eq!(line.name, "ATTENDEE");
        assert_eq!(line.params.len(), 2);
        assert_eq!(line.params[0].value(), Some("Doe, Jane: PhD"));
        assert_eq!(line.params[1].value(), Some("NEEDS-ACTION"));
        assert_eq!(line.raw_value, "mailto:jane@example.com");
    }

    #[test]
    fn parses_multi_valued_parameter() {
        let line = parse_content_line(
            "ATTENDEE;MEMBER=\"mailto:a@example.com\",\"mailto:b@example.com\":mailto:c@example.com",
            1,
        )
        .unwrap();
        assert_eq!(
            line.params[0].values,
            vec!["mailto:a@example.com", "mailto:b@example.com"]
        );
    }

    #[test]
    fn decodes_caret_escapes() {
        let line = parse_content_line("X-TEST;X-P=\"a^'b^nc^^\":v", 1).unwrap();
        assert_eq!(line.params[0].value(), Some("a\"b\nc^"));
    }

    #[test]
    fn rejects_missing_colon() {
        let err = parse_content_line("SUMMARY", 7).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingColon);
        assert_eq!(err.line, 7);
    }

    #[test]
    fn rejects_bad_names() {
        let err = parse_content_line(":value", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingPropertyName);

        let err = parse_content_line("SUM MARY:value", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidPropertyName);

        let err = parse_content_line("SUMMARY;NOVALUE:value", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidParameter);
    }

    #[test]
    fn rejects_unclosed_quote() {
        let err = parse_content_line("ATTENDEE;CN=\"Jane:mailto:jane@example.com", 1).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedQuote);
    }
}
