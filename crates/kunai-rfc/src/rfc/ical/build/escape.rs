//! iCalendar parameter value quoting.

/// Escapes a parameter value if needed.
///
/// Returns the value quoted, with RFC 6868 caret encoding, when it contains
/// characters that would otherwise end the parameter.
#[must_use]
pub fn escape_param_value(s: &str) -> String {
    if !s.chars().any(|c| matches!(c, ':' | ';' | ',' | '"' | '\n' | '^')) {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 4);
    result.push('"');
    for c in s.chars() {
        match c {
            '^' => result.push_str("^^"),
            '\n' => result.push_str("^n"),
            '"' => result.push_str("^'"),
            _ => result.push(c),
        }
    }
    result.push('"');
    result
}
