//! Value helpers for the few iCalendar value types scheduling interprets.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Removes TEXT escapes (RFC 5545 §3.3.11).
#[must_use]
pub fn unescape_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => result.push('\n'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

/// Parses a DATE-TIME value that must be in UTC form (`YYYYMMDDTHHMMSSZ`).
///
/// Floating and zoned forms, as well as plain DATE values, yield `None`.
#[must_use]
pub fn parse_utc_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let local = s.strip_suffix('Z')?;
    NaiveDateTime::parse_from_str(local, "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
