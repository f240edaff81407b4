//! "relaxed" header canonicalization and body preparation (RFC 6376 §3.4).

use std::borrow::Cow;

/// Canonicalizes one header with the relaxed algorithm.
///
/// The name is lower-cased, runs of whitespace in the value collapse to a
/// single space, the value is trimmed and a CRLF is appended.
#[must_use]
pub fn canonicalize_header(name: &str, value: &str) -> String {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}:{value}\r\n", name.trim().to_ascii_lowercase())
}

/// Blanks the `b=` tag of a DKIM-Signature value.
///
/// Only the tag named exactly `b` is touched; `bh` and every other tag keep
/// their text.
#[must_use]
pub fn remove_signature_value(value: &str) -> String {
    value
        .split(';')
        .map(|segment| match segment.split_once('=') {
            Some((name, _)) if name.trim() == "b" => Cow::Owned(format!("{name}=")),
            _ => Cow::Borrowed(segment),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Returns the body as hashed for `bh=`: unchanged if it already ends with
/// CRLF, otherwise with one appended.
#[must_use]
pub fn canonicalize_body(body: &[u8]) -> Cow<'_, [u8]> {
    if body.ends_with(b"\r\n") {
        Cow::Borrowed(body)
    } else {
        let mut owned = Vec::with_capacity(body.len() + 2);
        owned.extend_from_slice(body);
        owned.extend_from_slice(b"\r\n");
        Cow::Owned(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_header() {
        assert_eq!(
            canonicalize_header("Content-Type", "  text/calendar;\t charset=utf-8  "),
            "content-type:text/calendar; charset=utf-8\r\n"
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize_header("Recipient", "mailto:a@example.org,   mailto:b@example.org");
        let (name, value) = once.trim_end_matches("\r\n").split_once(':').unwrap();
        assert_eq!(canonicalize_header(name, value), once);
    }

    #[test]
    fn blanks_only_b_tag() {
        assert_eq!(
            remove_signature_value("v=1; bh=abc; h=Originator; b=xyz+/=="),
            "v=1; bh=abc; h=Originator; b="
        );
        assert_eq!(
            remove_signature_value("b=xyz; bh=abc"),
            "b=; bh=abc"
        );
    }

    #[test]
    fn body_gets_trailing_crlf() {
        assert_eq!(&*canonicalize_body(b"abc"), b"abc\r\n");
        assert!(matches!(canonicalize_body(b"abc\r\n"), Cow::Borrowed(_)));
    }
}
