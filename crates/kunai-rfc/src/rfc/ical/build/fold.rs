//! Content line folding (RFC 5545 §3.1).

/// Maximum line length in octets, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 75;

/// Folds a content line at 75 octets and terminates it with CRLF.
///
/// Continuation lines start with a single space, which counts toward their
/// length. Multi-byte UTF-8 sequences are never split.
#[must_use]
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return format!("{line}\r\n");
    }

    let mut result = String::with_capacity(line.len() + (line.len() / MAX_LINE_OCTETS + 1) * 3);
    let mut segment_len = 0;
    let mut limit = MAX_LINE_OCTETS;

    for c in line.chars() {
        let width = c.len_utf8();
        if segment_len + width > limit {
            result.push_str("\r\n ");
            segment_len = 0;
            limit = MAX_LINE_OCTETS - 1;
        }
        result.push(c);
        segment_len += width;
    }

    result.push_str("\r\n");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_line_unchanged() {
        assert_eq!(fold_line("UID:1"), "UID:1\r\n");
    }

    #[test]
    fn long_line_folded_within_limit() {
        let line = format!("DESCRIPTION:{}", "x".repeat(200));
        let folded = fold_line(&line);
        for physical in folded.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(physical.len() <= MAX_LINE_OCTETS, "{physical}");
        }
        let unfolded = folded.replace("\r\n ", "");
        assert_eq!(unfolded, format!("{line}\r\n"));
    }

    #[test]
    fn multibyte_never_split() {
        let line = format!("SUMMARY:{}", "é".repeat(60));
        let folded = fold_line(&line);
        for physical in folded.split("\r\n") {
            assert!(physical.len() <= MAX_LINE_OCTETS);
        }
        assert_eq!(folded.replace("\r\n ", ""), format!("{line}\r\n"));
    }
}
