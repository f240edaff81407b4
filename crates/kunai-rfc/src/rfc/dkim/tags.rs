//! DKIM tag lists (RFC 6376 §3.2) and the DKIM-Signature model.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kunai_core::types::{DkimAlgorithm, KeyLookupMethod};

use super::error::{DkimError, DkimResult};

/// An ordered `name=value; ...` list.
///
/// Whitespace around names and values is dropped. Empty segments, as left
/// by a trailing `;`, are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList(Vec<(String, String)>);

impl TagList {
    /// Parses a tag list.
    ///
    /// ## Errors
    /// Returns an error if a segment has no `=` or an empty name.
    pub fn parse(data: &str) -> DkimResult<Self> {
        let mut tags = Vec::new();
        for segment in data.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| DkimError::MalformedTagList(segment.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(DkimError::MalformedTagList(segment.to_string()));
            }
            tags.push((name.to_string(), value.trim().to_string()));
        }
        Ok(Self(tags))
    }

    /// Returns the value of the first tag with this name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &'static str) -> DkimResult<&str> {
        self.get(name).ok_or(DkimError::MissingTag(name))
    }
}

/// The tags of a DKIM-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTags {
    pub domain: String,
    pub selector: String,
    /// Signing time, seconds since the epoch (`t=`).
    pub timestamp: Option<i64>,
    /// Expiry, seconds since the epoch (`x=`).
    pub expiration: Option<i64>,
    pub algorithm: DkimAlgorithm,
    /// Key lookup methods the verifier may use (`q=`).
    pub key_methods: Vec<KeyLookupMethod>,
    /// base64 of `METHOD:request-target` (`http=`).
    pub http: String,
    pub canonicalization: String,
    /// Signed header names in order, possibly repeated (`h=`).
    pub headers: Vec<String>,
    /// base64 body hash (`bh=`).
    pub body_hash: String,
    /// base64 signature (`b=`), empty while signing.
    pub signature: String,
}

const REQUIRED_TAGS: [&str; 9] = ["v", "a", "b", "bh", "c", "d", "h", "s", "http"];

impl SignatureTags {
    /// Canonicalization this implementation signs with.
    pub const CANONICALIZATION: &'static str = "relaxed/simple";

    /// Encodes a request method and target for the `http=` tag.
    #[must_use]
    pub fn encode_http(method: &str, path: &str) -> String {
        STANDARD.encode(format!("{method}:{path}"))
    }

    /// Decodes the `http=` tag into method and request target.
    ///
    /// ## Errors
    /// Returns an error if the tag is not base64 of `METHOD:target`.
    pub fn http_request(&self) -> DkimResult<(String, String)> {
        let invalid = || DkimError::InvalidTag {
            tag: "http",
            value: self.http.clone(),
        };
        let decoded = STANDARD.decode(strip_whitespace(&self.http)).map_err(|_| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
        let (method, path) = decoded.split_once(':').ok_or_else(invalid)?;
        Ok((method.to_string(), path.to_string()))
    }

    /// Seconds past expiry at `now`, if the signature has expired.
    #[must_use]
    pub fn expired_by(&self, now: i64) -> Option<i64> {
        self.expiration
            .map(|x| now.saturating_sub(x))
            .filter(|seconds| *seconds > 0)
    }

    /// Renders the header value in fixed tag order.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut tags: Vec<String> = vec![
            "v=1".to_string(),
            format!("d={}", self.domain),
            format!("s={}", self.selector),
        ];
        if let Some(t) = self.timestamp {
            tags.push(format!("t={t}"));
        }
        if let Some(x) = self.expiration {
            tags.push(format!("x={x}"));
        }
        tags.push(format!("a={}", self.algorithm));
        if !self.key_methods.is_empty() {
            let methods: Vec<&str> = self.key_methods.iter().map(|m| m.as_str()).collect();
            tags.push(format!("q={}", methods.join(":")));
        }
        tags.push(format!("http={}", self.http));
        tags.push(format!("c={}", self.canonicalization));
        tags.push(format!("h={}", self.headers.join(":")));
        tags.push(format!("bh={}", self.body_hash));
        tags.push(format!("b={}", self.signature));
        tags.join("; ")
    }

    /// Parses and validates a received DKIM-Signature value.
    ///
    /// ## Summary
    /// Requires `v`, `a`, `b`, `bh`, `c`, `d`, `h`, `s` and `http`, and
    /// checks `v=1`, a known RSA algorithm, relaxed header canonicalization
    /// and known `q=` methods. A missing `q=` means DNS TXT.
    ///
    /// ## Errors
    /// Returns the first missing or invalid tag.
    pub fn parse(value: &str) -> DkimResult<Self> {
        let tags = TagList::parse(value)?;
        for name in REQUIRED_TAGS {
            tags.require(name)?;
        }

        let version = tags.require("v")?;
        if version != "1" {
            return Err(invalid_tag("v", version));
        }

        let algorithm_value = tags.require("a")?;
        let algorithm =
            DkimAlgorithm::parse(algorithm_value).ok_or_else(|| invalid_tag("a", algorithm_value))?;

        let canonicalization = tags.require("c")?;
        if !matches!(canonicalization, "relaxed" | "relaxed/simple") {
            return Err(invalid_tag("c", canonicalization));
        }

        let key_methods = match tags.get("q") {
            Some(q) => q
                .split(':')
                .map(|item| KeyLookupMethod::parse(item).ok_or_else(|| invalid_tag("q", q)))
                .collect::<DkimResult<Vec<_>>>()?,
            None => vec![KeyLookupMethod::DnsTxt],
        };

        let parse_time = |name: &'static str| -> DkimResult<Option<i64>> {
            tags.get(name)
                .map(|v| v.parse::<i64>().map_err(|_| invalid_tag(name, v)))
                .transpose()
        };

        Ok(Self {
            domain: tags.require("d")?.to_string(),
            selector: tags.require("s")?.to_string(),
            timestamp: parse_time("t")?,
            expiration: parse_time("x")?,
            algorithm,
            key_methods,
            http: tags.require("http")?.to_string(),
            canonicalization: canonicalization.to_string(),
            headers: tags
                .require("h")?
                .split(':')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            body_hash: strip_whitespace(tags.require("bh")?),
            signature: strip_whitespace(tags.require("b")?),
        })
    }
}

fn invalid_tag(tag: &'static str, value: &str) -> DkimError {
    DkimError::InvalidTag {
        tag,
        value: value.to_string(),
    }
}

/// base64 tag values may be folded with whitespace.
fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignatureTags {
        SignatureTags {
            domain: "example.com".to_string(),
            selector: "ischedule".to_string(),
            timestamp: Some(1_000),
            expiration: Some(4_600),
            algorithm: DkimAlgorithm::RsaSha256,
            key_methods: vec![KeyLookupMethod::DnsTxt, KeyLookupMethod::HttpWellKnown],
            http: SignatureTags::encode_http("POST", "/ischedule"),
            canonicalization: SignatureTags::CANONICALIZATION.to_string(),
            headers: vec!["Originator".to_string(), "Recipient".to_string()],
            body_hash: "Ym9keQ==".to_string(),
            signature: String::new(),
        }
    }

    #[test]
    fn tag_list_parsing() {
        let tags = TagList::parse(" v = DKIM1 ; k=rsa;p=abc ; ").unwrap();
        assert_eq!(tags.get("v"), Some("DKIM1"));
        assert_eq!(tags.get("p"), Some("abc"));
        assert_eq!(tags.get("h"), None);
        assert!(TagList::parse("v=1; broken").is_err());
    }

    #[test]
    fn header_value_order() {
        let value = sample().to_header_value();
        assert!(value.starts_with("v=1; d=example.com; s=ischedule; t=1000; x=4600; a=rsa-sha256; q=dns/txt:http/well-known; http="));
        assert!(value.ends_with("; c=relaxed/simple; h=Originator:Recipient; bh=Ym9keQ==; b="));
    }

    #[test]
    fn parse_round_trip() {
        let mut tags = sample();
        tags.signature = "c2ln".to_string();
        let parsed = SignatureTags::parse(&tags.to_header_value()).unwrap();
        assert_eq!(parsed, tags);
        assert_eq!(
            parsed.http_request().unwrap(),
            ("POST".to_string(), "/ischedule".to_string())
        );
    }

    #[test]
    fn rejects_missing_and_invalid_tags() {
        let value = sample().to_header_value().replace("; bh=Ym9keQ==", "");
        assert_eq!(SignatureTags::parse(&value), Err(DkimError::MissingTag("bh")));

        let value = sample().to_header_value().replace("a=rsa-sha256", "a=ed25519-sha256");
        assert!(matches!(
            SignatureTags::parse(&value),
            Err(DkimError::InvalidTag { tag: "a", .. })
        ));

        let value = sample().to_header_value().replace("c=relaxed/simple", "c=simple/simple");
        assert!(matches!(
            SignatureTags::parse(&value),
            Err(DkimError::InvalidTag { tag: "c", .. })
        ));

        let value = sample().to_header_value().replace("q=dns/txt", "q=dns/srv");
        assert!(matches!(
            SignatureTags::parse(&value),
            Err(DkimError::InvalidTag { tag: "q", .. })
        ));
    }

    #[test]
    fn expiry() {
        let tags = sample();
        assert_eq!(tags.expired_by(4_600), None);
        assert_eq!(tags.expired_by(4_630), Some(30));
    }

    #[test]
    fn extreme_expiry_saturates() {
        let mut tags = sample();
        tags.expiration = Some(i64::MIN);
        let parsed = SignatureTags::parse(&tags.to_header_value()).unwrap();
        assert_eq!(parsed.expired_by(1_700_000_000), Some(i64::MAX));

        tags.expiration = Some(i64::MAX);
        assert_eq!(tags.expired_by(i64::MIN), None);
    }
}
