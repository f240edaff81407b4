use std::hash::{Hash, Hasher};

/// The URI scheme family of a calendar-user address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressScheme {
    Mailto,
    Http,
    Urn,
    Path,
    Other,
}

impl AddressScheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mailto => "mailto",
            Self::Http => "http",
            Self::Urn => "urn",
            Self::Path => "path",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for AddressScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ## Summary
/// A calendar-user address exactly as it appeared in a request, paired with
/// its normalized comparison form.
///
/// Equality and hashing use the normalized form so that `MAILTO:User@Example.COM`
/// and `mailto:user@example.com` are the same user, while the original text is
/// kept for correlating responses.
#[derive(Debug, Clone)]
pub struct CalendarUserAddress {
    raw: String,
    normalized: String,
}

impl CalendarUserAddress {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize_address(&raw);
        Self { raw, normalized }
    }

    /// The address as received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    #[must_use]
    pub fn scheme(&self) -> AddressScheme {
        scheme_of(&self.normalized)
    }

    /// Returns the bare email address for `mailto:` addresses.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self.scheme() {
            AddressScheme::Mailto => Some(&self.normalized["mailto:".len()..]),
            _ => None,
        }
    }

    /// Returns the domain part of a `mailto:` address.
    #[must_use]
    pub fn mailto_domain(&self) -> Option<&str> {
        self.email()
            .and_then(|email| email.rsplit_once('@'))
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// Returns the host of an `http:`/`https:` address.
    #[must_use]
    pub fn http_host(&self) -> Option<&str> {
        if self.scheme() != AddressScheme::Http {
            return None;
        }
        let rest = self.normalized.split_once("://")?.1;
        let authority = rest.split('/').next()?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = host.split(':').next()?;
        (!host.is_empty()).then_some(host)
    }

    /// Returns the domain this address belongs to, for either `mailto:` or URL forms.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.mailto_domain().or_else(|| self.http_host())
    }
}

impl PartialEq for CalendarUserAddress {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for CalendarUserAddress {}

impl Hash for CalendarUserAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl std::fmt::Display for CalendarUserAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for CalendarUserAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CalendarUserAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

fn scheme_of(address: &str) -> AddressScheme {
    let lower = address.get(..8).unwrap_or(address).to_ascii_lowercase();
    if lower.starts_with("mailto:") {
        AddressScheme::Mailto
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        AddressScheme::Http
    } else if lower.starts_with("urn:") {
        AddressScheme::Urn
    } else if address.starts_with('/') {
        AddressScheme::Path
    } else {
        AddressScheme::Other
    }
}

/// ## Summary
/// Normalizes a calendar-user address for comparison.
///
/// `mailto:` addresses are lower-cased in full. URL and path forms have
/// trailing slashes stripped but keep their case. Everything else is only
/// trimmed.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    match scheme_of(address) {
        AddressScheme::Mailto => address.to_lowercase(),
        AddressScheme::Http | AddressScheme::Path => {
            let trimmed = address.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        }
        AddressScheme::Urn | AddressScheme::Other => address.to_string(),
    }
}

/// DKIM signing algorithm (`a=` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
pub enum DkimAlgorithm {
    #[serde(rename = "rsa-sha1")]
    RsaSha1,
    #[default]
    #[serde(rename = "rsa-sha256")]
    RsaSha256,
}

impl DkimAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }

    /// The hash name as it appears in a key record's `h=` tag.
    #[must_use]
    pub const fn hash_name(self) -> &'static str {
        match self {
            Self::RsaSha1 => "sha1",
            Self::RsaSha256 => "sha256",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "rsa-sha1" => Some(Self::RsaSha1),
            "rsa-sha256" => Some(Self::RsaSha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for DkimAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public key lookup strategy (`q=` tag item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum KeyLookupMethod {
    #[serde(rename = "dns/txt")]
    DnsTxt,
    #[serde(rename = "http/well-known")]
    HttpWellKnown,
    #[serde(rename = "private-exchange")]
    PrivateExchange,
}

impl KeyLookupMethod {
    /// Default verifier priority order.
    pub const DEFAULT_ORDER: [Self; 3] = [Self::PrivateExchange, Self::HttpWellKnown, Self::DnsTxt];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DnsTxt => "dns/txt",
            Self::HttpWellKnown => "http/well-known",
            Self::PrivateExchange => "private-exchange",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "dns/txt" => Some(Self::DnsTxt),
            "http/well-known" => Some(Self::HttpWellKnown),
            "private-exchange" => Some(Self::PrivateExchange),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyLookupMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
