//! Public key retrieval strategies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kunai_core::constants::{USER_AGENT, WELL_KNOWN_DOMAINKEY_PREFIX};
use kunai_core::types::KeyLookupMethod;
use kunai_rfc::rfc::dkim::PublicKeyRecord;

use crate::error::ServiceResult;
use crate::net::HostResolver;

/// One way of finding the public keys published for a domain and selector.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    /// The `q=` method this strategy implements.
    fn method(&self) -> KeyLookupMethod;

    /// Cache key for a domain and selector, unique to the strategy.
    fn selector_key(&self, domain: &str, selector: &str) -> String;

    /// Fetches every record published at the selector. Records that do not
    /// parse are skipped.
    ///
    /// ## Errors
    /// Returns an error if the source cannot be reached.
    async fn lookup_keys(&self, domain: &str, selector: &str) -> ServiceResult<Vec<PublicKeyRecord>>;
}

fn parse_records<'a>(source: &str, lines: impl Iterator<Item = &'a str>) -> Vec<PublicKeyRecord> {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match PublicKeyRecord::parse(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(source = %source, error = %e, "Skipping unparsable key record");
                None
            }
        })
        .collect()
}

/// `dns/txt`: TXT records at `{selector}._domainkey.{domain}`.
pub struct DnsTxtLookup {
    resolver: Arc<dyn HostResolver>,
}

impl DnsTxtLookup {
    #[must_use]
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl KeyLookup for DnsTxtLookup {
    fn method(&self) -> KeyLookupMethod {
        KeyLookupMethod::DnsTxt
    }

    fn selector_key(&self, domain: &str, selector: &str) -> String {
        format!("{selector}._domainkey.{domain}")
    }

    async fn lookup_keys(&self, domain: &str, selector: &str) -> ServiceResult<Vec<PublicKeyRecord>> {
        let name = self.selector_key(domain, selector);
        let records = self.resolver.txt(&name).await?;
        Ok(parse_records(&name, records.iter().map(String::as_str)))
    }
}

/// `http/well-known`: records served one per line at
/// `{origin}/.well-known/domainkey/{domain}/{selector}`.
pub struct HttpWellKnownLookup {
    client: reqwest::Client,
    origin: Option<String>,
}

impl HttpWellKnownLookup {
    /// `origin` replaces `https://{domain}` when set.
    ///
    /// ## Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(origin: Option<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, origin })
    }

    fn url(&self, domain: &str, selector: &str) -> String {
        let origin = self
            .origin
            .as_deref()
            .map_or_else(|| format!("https://{domain}"), |o| o.trim_end_matches('/').to_string());
        format!("{origin}{WELL_KNOWN_DOMAINKEY_PREFIX}/{domain}/{selector}")
    }
}

#[async_trait]
impl KeyLookup for HttpWellKnownLookup {
    fn method(&self) -> KeyLookupMethod {
        KeyLookupMethod::HttpWellKnown
    }

    fn selector_key(&self, domain: &str, selector: &str) -> String {
        self.url(domain, selector)
    }

    async fn lookup_keys(&self, domain: &str, selector: &str) -> ServiceResult<Vec<PublicKeyRecord>> {
        let url = self.url(domain, selector);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "No public key at well-known location");
            return Ok(Vec::new());
        }
        let body = response.text().await?;
        Ok(parse_records(&url, body.lines()))
    }
}

/// `private-exchange`: files named `{domain}#{selector}` in a directory,
/// one record per line.
pub struct PrivateExchangeLookup {
    directory: PathBuf,
}

impl PrivateExchangeLookup {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl KeyLookup for PrivateExchangeLookup {
    fn method(&self) -> KeyLookupMethod {
        KeyLookupMethod::PrivateExchange
    }

    fn selector_key(&self, domain: &str, selector: &str) -> String {
        format!("{domain}#{selector}")
    }

    async fn lookup_keys(&self, domain: &str, selector: &str) -> ServiceResult<Vec<PublicKeyRecord>> {
        let name = self.selector_key(domain, selector);
        if name.contains('/') || name.contains("..") {
            tracing::warn!(name = %name, "Refusing private exchange key name");
            return Ok(Vec::new());
        }
        let path = self.directory.join(&name);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(parse_records(&name, data.lines())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::StaticHostResolver;

    #[tokio::test]
    async fn dns_txt_records() {
        let resolver = StaticHostResolver::new().with_txt(
            "ischedule._domainkey.example.org",
            "v=DKIM1; k=rsa; p=QUJD",
        );
        let lookup = DnsTxtLookup::new(Arc::new(resolver));
        assert_eq!(
            lookup.selector_key("example.org", "ischedule"),
            "ischedule._domainkey.example.org"
        );
        let records = lookup.lookup_keys("example.org", "ischedule").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(lookup.lookup_keys("example.net", "ischedule").await.is_err());
    }

    #[tokio::test]
    async fn private_exchange_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("example.org#ischedule"),
            "v=DKIM1; p=\n\nv=DKIM1; h=sha256; p=QUJD\n",
        )
        .unwrap();

        let lookup = PrivateExchangeLookup::new(dir.path());
        let records = lookup.lookup_keys("example.org", "ischedule").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_revoked());
        assert!(
            lookup
                .lookup_keys("example.net", "ischedule")
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            lookup
                .lookup_keys("../etc", "passwd")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn well_known_urls() {
        let default = HttpWellKnownLookup::new(None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            default.selector_key("example.org", "ischedule"),
            "https://example.org/.well-known/domainkey/example.org/ischedule"
        );
        let custom =
            HttpWellKnownLookup::new(Some("http://127.0.0.1:9000/".to_string()), Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            custom.selector_key("example.org", "s1"),
            "http://127.0.0.1:9000/.well-known/domainkey/example.org/s1"
        );
    }
}
