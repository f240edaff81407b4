use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kunai_core::config::DkimConfig;
use kunai_core::constants::DKIM_SIGNATURE_HEADER;
use kunai_core::types::{DkimAlgorithm, KeyLookupMethod};
use kunai_rfc::rfc::dkim::{
    DkimError, DkimResult, PublicKeyRecord, SignatureTags, canonicalize_body, canonicalize_header,
    remove_signature_value,
};
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use tracing_futures::Instrument;

use super::cache::KeyCache;
use super::lookup::{DnsTxtLookup, HttpWellKnownLookup, KeyLookup, PrivateExchangeLookup};
use super::{digest, padding};
use crate::error::ServiceResult;
use crate::net::HostResolver;

/// The parts of an inbound HTTP request a signature covers.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Request target as received, including any query.
    pub path: &'a str,
    /// Every header occurrence in wire order.
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
}

impl SignedRequest<'_> {
    fn header_values<'h>(&'h self, name: &'h str) -> impl Iterator<Item = &'h str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The signing identity of a verified request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub domain: String,
    pub selector: String,
}

/// Verifies DKIM signatures on inbound iSchedule requests.
///
/// Lookup strategies are tried in the configured order, restricted to the
/// methods the signature's `q=` tag allows. Records are cached per strategy
/// selector in a shared [`KeyCache`].
pub struct DkimVerifier {
    lookups: Vec<Box<dyn KeyLookup>>,
    cache: Arc<KeyCache>,
    timeout: Duration,
}

impl DkimVerifier {
    #[must_use]
    pub fn new(lookups: Vec<Box<dyn KeyLookup>>, cache: Arc<KeyCache>, timeout: Duration) -> Self {
        Self {
            lookups,
            cache,
            timeout,
        }
    }

    /// Builds the configured lookup strategies in priority order. The
    /// private exchange strategy is left out when no directory is set.
    ///
    /// ## Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(
        config: &DkimConfig,
        resolver: Arc<dyn HostResolver>,
        cache: Arc<KeyCache>,
    ) -> ServiceResult<Self> {
        let timeout = Duration::from_secs(config.lookup_timeout_seconds);
        let mut lookups: Vec<Box<dyn KeyLookup>> = Vec::new();
        for method in &config.lookup_methods {
            match method {
                KeyLookupMethod::PrivateExchange => match &config.private_exchanges_dir {
                    Some(dir) => lookups.push(Box::new(PrivateExchangeLookup::new(dir))),
                    None => tracing::debug!("No private exchange directory; skipping strategy"),
                },
                KeyLookupMethod::HttpWellKnown => lookups.push(Box::new(HttpWellKnownLookup::new(
                    config.http_key_origin.clone(),
                    timeout,
                )?)),
                KeyLookupMethod::DnsTxt => {
                    lookups.push(Box::new(DnsTxtLookup::new(Arc::clone(&resolver))));
                }
            }
        }
        Ok(Self::new(lookups, cache, timeout))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Verifies a request now. See [`DkimVerifier::verify_at`].
    ///
    /// ## Errors
    /// See [`DkimVerifier::verify_at`].
    pub async fn verify(&self, request: SignedRequest<'_>) -> DkimResult<VerifiedSignature> {
        self.verify_at(chrono::Utc::now().timestamp(), request).await
    }

    /// Verifies the request's signature as of `now`.
    ///
    /// ## Summary
    /// Requires exactly one DKIM-Signature, validates its tags, rejects an
    /// expired signature before any key lookup, checks the `http=` tag
    /// against the request, finds a usable public key, verifies the RSA
    /// signature over the signed headers and finally the body hash.
    ///
    /// ## Errors
    /// [`DkimError::Missing`] when the request carries no signature; any
    /// other variant means verification failed.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn verify_at(
        &self,
        now: i64,
        request: SignedRequest<'_>,
    ) -> DkimResult<VerifiedSignature> {
        let signatures: Vec<&str> = request.header_values(DKIM_SIGNATURE_HEADER).collect();
        let header = match signatures.as_slice() {
            [] => return Err(DkimError::Missing),
            [header] => *header,
            _ => return Err(DkimError::MultipleSignatures),
        };
        tracing::debug!(signature = %header, "Found DKIM-Signature");

        let tags = SignatureTags::parse(header)?;

        if let Some(seconds) = tags.expired_by(now) {
            return Err(DkimError::Expired { seconds });
        }

        let (method, path) = tags.http_request()?;
        if method != request.method {
            return Err(DkimError::HttpMismatch(format!("method {method}")));
        }
        if path != request.path {
            return Err(DkimError::HttpMismatch(format!("request-URI {path}")));
        }

        let signed = signed_header_data(&request, &tags.headers, header);
        tracing::trace!(signed = %signed, "DKIM signed data");

        let key = self
            .locate_public_key(&tags)
            .await
            .ok_or_else(|| DkimError::NoPublicKey {
                domain: tags.domain.clone(),
                selector: tags.selector.clone(),
            })?;

        let signature = STANDARD
            .decode(&tags.signature)
            .map_err(|_decode| DkimError::BadSignature)?;
        key.verify(
            padding(tags.algorithm),
            &digest(tags.algorithm, signed.as_bytes()),
            &signature,
        )
        .map_err(|_verify| DkimError::BadSignature)?;

        let body_hash = STANDARD.encode(digest(tags.algorithm, &canonicalize_body(request.body)));
        if body_hash != tags.body_hash {
            return Err(DkimError::BodyHashMismatch);
        }

        tracing::debug!(domain = %tags.domain, selector = %tags.selector, "DKIM signature verified");
        Ok(VerifiedSignature {
            domain: tags.domain,
            selector: tags.selector,
        })
    }

    async fn locate_public_key(&self, tags: &SignatureTags) -> Option<RsaPublicKey> {
        for lookup in &self.lookups {
            if !tags.key_methods.contains(&lookup.method()) {
                continue;
            }
            let records = self.records(lookup.as_ref(), &tags.domain, &tags.selector).await;
            if let Some(key) = select_key(&records, tags.algorithm) {
                return Some(key);
            }
        }
        None
    }

    async fn records(&self, lookup: &dyn KeyLookup, domain: &str, selector: &str) -> Vec<PublicKeyRecord> {
        let key = lookup.selector_key(domain, selector);
        if let Some(records) = self.cache.get(&key) {
            return records;
        }

        let span = tracing::debug_span!("dkim_key_lookup", method = %lookup.method(), domain = %domain, selector = %selector);
        let fetched = tokio::time::timeout(self.timeout, lookup.lookup_keys(domain, selector))
            .instrument(span)
            .await;
        match fetched {
            Ok(Ok(records)) => {
                self.cache.insert(key, records.clone());
                records
            }
            Ok(Err(e)) => {
                tracing::debug!(method = %lookup.method(), key = %key, error = %e, "Public key lookup failed");
                Vec::new()
            }
            Err(_elapsed) => {
                tracing::warn!(method = %lookup.method(), key = %key, "Public key lookup timed out");
                Vec::new()
            }
        }
    }
}

/// Canonicalized headers named by `h=`, followed by the signature header
/// with its `b=` value blanked.
///
/// The Nth listing of a name maps to the Nth occurrence of that header;
/// listings beyond the occurrences present contribute nothing.
fn signed_header_data(request: &SignedRequest<'_>, names: &[String], signature: &str) -> String {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut data = String::new();
    for name in names {
        let counter = counters.entry(name.to_ascii_lowercase()).or_insert(0);
        if let Some(value) = request.header_values(name).nth(*counter) {
            data.push_str(&canonicalize_header(name, value));
        }
        *counter += 1;
    }
    data.push_str(&canonicalize_header(
        DKIM_SIGNATURE_HEADER,
        &remove_signature_value(signature),
    ));
    data
}

/// The first record usable with `algorithm` whose key material decodes.
fn select_key(records: &[PublicKeyRecord], algorithm: DkimAlgorithm) -> Option<RsaPublicKey> {
    records
        .iter()
        .filter(|record| record.is_usable_for(algorithm))
        .find_map(|record| {
            let der = record.key_der().ok()?;
            let key = RsaPublicKey::from_public_key_der(&der)
                .ok()
                .or_else(|| RsaPublicKey::from_pkcs1_der(&der).ok());
            if key.is_none() {
                tracing::debug!(key = %record.public_key, "Unable to make public key");
            }
            key
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkim::DkimSigner;
    use crate::net::StaticHostResolver;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/dkim_private.pem");
    const BODY: &[u8] = b"BEGIN:VCALENDAR\r\nMETHOD:REQUEST\r\nEND:VCALENDAR\r\n";
    const NOW: i64 = 1_800_000_000;

    fn signer() -> DkimSigner {
        DkimSigner::from_pem(PRIVATE_KEY, "example.com", "ischedule", DkimAlgorithm::RsaSha256).unwrap()
    }

    fn verifier(signer: &DkimSigner) -> DkimVerifier {
        let resolver = StaticHostResolver::new().with_txt(
            "ischedule._domainkey.example.com",
            &signer.public_key_record().unwrap(),
        );
        DkimVerifier::new(
            vec![Box::new(DnsTxtLookup::new(Arc::new(resolver)))],
            Arc::new(KeyCache::from_seconds(0)),
            Duration::from_secs(5),
        )
    }

    fn headers() -> Vec<(String, String)> {
        vec![
            ("Host".to_string(), "peer.example.org:443".to_string()),
            ("Originator".to_string(), "mailto:a@example.com".to_string()),
            ("Recipient".to_string(), "mailto:b@example.org".to_string()),
            ("Content-Type".to_string(), "text/calendar; charset=utf-8".to_string()),
        ]
    }

    fn signed(headers: &[(String, String)], extra: &[&str]) -> Vec<(String, String)> {
        let value = signer()
            .sign_at(NOW, "POST", "/ischedule", headers, extra, BODY)
            .unwrap();
        let mut headers = headers.to_vec();
        headers.push((DKIM_SIGNATURE_HEADER.to_string(), value));
        headers
    }

    fn request<'a>(headers: &'a [(String, String)], path: &'a str, body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            method: "POST",
            path,
            headers,
            body,
        }
    }

    #[test_log::test(tokio::test)]
    async fn verifies_untouched_request() {
        let headers = signed(&headers(), &["Host"]);
        let verified = verifier(&signer())
            .verify_at(NOW, request(&headers, "/ischedule", BODY))
            .await
            .unwrap();
        assert_eq!(verified.domain, "example.com");
    }

    #[tokio::test]
    async fn mutations_fail() {
        let verifier = verifier(&signer());
        let headers = signed(&headers(), &["Host"]);

        let mut tampered = headers.clone();
        tampered[1].1 = "mailto:A@example.com".to_string();
        assert_eq!(
            verifier
                .verify_at(NOW, request(&tampered, "/ischedule", BODY))
                .await,
            Err(DkimError::BadSignature)
        );

        let mut body = BODY.to_vec();
        body[0] = b'b';
        assert_eq!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", &body))
                .await,
            Err(DkimError::BodyHashMismatch)
        );

        assert!(matches!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedulf", BODY))
                .await,
            Err(DkimError::HttpMismatch(_))
        ));
    }

    #[tokio::test]
    async fn extra_unsigned_occurrence_is_tolerated() {
        let verifier = verifier(&signer());
        let mut headers = signed(&headers(), &[]);
        headers.push(("Recipient".to_string(), "mailto:c@example.org".to_string()));
        assert!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn oversigned_header_rejects_added_copy() {
        let verifier = verifier(&signer());
        let mut headers = signed(&headers(), &["Recipient+"]);
        assert!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await
                .is_ok()
        );
        headers.push(("Recipient".to_string(), "mailto:c@example.org".to_string()));
        assert_eq!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await,
            Err(DkimError::BadSignature)
        );
    }

    #[tokio::test]
    async fn signed_repeated_header_must_all_arrive() {
        let verifier = verifier(&signer());
        let mut original = headers();
        original.push(("Recipient".to_string(), "mailto:c@example.org".to_string()));
        let mut headers = signed(&original, &["Recipient+"]);
        assert!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await
                .is_ok()
        );
        headers.retain(|(n, v)| !(n == "Recipient" && v == "mailto:c@example.org"));
        assert_eq!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await,
            Err(DkimError::BadSignature)
        );
    }

    #[tokio::test]
    async fn signature_count() {
        let verifier = verifier(&signer());
        let plain = headers();
        assert_eq!(
            verifier.verify_at(NOW, request(&plain, "/ischedule", BODY)).await,
            Err(DkimError::Missing)
        );

        let mut twice = signed(&headers(), &[]);
        let again = twice.last().cloned().unwrap();
        twice.push(again);
        assert_eq!(
            verifier.verify_at(NOW, request(&twice, "/ischedule", BODY)).await,
            Err(DkimError::MultipleSignatures)
        );
    }

    #[tokio::test]
    async fn expiry_is_checked_before_key_lookup() {
        // No lookup strategy at all: reaching lookup would give NoPublicKey.
        let verifier = DkimVerifier::new(
            Vec::new(),
            Arc::new(KeyCache::from_seconds(0)),
            Duration::from_secs(1),
        );
        let headers = signed(&headers(), &[]);
        assert_eq!(
            verifier
                .verify_at(NOW + 3_630, request(&headers, "/ischedule", BODY))
                .await,
            Err(DkimError::Expired { seconds: 30 })
        );
        assert!(matches!(
            verifier
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await,
            Err(DkimError::NoPublicKey { .. })
        ));
    }

    #[tokio::test]
    async fn key_methods_restrict_strategies() {
        let signer = signer().with_key_methods(vec![KeyLookupMethod::PrivateExchange]);
        let value = signer
            .sign_at(NOW, "POST", "/ischedule", &headers(), &[], BODY)
            .unwrap();
        let mut headers = headers();
        headers.push((DKIM_SIGNATURE_HEADER.to_string(), value));

        // Only DNS is configured, which the signature does not allow.
        let dns_only = verifier(&signer);
        assert!(matches!(
            dns_only
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await,
            Err(DkimError::NoPublicKey { .. })
        ));
        assert!(dns_only.cache().is_empty());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("example.com#ischedule"),
            format!("v=DKIM1; p=\n{}\n", signer.public_key_record().unwrap()),
        )
        .unwrap();
        let private = DkimVerifier::new(
            vec![Box::new(PrivateExchangeLookup::new(dir.path()))],
            Arc::new(KeyCache::from_seconds(0)),
            Duration::from_secs(1),
        );
        assert!(
            private
                .verify_at(NOW, request(&headers, "/ischedule", BODY))
                .await
                .is_ok()
        );
        assert_eq!(private.cache().len(), 1);
    }
}
