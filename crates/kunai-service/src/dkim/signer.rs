use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kunai_core::config::DkimConfig;
use kunai_core::constants::{
    DKIM_SIGNATURE_HEADER, ISCHEDULE_MESSAGE_ID_HEADER, ISCHEDULE_VERSION_HEADER, ORIGINATOR_HEADER,
    RECIPIENT_HEADER,
};
use kunai_core::types::{DkimAlgorithm, KeyLookupMethod};
use kunai_rfc::rfc::dkim::{
    DkimError, DkimResult, KEY_SERVICE_TYPE, SignatureTags, canonicalize_body, canonicalize_header,
};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};

use super::{digest, padding};
use crate::error::{ServiceError, ServiceResult};

/// Headers every signature covers when present.
const ALWAYS_SIGNED: [&str; 6] = [
    ORIGINATOR_HEADER,
    RECIPIENT_HEADER,
    "Content-Type",
    ISCHEDULE_VERSION_HEADER,
    ISCHEDULE_MESSAGE_ID_HEADER,
    "Cache-Control",
];

/// Signs outgoing iSchedule requests with this server's domain key.
pub struct DkimSigner {
    domain: String,
    selector: String,
    algorithm: DkimAlgorithm,
    key_methods: Vec<KeyLookupMethod>,
    expiration_seconds: u64,
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for DkimSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimSigner")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl DkimSigner {
    /// Builds the signer described by the `dkim` settings, or `None` when
    /// signing is disabled.
    ///
    /// ## Errors
    /// Returns an error if signing is enabled but the key file is missing,
    /// unreadable or not an RSA private key.
    pub fn from_config(config: &DkimConfig) -> ServiceResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let path = config.private_key_file.as_ref().ok_or_else(|| {
            ServiceError::InvalidConfiguration("dkim.private_key_file is required".to_string())
        })?;
        let pem = std::fs::read_to_string(path)?;

        let mut signer = Self::from_pem(&pem, &config.domain, &config.selector, config.algorithm)?;
        signer.key_methods.clone_from(&config.sign_key_methods);
        signer.expiration_seconds = config.signature_expiration_seconds;
        tracing::info!(domain = %signer.domain, selector = %signer.selector, "DKIM signing enabled");
        Ok(Some(signer))
    }

    /// ## Errors
    /// Returns an error if `pem` holds neither a PKCS#1 nor a PKCS#8 RSA
    /// private key.
    pub fn from_pem(
        pem: &str,
        domain: &str,
        selector: &str,
        algorithm: DkimAlgorithm,
    ) -> DkimResult<Self> {
        let private_key = match RsaPrivateKey::from_pkcs1_pem(pem) {
            Ok(key) => key,
            Err(_pkcs1) => RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| DkimError::InvalidKey(e.to_string()))?,
        };
        Ok(Self {
            domain: domain.to_string(),
            selector: selector.to_string(),
            algorithm,
            key_methods: vec![KeyLookupMethod::DnsTxt],
            expiration_seconds: 3600,
            private_key,
        })
    }

    #[must_use]
    pub fn with_key_methods(mut self, methods: Vec<KeyLookupMethod>) -> Self {
        self.key_methods = methods;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, seconds: u64) -> Self {
        self.expiration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// The key record to publish for this signer's selector.
    ///
    /// ## Errors
    /// Returns an error if the public key cannot be encoded.
    pub fn public_key_record(&self) -> DkimResult<String> {
        let der = self
            .private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| DkimError::InvalidKey(e.to_string()))?;
        Ok(format!(
            "v=DKIM1; k=rsa; h={}; s={KEY_SERVICE_TYPE}; p={}",
            self.algorithm.hash_name(),
            STANDARD.encode(der.as_bytes())
        ))
    }

    /// Signs a request now. See [`DkimSigner::sign_at`].
    ///
    /// ## Errors
    /// See [`DkimSigner::sign_at`].
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        sign_headers: &[&str],
        body: &[u8],
    ) -> DkimResult<String> {
        self.sign_at(chrono::Utc::now().timestamp(), method, path, headers, sign_headers, body)
    }

    /// Produces the DKIM-Signature value for a request.
    ///
    /// ## Summary
    /// Signs the always-signed headers plus `sign_headers`, each present
    /// occurrence once in wire order. A name ending in `+` is listed once
    /// more in `h=` than it occurs so a verifier rejects added copies. The
    /// signature covers the canonicalized headers followed by the signature
    /// header itself with an empty `b=`.
    ///
    /// ## Errors
    /// Returns an error if RSA signing fails.
    pub fn sign_at(
        &self,
        now: i64,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        sign_headers: &[&str],
        body: &[u8],
    ) -> DkimResult<String> {
        let mut canonical = String::new();
        let mut signed_names = Vec::new();
        for (name, oversign) in signing_plan(sign_headers) {
            for (_, value) in headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                canonical.push_str(&canonicalize_header(&name, value));
                signed_names.push(name.clone());
            }
            if oversign {
                signed_names.push(name);
            }
        }

        let mut tags = SignatureTags {
            domain: self.domain.clone(),
            selector: self.selector.clone(),
            timestamp: Some(now),
            expiration: (self.expiration_seconds > 0)
                .then(|| now.saturating_add_unsigned(self.expiration_seconds)),
            algorithm: self.algorithm,
            key_methods: self.key_methods.clone(),
            http: SignatureTags::encode_http(method, path),
            canonicalization: SignatureTags::CANONICALIZATION.to_string(),
            headers: signed_names,
            body_hash: STANDARD.encode(digest(self.algorithm, &canonicalize_body(body))),
            signature: String::new(),
        };
        canonical.push_str(&canonicalize_header(
            DKIM_SIGNATURE_HEADER,
            &tags.to_header_value(),
        ));
        tracing::trace!(signed = %canonical, "DKIM signed data");

        let signature = self
            .private_key
            .sign(padding(self.algorithm), &digest(self.algorithm, canonical.as_bytes()))
            .map_err(|e| DkimError::Signing(e.to_string()))?;
        tags.signature = STANDARD.encode(signature);
        Ok(tags.to_header_value())
    }
}

/// Header names to sign with their oversign flag, always-signed ones first.
fn signing_plan(extra: &[&str]) -> Vec<(String, bool)> {
    let mut plan: Vec<(String, bool)> = Vec::new();
    for entry in ALWAYS_SIGNED.iter().chain(extra) {
        let (name, oversign) = match entry.strip_suffix('+') {
            Some(name) => (name, true),
            None => (*entry, false),
        };
        match plan.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.1 |= oversign,
            None => plan.push((name.to_string(), oversign)),
        }
    }
    plan
}
