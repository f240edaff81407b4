//! DKIM public key records (RFC 6376 §3.6.1).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kunai_core::types::DkimAlgorithm;

use super::error::{DkimError, DkimResult};
use super::tags::TagList;

/// Service type iSchedule keys are published for (`s=`).
pub const KEY_SERVICE_TYPE: &str = "ischedule";

/// A public key record as published by DNS TXT, the HTTP well-known
/// location, or a private exchange file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub version: String,
    pub key_type: String,
    /// Acceptable hash algorithms (`h=`), e.g. `sha256`.
    pub hashes: Vec<String>,
    pub service: String,
    /// base64 key material with whitespace removed; empty means revoked.
    pub public_key: String,
}

impl PublicKeyRecord {
    /// Parses a key record tag list, applying the RFC defaults for absent
    /// tags (`v=DKIM1`, `k=rsa`, `h=sha1:sha256`, `s=*`).
    ///
    /// ## Errors
    /// Returns an error if the tag list is malformed.
    pub fn parse(data: &str) -> DkimResult<Self> {
        let tags = TagList::parse(data)?;
        Ok(Self {
            version: tags.get("v").unwrap_or("DKIM1").to_string(),
            key_type: tags.get("k").unwrap_or("rsa").to_string(),
            hashes: tags
                .get("h")
                .unwrap_or("sha1:sha256")
                .split(':')
                .map(|h| h.trim().to_string())
                .collect(),
            service: tags.get("s").unwrap_or(KEY_SERVICE_TYPE).to_string(),
            public_key: tags
                .get("p")
                .unwrap_or_default()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect(),
        })
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.public_key.is_empty()
    }

    /// Returns whether this record may verify a signature made with
    /// `algorithm`.
    #[must_use]
    pub fn is_usable_for(&self, algorithm: DkimAlgorithm) -> bool {
        self.version == "DKIM1"
            && self.key_type == "rsa"
            && self.hashes.iter().any(|h| h == algorithm.hash_name())
            && self
                .service
                .split(':')
                .any(|s| s.trim() == "*" || s.trim() == KEY_SERVICE_TYPE)
            && !self.is_revoked()
    }

    /// Decodes the DER key material.
    ///
    /// ## Errors
    /// Returns an error if `p=` is not valid base64.
    pub fn key_der(&self) -> DkimResult<Vec<u8>> {
        STANDARD
            .decode(&self.public_key)
            .map_err(|e| DkimError::InvalidKey(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let record = PublicKeyRecord::parse("p=QUJD REVG").unwrap();
        assert_eq!(record.version, "DKIM1");
        assert_eq!(record.key_type, "rsa");
        assert_eq!(record.public_key, "QUJDREVG");
        assert!(record.is_usable_for(DkimAlgorithm::RsaSha1));
        assert!(record.is_usable_for(DkimAlgorithm::RsaSha256));
        assert_eq!(record.key_der().unwrap(), b"ABCDEF");
    }

    #[test]
    fn unusable_records() {
        let revoked = PublicKeyRecord::parse("v=DKIM1; p=").unwrap();
        assert!(revoked.is_revoked());
        assert!(!revoked.is_usable_for(DkimAlgorithm::RsaSha256));

        let sha1_only = PublicKeyRecord::parse("h=sha1; p=QUJD").unwrap();
        assert!(!sha1_only.is_usable_for(DkimAlgorithm::RsaSha256));

        let email = PublicKeyRecord::parse("s=email; p=QUJD").unwrap();
        assert!(!email.is_usable_for(DkimAlgorithm::RsaSha256));

        let ed = PublicKeyRecord::parse("k=ed25519; p=QUJD").unwrap();
        assert!(!ed.is_usable_for(DkimAlgorithm::RsaSha256));
    }
}
