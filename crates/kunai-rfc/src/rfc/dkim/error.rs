use thiserror::Error;

/// DKIM signing and verification failures.
///
/// [`DkimError::Missing`] is the only variant a receiver may choose to
/// tolerate; every other variant means verification failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DkimError {
    #[error("No DKIM-Signature header present in the request")]
    Missing,

    #[error("Only one DKIM-Signature allowed in the request")]
    MultipleSignatures,

    #[error("Malformed tag list: {0}")]
    MalformedTagList(String),

    #[error("Missing DKIM-Signature tag: {0}")]
    MissingTag(&'static str),

    #[error("Tag: {tag} has incorrect value: {value}")]
    InvalidTag { tag: &'static str, value: String },

    #[error("Signature expired: {seconds} seconds")]
    Expired { seconds: i64 },

    #[error("Tag: http does not match the request: {0}")]
    HttpMismatch(String),

    #[error("No valid public key for {selector}._domainkey.{domain}")]
    NoPublicKey { domain: String, selector: String },

    #[error("Unable to use public key: {0}")]
    InvalidKey(String),

    #[error("Signature does not verify")]
    BadSignature,

    #[error("Body hash does not match")]
    BodyHashMismatch,

    #[error("Unable to sign request: {0}")]
    Signing(String),
}

impl DkimError {
    /// Returns whether the request simply carried no signature.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

pub type DkimResult<T> = std::result::Result<T, DkimError>;
