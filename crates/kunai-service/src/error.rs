use thiserror::Error;

/// Service layer errors - combines all error types
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    RfcError(#[from] kunai_rfc::error::RfcError),

    #[error(transparent)]
    CoreError(#[from] kunai_core::error::CoreError),

    #[error(transparent)]
    DkimError(#[from] kunai_rfc::rfc::dkim::DkimError),

    #[error(transparent)]
    XmlError(#[from] kunai_rfc::rfc::ischedule::XmlError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Invariant violation: {0}")]
    InvariantViolation(&'static str),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
