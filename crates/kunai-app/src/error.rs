use thiserror::Error;

/// Application-level errors (HTTP layer)
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    ServiceError(#[from] kunai_service::error::ServiceError),

    #[error(transparent)]
    RfcError(#[from] kunai_rfc::error::RfcError),

    #[error(transparent)]
    CoreError(#[from] kunai_core::error::CoreError),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
