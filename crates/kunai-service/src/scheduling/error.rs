use http::StatusCode;
use kunai_rfc::rfc::ischedule::{ErrorFlavor, ScheduleCondition, XmlResult, write_error};
use kunai_rfc::rfc::itip::ITipError;
use thiserror::Error;

use crate::error::ServiceError;

/// A failure that aborts a whole scheduling transaction.
///
/// Failures that concern one recipient never take this form; they become
/// that recipient's outcome instead.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Data is not calendar data")]
    InvalidCalendarDataType,

    #[error("{0}")]
    InvalidCalendarData(String),

    #[error("{0}")]
    InvalidSchedulingMessage(String),

    #[error("Private events cannot be scheduled")]
    NoAccessRestrictions,

    #[error("{0}")]
    OriginatorMissing(&'static str),

    #[error("{0}")]
    OriginatorInvalid(&'static str),

    #[error("{0}")]
    OriginatorDenied(&'static str),

    #[error("{0}")]
    RecipientMissing(&'static str),

    #[error("{0}")]
    OrganizerDenied(&'static str),

    #[error("{0}")]
    AttendeeDenied(&'static str),

    #[error("{0}")]
    VerificationFailed(String),

    #[error("Unknown iTIP method")]
    UnknownMethod,

    #[error("Resource for UID {0} currently in use on the server")]
    LockTimeout(String),

    #[error(transparent)]
    Internal(#[from] ServiceError),
}

pub type SchedulingResult<T> = std::result::Result<T, SchedulingError>;

impl SchedulingError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCalendarDataType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// The precondition reported to the client, if any.
    #[must_use]
    pub fn condition(&self) -> Option<ScheduleCondition> {
        let condition = match self {
            Self::InvalidCalendarDataType => ScheduleCondition::InvalidCalendarDataType,
            Self::InvalidCalendarData(_) => ScheduleCondition::InvalidCalendarData,
            Self::InvalidSchedulingMessage(_) | Self::UnknownMethod => {
                ScheduleCondition::InvalidSchedulingMessage
            }
            Self::NoAccessRestrictions => ScheduleCondition::NoAccessRestrictions,
            Self::OriginatorMissing(_) => ScheduleCondition::OriginatorMissing,
            Self::OriginatorInvalid(_) => ScheduleCondition::OriginatorInvalid,
            Self::OriginatorDenied(_) => ScheduleCondition::OriginatorDenied,
            Self::RecipientMissing(_) => ScheduleCondition::RecipientMissing,
            Self::OrganizerDenied(_) => ScheduleCondition::OrganizerDenied,
            Self::AttendeeDenied(_) => ScheduleCondition::AttendeeDenied,
            Self::VerificationFailed(_) => ScheduleCondition::VerificationFailed,
            Self::LockTimeout(_) | Self::Internal(_) => return None,
        };
        Some(condition)
    }

    /// Text for the response description. Internal errors are not
    /// described to clients.
    #[must_use]
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Internal(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Serializes the error document for `flavor`, or `None` when the error
    /// carries no precondition.
    ///
    /// ## Errors
    /// Returns an error if XML writing fails.
    pub fn to_xml(&self, flavor: ErrorFlavor) -> XmlResult<Option<String>> {
        let Some(condition) = self.condition() else {
            return Ok(None);
        };
        let description = self.description();
        write_error(&condition.element(flavor), description.as_deref(), flavor).map(Some)
    }
}

impl From<ITipError> for SchedulingError {
    fn from(e: ITipError) -> Self {
        match e {
            ITipError::PrivateEvent => Self::NoAccessRestrictions,
            ITipError::MissingMethod | ITipError::InvalidMethod(_) => {
                Self::InvalidSchedulingMessage(e.to_string())
            }
            ITipError::InvalidFreeBusy(reason) => Self::InvalidSchedulingMessage(reason.to_string()),
            other => Self::InvalidCalendarData(other.to_string()),
        }
    }
}
