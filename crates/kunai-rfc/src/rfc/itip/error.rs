use thiserror::Error;

use crate::rfc::ical::ParseError;

/// Reasons a calendar body is not an acceptable scheduling message.
#[derive(Error, Debug)]
pub enum ITipError {
    #[error("Calendar data is not valid iCalendar: {0}")]
    Parse(#[from] ParseError),

    #[error("Missing METHOD property")]
    MissingMethod,

    #[error("Unsupported iTIP method: {0}")]
    InvalidMethod(String),

    #[error("Calendar data contains no schedulable component")]
    MissingComponent,

    #[error("Calendar data mixes component types or uses an unschedulable one")]
    InvalidComponentType,

    #[error("Missing UID property")]
    MissingUid,

    #[error("Components carry different UIDs")]
    MultipleUids,

    #[error("Missing ORGANIZER property")]
    MissingOrganizer,

    #[error("Components carry different ORGANIZER values")]
    MultipleOrganizers,

    #[error("Private events cannot be scheduled")]
    PrivateEvent,

    #[error("Invalid free-busy request: {0}")]
    InvalidFreeBusy(&'static str),
}

pub type ITipResult<T> = std::result::Result<T, ITipError>;
