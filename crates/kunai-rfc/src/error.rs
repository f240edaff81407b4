use thiserror::Error;

use crate::rfc::dkim::DkimError;
use crate::rfc::ical::ParseError;
use crate::rfc::ischedule::XmlError;
use crate::rfc::itip::ITipError;

/// RFC parsing and validation errors
#[derive(Error, Debug)]
pub enum RfcError {
    #[error(transparent)]
    ICalendar(#[from] ParseError),

    #[error(transparent)]
    ITip(#[from] ITipError),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Dkim(#[from] DkimError),

    #[error(transparent)]
    CoreError(#[from] kunai_core::error::CoreError),
}

pub type RfcResult<T> = std::result::Result<T, RfcError>;
