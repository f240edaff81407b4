//! Header validation of inbound iSchedule POSTs.

use std::net::IpAddr;

use kunai_core::constants::{
    CALENDAR_CONTENT_TYPE, ORIGINATOR_HEADER, RECIPIENT_HEADER, REFRESH_ONLY_HEADER,
};
use kunai_core::types::CalendarUserAddress;
use kunai_service::scheduling::{
    InboundRequest, RequestOrigin, ScheduleRequest, SchedulingError, SchedulingResult,
};
use salvo::http::HeaderMap;

/// The parts of the HTTP request the transaction needs besides the body.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub peer: IpAddr,
    pub method: String,
    pub path: String,
    /// Used for `Host` when the request carries no such header.
    pub authority: Option<String>,
    pub headers: HeaderMap,
}

/// Fails unless the media type is `text/calendar`.
///
/// ## Errors
/// [`SchedulingError::InvalidCalendarDataType`].
pub fn check_content_type(headers: &HeaderMap) -> SchedulingResult<()> {
    let media_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim);
    match media_type {
        Some(media_type) if media_type.eq_ignore_ascii_case(CALENDAR_CONTENT_TYPE) => Ok(()),
        other => {
            tracing::warn!(content_type = ?other, "MIME type not allowed in iSchedule request");
            Err(SchedulingError::InvalidCalendarDataType)
        }
    }
}

/// The single `Originator` header.
///
/// ## Errors
/// [`SchedulingError::OriginatorMissing`] when there is none or several.
pub fn originator(headers: &HeaderMap) -> SchedulingResult<CalendarUserAddress> {
    let mut values = headers.get_all(ORIGINATOR_HEADER).iter();
    match (values.next(), values.next()) {
        (Some(value), None) => value
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(CalendarUserAddress::new)
            .ok_or(SchedulingError::OriginatorMissing("Missing originator")),
        (None, _) => {
            tracing::warn!("iSchedule POST request must have Originator header");
            Err(SchedulingError::OriginatorMissing("Missing originator"))
        }
        (Some(_), Some(_)) => {
            tracing::warn!("iSchedule POST request must have only one Originator header");
            Err(SchedulingError::OriginatorMissing("Multiple originators"))
        }
    }
}

/// Every address of every `Recipient` header, in order; a header may list
/// several separated by commas.
///
/// ## Errors
/// [`SchedulingError::RecipientMissing`] when no address is given.
pub fn recipients(headers: &HeaderMap) -> SchedulingResult<Vec<CalendarUserAddress>> {
    let recipients: Vec<CalendarUserAddress> = headers
        .get_all(RECIPIENT_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(CalendarUserAddress::new)
        .collect();
    if recipients.is_empty() {
        tracing::warn!("iSchedule POST request must have at least one Recipient header");
        return Err(SchedulingError::RecipientMissing("Missing recipient"));
    }
    Ok(recipients)
}

fn refresh_only(headers: &HeaderMap) -> bool {
    headers
        .get(REFRESH_ONLY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "T")
}

/// Every header occurrence as text, in wire order.
fn header_list(parts: &RequestParts) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    if !parts.headers.contains_key("Host")
        && let Some(authority) = &parts.authority
    {
        headers.insert(0, ("Host".to_string(), authority.clone()));
    }
    headers
}

/// ## Summary
/// Validates the headers and builds the transaction request for `body`.
///
/// ## Errors
/// Returns the transaction-fatal failure for a bad content type, a missing
/// or repeated originator, or no recipients.
pub fn schedule_request(parts: &RequestParts, body: String) -> SchedulingResult<ScheduleRequest> {
    check_content_type(&parts.headers)?;
    let originator = originator(&parts.headers)?;
    let recipients = recipients(&parts.headers)?;

    let inbound = InboundRequest {
        peer: parts.peer,
        method: parts.method.clone(),
        path: parts.path.clone(),
        headers: header_list(parts),
        authenticated: parts.headers.contains_key("Authorization"),
    };
    let mut request = ScheduleRequest::new(RequestOrigin::ISchedule(inbound), body)
        .with_originator(originator)
        .with_recipients(recipients);
    request.refresh_only = refresh_only(&parts.headers);
    Ok(request)
}
