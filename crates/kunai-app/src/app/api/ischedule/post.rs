use std::net::{IpAddr, Ipv4Addr};

use kunai_rfc::rfc::ischedule::ErrorFlavor;
use kunai_service::scheduling::SchedulingError;
use salvo::http::StatusCode;
use salvo::{Depot, Request, Response, handler};

use super::request::{RequestParts, schedule_request};
use super::response::{write_scheduling_error, write_xml};
use crate::state::get_state_from_depot;

fn peer_ip(req: &Request) -> IpAddr {
    req.remote_addr().clone().into_std().map_or_else(
        || {
            tracing::debug!("Peer address unknown");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        },
        |addr| addr.ip(),
    )
}

/// ## Summary
/// Handles a scheduling message posted by another server.
///
/// The headers are validated, the body handed to the scheduler as an
/// iSchedule transaction, and the per-recipient outcomes written as a
/// `schedule-response` document. Transaction-fatal failures are written as
/// an iSchedule error document.
#[handler]
#[tracing::instrument(skip_all, fields(
    path = %req.uri().path(),
    message_id = ?req.headers().get(kunai_core::constants::ISCHEDULE_MESSAGE_ID_HEADER)
))]
pub async fn post(req: &mut Request, depot: &Depot, res: &mut Response) {
    let state = match get_state_from_depot(depot) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to get application state");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        }
    };

    let parts = RequestParts {
        peer: peer_ip(req),
        method: req.method().as_str().to_string(),
        path: req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string()),
        authority: req.uri().authority().map(|a| a.as_str().to_string()),
        headers: req.headers().clone(),
    };

    let body = match req.payload().await {
        Ok(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Calendar data is not UTF-8");
                write_scheduling_error(
                    res,
                    &SchedulingError::InvalidCalendarData("Calendar data is not UTF-8".to_string()),
                    ErrorFlavor::ISchedule,
                );
                return;
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            res.status_code(StatusCode::BAD_REQUEST);
            return;
        }
    };
    tracing::debug!(bytes = body.len(), peer = %parts.peer, "iSchedule request received");

    let request = match schedule_request(&parts, body) {
        Ok(request) => request,
        Err(e) => {
            write_scheduling_error(res, &e, ErrorFlavor::ISchedule);
            return;
        }
    };

    match state.scheduler.schedule(request).await {
        Ok(response) => match response.to_xml() {
            Ok(xml) => write_xml(res, StatusCode::OK, xml),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize schedule response");
                res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
        Err(e) => write_scheduling_error(res, &e, ErrorFlavor::ISchedule),
    }
}
