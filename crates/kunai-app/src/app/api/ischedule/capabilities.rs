use kunai_rfc::rfc::ischedule::write_capabilities;
use salvo::http::StatusCode;
use salvo::{Depot, Request, Response, handler};

use super::response::write_xml;
use crate::config::get_config_from_depot;
use crate::state::get_state_from_depot;

/// ## Summary
/// Answers the iSchedule capabilities document, advertising the free-busy
/// recipient limit when one is configured.
#[handler]
#[tracing::instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn capabilities(req: &mut Request, depot: &Depot, res: &mut Response) {
    let (state, settings) = match (get_state_from_depot(depot), get_config_from_depot(depot)) {
        (Ok(state), Ok(settings)) => (state, settings),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Missing application state");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        }
    };

    let limit = settings.scheduling.limit_freebusy_attendees;
    match write_capabilities(state.capabilities_serial, (limit > 0).then_some(limit)) {
        Ok(xml) => write_xml(res, StatusCode::OK, xml),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize capabilities");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
