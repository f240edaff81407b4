mod domainkey;
mod healthcheck;
mod ischedule;

use salvo::Router;

pub use kunai_core::constants::{ISCHEDULE_ROUTE_PREFIX, WELL_KNOWN_ISCHEDULE_ROUTE};

/// ## Summary
/// Constructs the router of every endpoint the server exposes: the inbound
/// iSchedule resource under both its paths, the published DKIM key and a
/// health check.
#[must_use]
pub fn routes() -> Router {
    Router::new()
        .push(ischedule::routes(ISCHEDULE_ROUTE_PREFIX))
        .push(ischedule::routes(WELL_KNOWN_ISCHEDULE_ROUTE))
        .push(domainkey::routes())
        .push(healthcheck::routes())
}
