//! Publishes this server's DKIM public key for the `http/well-known` key
//! lookup method.

use kunai_core::constants::WELL_KNOWN_DOMAINKEY_PREFIX;
use salvo::http::{HeaderValue, StatusCode};
use salvo::{Depot, Request, Response, Router, handler};

use crate::state::get_state_from_depot;

/// ## Summary
/// Answers with the key record when domain and selector name the key this
/// server signs with, and 404 otherwise.
#[handler]
#[tracing::instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn public_key(req: &mut Request, depot: &Depot, res: &mut Response) {
    let state = match get_state_from_depot(depot) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to get application state");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        }
    };

    let domain = req.param::<String>("domain").unwrap_or_default();
    let selector = req.param::<String>("selector").unwrap_or_default();
    let Some(signer) = state
        .signer
        .as_deref()
        .filter(|s| s.domain().eq_ignore_ascii_case(&domain) && s.selector() == selector)
    else {
        tracing::debug!(domain = %domain, selector = %selector, "No published key");
        res.status_code(StatusCode::NOT_FOUND);
        return;
    };

    let record = match signer.public_key_record() {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode public key");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        }
    };

    res.status_code(StatusCode::OK);
    #[expect(
        clippy::let_underscore_must_use,
        reason = "Header addition failure is non-fatal"
    )]
    let _ = res.add_header(
        "Content-Type",
        HeaderValue::from_static("text/plain; charset=utf-8"),
        true,
    );
    #[expect(
        clippy::let_underscore_must_use,
        reason = "Write body failure is non-fatal"
    )]
    let _ = res.write_body(format!("{record}\n"));
}

#[must_use]
pub fn routes() -> Router {
    Router::with_path(format!("{WELL_KNOWN_DOMAINKEY_PREFIX}/{{domain}}/{{selector}}")).get(public_key)
}
