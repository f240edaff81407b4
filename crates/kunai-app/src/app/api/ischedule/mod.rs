//! The inbound iSchedule resource.
//!
//! - `GET` answers the capabilities document
//! - `POST` runs a scheduling transaction for another server

mod capabilities;
mod post;
mod request;
mod response;

use salvo::Router;

/// ## Summary
/// Routes the iSchedule resource mounted at `path`.
#[must_use]
pub fn routes(path: &str) -> Router {
    Router::with_path(path)
        .get(capabilities::capabilities)
        .post(post::post)
}
