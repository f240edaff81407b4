use kunai_core::constants::XML_CONTENT_TYPE;
use kunai_rfc::rfc::ischedule::ErrorFlavor;
use kunai_service::scheduling::SchedulingError;
use salvo::Response;
use salvo::http::{HeaderValue, StatusCode};

/// Writes an XML document with `status`.
pub fn write_xml(res: &mut Response, status: StatusCode, xml: String) {
    res.status_code(status);
    #[expect(
        clippy::let_underscore_must_use,
        reason = "Header addition failure is non-fatal"
    )]
    let _ = res.add_header("Content-Type", HeaderValue::from_static(XML_CONTENT_TYPE), true);
    #[expect(
        clippy::let_underscore_must_use,
        reason = "Write body failure is non-fatal"
    )]
    let _ = res.write_body(xml);
}

/// ## Summary
/// Writes a transaction-fatal failure: the error document when the
/// failure carries a precondition, the bare status otherwise.
pub fn write_scheduling_error(res: &mut Response, error: &SchedulingError, flavor: ErrorFlavor) {
    let status = error.status();
    match error.to_xml(flavor) {
        Ok(Some(xml)) => write_xml(res, status, xml),
        Ok(None) => {
            res.status_code(status);
            if let Some(description) = error.description() {
                #[expect(
                    clippy::let_underscore_must_use,
                    reason = "Write body failure is non-fatal"
                )]
                let _ = res.write_body(description);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize error document");
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
