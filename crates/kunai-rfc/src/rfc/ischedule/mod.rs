//! Schedule-response documents and their vocabulary.
//!
//! CalDAV scheduling (RFC 6638) and iSchedule share the shape of a
//! per-recipient response list but place it in different namespaces. The
//! [`ErrorFlavor`] passed to the builders picks which.

mod build;
mod condition;
mod error;
mod namespace;
mod parse;
mod response;
mod status;

pub use build::{write_capabilities, write_error, write_schedule_response};
pub use condition::{ErrorElement, ErrorFlavor, ScheduleCondition};
pub use error::{XmlError, XmlResult};
pub use namespace::{CALDAV_NS, CS_NS, DAV_NS, ISCHEDULE_NS};
pub use parse::parse_schedule_response;
pub use response::DeliveryOutcome;
pub use status::RequestStatus;
