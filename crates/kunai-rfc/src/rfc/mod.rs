//! Wire formats used by calendar scheduling.
//!
//! - `ical`: iCalendar documents (RFC 5545)
//! - `itip`: scheduling messages carried in iCalendar (RFC 5546)
//! - `ischedule`: schedule-response documents, request-status codes and
//!   error elements shared by CalDAV scheduling and iSchedule
//! - `dkim`: DKIM tag lists, canonicalization and key records adapted to
//!   HTTP requests

pub mod dkim;
pub mod ical;
pub mod ischedule;
pub mod itip;
