/// Route component constants shared across crates
pub const ISCHEDULE_ROUTE_COMPONENT: &str = "ischedule";
pub const ISCHEDULE_ROUTE_PREFIX: &str = const_str::concat!("/", ISCHEDULE_ROUTE_COMPONENT);

pub const WELL_KNOWN_ROUTE_COMPONENT: &str = ".well-known";
pub const WELL_KNOWN_ISCHEDULE_ROUTE: &str = const_str::concat!(
    "/",
    WELL_KNOWN_ROUTE_COMPONENT,
    "/",
    ISCHEDULE_ROUTE_COMPONENT
);

/// Well-known path segment under which DKIM public keys are published.
pub const WELL_KNOWN_DOMAINKEY_PREFIX: &str =
    const_str::concat!("/", WELL_KNOWN_ROUTE_COMPONENT, "/domainkey");

// iSchedule request headers

pub const ORIGINATOR_HEADER: &str = "Originator";
pub const RECIPIENT_HEADER: &str = "Recipient";
pub const DKIM_SIGNATURE_HEADER: &str = "DKIM-Signature";
pub const ISCHEDULE_VERSION_HEADER: &str = "iSchedule-Version";
pub const ISCHEDULE_VERSION_VALUE: &str = "1.0";
pub const ISCHEDULE_MESSAGE_ID_HEADER: &str = "iSchedule-Message-ID";
pub const REFRESH_ONLY_HEADER: &str = "X-CALENDARSERVER-ITIP-REFRESHONLY";
pub const SHARED_SECRET_HEADER: &str = "X-CALENDARSERVER-ISCHEDULE";

pub const CALENDAR_CONTENT_TYPE: &str = "text/calendar";
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

pub const USER_AGENT: &str = const_str::concat!("Kunai/", env!("CARGO_PKG_VERSION"));

/// PRODID of calendar data generated by this server.
pub const PRODID: &str = "-//Kunai//Scheduling//EN";

/// iCalendar UTC date-time format.
pub const ICAL_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";
