/// `DAV:` namespace URI.
pub const DAV_NS: &str = "DAV:";

/// `CalDAV` namespace URI.
pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";

/// iSchedule namespace URI.
pub const ISCHEDULE_NS: &str = "urn:ietf:params:xml:ns:ischedule";

/// `CalendarServer` namespace URI.
pub const CS_NS: &str = "http://calendarserver.org/ns/";
