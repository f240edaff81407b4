use std::borrow::Cow;

use super::namespace::{CALDAV_NS, CS_NS, ISCHEDULE_NS};

/// Which protocol an error document or schedule response is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFlavor {
    /// CalDAV scheduling: preconditions in the CalDAV namespace inside
    /// `DAV:error`.
    CalDav,
    /// iSchedule: preconditions in the iSchedule namespace.
    ISchedule,
}

/// A qualified precondition element, e.g. `{urn:ietf:params:xml:ns:caldav}valid-calendar-data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorElement {
    pub namespace: Cow<'static, str>,
    pub name: Cow<'static, str>,
}

impl ErrorElement {
    #[must_use]
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(namespace),
            name: Cow::Borrowed(name),
        }
    }

    /// Builds an element received from a peer.
    #[must_use]
    pub fn owned(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Cow::Owned(namespace.into()),
            name: Cow::Owned(name.into()),
        }
    }
}

impl std::fmt::Display for ErrorElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

/// Scheduling failure conditions.
///
/// Each maps to a precondition element whose name depends on the
/// [`ErrorFlavor`]. The iSchedule names follow the condition names; the
/// CalDAV ones are the RFC 6638 preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleCondition {
    OriginatorMissing,
    OriginatorInvalid,
    OriginatorDenied,
    RecipientMissing,
    RecipientInvalid,
    OrganizerDenied,
    AttendeeDenied,
    InvalidCalendarDataType,
    InvalidCalendarData,
    InvalidSchedulingMessage,
    MaxRecipients,
    VerificationFailed,
    /// Local delivery refused by the recipient's inbox.
    RecipientPermissions,
    /// The private access flag was present.
    NoAccessRestrictions,
    /// No server may be contacted for the recipient.
    RecipientAllowed,
    /// The request to the recipient's server failed.
    RecipientFailed,
}

impl ScheduleCondition {
    /// The iSchedule element name, also used as the condition's key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::OriginatorMissing => "originator-missing",
            Self::OriginatorInvalid => "originator-invalid",
            Self::OriginatorDenied => "originator-denied",
            Self::RecipientMissing => "recipient-missing",
            Self::RecipientInvalid => "recipient-invalid",
            Self::OrganizerDenied => "organizer-denied",
            Self::AttendeeDenied => "attendee-denied",
            Self::InvalidCalendarDataType => "invalid-calendar-data-type",
            Self::InvalidCalendarData => "invalid-calendar-data",
            Self::InvalidSchedulingMessage => "invalid-scheduling-message",
            Self::MaxRecipients => "max-recipients",
            Self::VerificationFailed => "verification-failed",
            Self::RecipientPermissions => "recipient-permissions",
            Self::NoAccessRestrictions => "no-access-restrictions",
            Self::RecipientAllowed => "recipient-allowed",
            Self::RecipientFailed => "recipient-failed",
        }
    }

    /// Returns the precondition element for the given protocol.
    #[must_use]
    pub const fn element(self, flavor: ErrorFlavor) -> ErrorElement {
        match (self, flavor) {
            (Self::NoAccessRestrictions, _) => ErrorElement::new(CS_NS, "no-access-restrictions"),
            (Self::RecipientPermissions, _) => ErrorElement::new(CALDAV_NS, "recipient-permissions"),
            (_, ErrorFlavor::ISchedule) => ErrorElement::new(ISCHEDULE_NS, self.key()),
            (
                Self::VerificationFailed | Self::RecipientAllowed | Self::RecipientFailed,
                ErrorFlavor::CalDav,
            ) => ErrorElement::new(ISCHEDULE_NS, self.key()),
            (_, ErrorFlavor::CalDav) => ErrorElement::new(CALDAV_NS, self.caldav_name()),
        }
    }

    const fn caldav_name(self) -> &'static str {
        match self {
            Self::OriginatorMissing => "originator-specified",
            Self::OriginatorInvalid | Self::OriginatorDenied => "originator-allowed",
            Self::RecipientMissing => "recipient-specified",
            Self::RecipientInvalid => "recipient-exists",
            Self::OrganizerDenied => "organizer-allowed",
            Self::AttendeeDenied => "attendee-allowed",
            Self::InvalidCalendarDataType => "supported-calendar-data",
            Self::InvalidCalendarData | Self::InvalidSchedulingMessage => "valid-calendar-data",
            Self::MaxRecipients => "recipient-limit",
            Self::VerificationFailed => "verification-failed",
            Self::RecipientPermissions => "recipient-permissions",
            Self::NoAccessRestrictions => "no-access-restrictions",
            Self::RecipientAllowed => "recipient-allowed",
            Self::RecipientFailed => "recipient-failed",
        }
    }
}
