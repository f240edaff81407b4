use std::borrow::Cow;

/// iTIP request-status value (RFC 5546 §3.6), e.g. `2.0;Success`.
///
/// Peers may answer with any status string, so this wraps the text rather
/// than enumerating codes. The associated constants cover every status this
/// server produces itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestStatus(Cow<'static, str>);

impl RequestStatus {
    pub const DELIVERED: Self = Self(Cow::Borrowed("1.2;Scheduling message has been delivered"));
    pub const SUCCESS: Self = Self(Cow::Borrowed("2.0;Success"));
    pub const INVALID_CALENDAR_USER: Self = Self(Cow::Borrowed("3.7;Invalid Calendar User"));
    pub const NO_AUTHORITY: Self = Self(Cow::Borrowed("3.8;No authority"));
    pub const SERVICE_UNAVAILABLE: Self = Self(Cow::Borrowed("5.1;Service unavailable"));
    pub const INVALID_CALENDAR_SERVICE: Self = Self(Cow::Borrowed("5.2;Invalid calendar service"));
    pub const NO_USER_SUPPORT: Self = Self(Cow::Borrowed("5.3;No scheduling support for user"));

    /// Wraps a status received from a peer.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Cow::Owned(value.into().trim().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part before the first `;`.
    #[must_use]
    pub fn code(&self) -> &str {
        self.0.split(';').next().unwrap_or_default()
    }

    /// Class 1 (pending) and class 2 (success) statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.code().split('.').next(), Some("1" | "2"))
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_classes() {
        assert_eq!(RequestStatus::DELIVERED.code(), "1.2");
        assert!(RequestStatus::DELIVERED.is_success());
        assert!(RequestStatus::SUCCESS.is_success());
        assert!(!RequestStatus::INVALID_CALENDAR_USER.is_success());
        assert!(!RequestStatus::SERVICE_UNAVAILABLE.is_success());
        assert_eq!(RequestStatus::new(" 2.0;Success\n"), RequestStatus::SUCCESS);
    }
}
