/// iTIP method (RFC 5546 §1.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ITipMethod {
    Publish,
    Request,
    Reply,
    Add,
    Cancel,
    Refresh,
    Counter,
    DeclineCounter,
}

impl ITipMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "PUBLISH",
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Add => "ADD",
            Self::Cancel => "CANCEL",
            Self::Refresh => "REFRESH",
            Self::Counter => "COUNTER",
            Self::DeclineCounter => "DECLINECOUNTER",
        }
    }

    /// Parses a METHOD value (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUBLISH" => Some(Self::Publish),
            "REQUEST" => Some(Self::Request),
            "REPLY" => Some(Self::Reply),
            "ADD" => Some(Self::Add),
            "CANCEL" => Some(Self::Cancel),
            "REFRESH" => Some(Self::Refresh),
            "COUNTER" => Some(Self::Counter),
            "DECLINECOUNTER" => Some(Self::DeclineCounter),
            _ => None,
        }
    }

    /// Methods sent by an organizer to attendees.
    #[must_use]
    pub const fn is_request_class(self) -> bool {
        matches!(
            self,
            Self::Publish | Self::Request | Self::Add | Self::Cancel | Self::DeclineCounter
        )
    }

    /// Methods sent by a single attendee back to the organizer.
    #[must_use]
    pub const fn is_reply_class(self) -> bool {
        matches!(self, Self::Reply | Self::Counter | Self::Refresh)
    }
}

impl std::fmt::Display for ITipMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_classes_are_disjoint() {
        for method in [
            ITipMethod::Publish,
            ITipMethod::Request,
            ITipMethod::Reply,
            ITipMethod::Add,
            ITipMethod::Cancel,
            ITipMethod::Refresh,
            ITipMethod::Counter,
            ITipMethod::DeclineCounter,
        ] {
            assert_ne!(method.is_request_class(), method.is_reply_class(), "{method}");
            assert_eq!(ITipMethod::parse(method.as_str()), Some(method));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(ITipMethod::parse("reply"), Some(ITipMethod::Reply));
        assert_eq!(ITipMethod::parse("POLL-STATUS"), None);
    }
}
