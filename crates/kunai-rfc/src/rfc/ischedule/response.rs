use super::condition::ErrorElement;
use super::status::RequestStatus;

/// Result of scheduling one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Recipient address exactly as it was requested.
    pub recipient: String,
    pub request_status: RequestStatus,
    /// Returned calendar data, e.g. free-busy results.
    pub calendar_data: Option<String>,
    pub error: Option<ErrorElement>,
    pub description: Option<String>,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn new(recipient: impl Into<String>, request_status: RequestStatus) -> Self {
        Self {
            recipient: recipient.into(),
            request_status,
            calendar_data: None,
            error: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_calendar_data(mut self, data: impl Into<String>) -> Self {
        self.calendar_data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorElement) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.request_status.is_success()
    }
}
