use kunai_rfc::rfc::ischedule::{DeliveryOutcome, ErrorFlavor, XmlResult, write_schedule_response};

/// Collects the per-recipient outcomes of one transaction.
#[derive(Debug)]
pub struct ResponseAggregator {
    flavor: ErrorFlavor,
    outcomes: Vec<DeliveryOutcome>,
}

impl ResponseAggregator {
    #[must_use]
    pub fn new(flavor: ErrorFlavor) -> Self {
        Self {
            flavor,
            outcomes: Vec::new(),
        }
    }

    pub fn add(&mut self, outcome: DeliveryOutcome) {
        tracing::trace!(
            recipient = %outcome.recipient,
            status = %outcome.request_status,
            "Recipient outcome"
        );
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = DeliveryOutcome>) {
        for outcome in outcomes {
            self.add(outcome);
        }
    }

    /// Freezes the outcomes in the order the recipients were requested in.
    /// Outcomes for addresses not in `order` keep their arrival order at the
    /// end.
    #[must_use]
    pub fn finish(mut self, order: &[String]) -> ScheduleResponse {
        self.outcomes.sort_by_key(|o| {
            order
                .iter()
                .position(|r| *r == o.recipient)
                .unwrap_or(order.len())
        });
        ScheduleResponse {
            flavor: self.flavor,
            outcomes: self.outcomes,
        }
    }
}

/// The result of a scheduling transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResponse {
    pub flavor: ErrorFlavor,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl ScheduleResponse {
    #[must_use]
    pub fn outcome(&self, recipient: &str) -> Option<&DeliveryOutcome> {
        self.outcomes.iter().find(|o| o.recipient == recipient)
    }

    /// ## Errors
    /// Returns an error if XML writing fails.
    pub fn to_xml(&self) -> XmlResult<String> {
        write_schedule_response(&self.outcomes, self.flavor)
    }
}
