//! Delivery of a scheduling message to one kind of recipient.
//!
//! - `caldav`: inboxes of principals hosted on this server
//! - `ischedule`: other servers over iSchedule, both remote domains and the
//!   other pods of this deployment
//! - `imip`: the outbound mail gateway

mod caldav;
mod imip;
mod ischedule;

use async_trait::async_trait;
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::ischedule::{DeliveryOutcome, ErrorFlavor, RequestStatus, ScheduleCondition};
use kunai_rfc::rfc::itip::SchedulingMessage;

use crate::address::{DeliveryKind, Recipient};

pub use caldav::CalDavDelivery;
pub use imip::ImipDelivery;
pub use ischedule::{IScheduleDelivery, MAX_REDIRECTS};

/// What every delivery of one transaction shares.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub message: &'a SchedulingMessage,
    /// The address the message is sent as: the organizer of a request, the
    /// attendee of a reply.
    pub originator: &'a CalendarUserAddress,
    /// Namespace of the error elements in the outcomes.
    pub flavor: ErrorFlavor,
    /// Forward a refresh without asking peers to process it further.
    pub refresh_only: bool,
}

impl DeliveryContext<'_> {
    #[must_use]
    pub fn is_freebusy(&self) -> bool {
        self.message.is_freebusy()
    }

    /// An outcome for a recipient that could not be reached.
    #[must_use]
    pub fn failure(
        &self,
        recipient: &CalendarUserAddress,
        status: RequestStatus,
        condition: ScheduleCondition,
        description: &str,
    ) -> DeliveryOutcome {
        DeliveryOutcome::new(recipient.as_str(), status)
            .with_error(condition.element(self.flavor))
            .with_description(description)
    }
}

/// Reaches recipients of one [`DeliveryKind`].
///
/// Delivery never fails as a whole: every recipient passed in gets exactly
/// one outcome, failures included.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    fn kind(&self) -> DeliveryKind;

    async fn deliver(
        &self,
        context: &DeliveryContext<'_>,
        recipients: &[Recipient],
    ) -> Vec<DeliveryOutcome>;
}
