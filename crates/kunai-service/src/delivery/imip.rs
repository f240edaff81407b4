use std::sync::Arc;

use async_trait::async_trait;
use kunai_core::types::AddressScheme;
use kunai_rfc::rfc::ischedule::{DeliveryOutcome, RequestStatus, ScheduleCondition};

use super::{DeliveryContext, DeliveryService};
use crate::address::{DeliveryKind, Recipient};
use crate::directory::MailGateway;

/// Sends messages as email through the mail gateway.
#[derive(Clone)]
pub struct ImipDelivery {
    gateway: Option<Arc<dyn MailGateway>>,
}

impl ImipDelivery {
    /// Without a gateway every recipient fails.
    #[must_use]
    pub fn new(gateway: Option<Arc<dyn MailGateway>>) -> Self {
        Self { gateway }
    }

    fn fail_all(
        context: &DeliveryContext<'_>,
        recipients: &[Recipient],
        description: &str,
    ) -> Vec<DeliveryOutcome> {
        recipients
            .iter()
            .map(|r| {
                context.failure(
                    &r.address,
                    RequestStatus::SERVICE_UNAVAILABLE,
                    ScheduleCondition::RecipientFailed,
                    description,
                )
            })
            .collect()
    }
}

#[async_trait]
impl DeliveryService for ImipDelivery {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Imip
    }

    #[tracing::instrument(skip_all, fields(recipients = recipients.len()))]
    async fn deliver(
        &self,
        context: &DeliveryContext<'_>,
        recipients: &[Recipient],
    ) -> Vec<DeliveryOutcome> {
        if context.is_freebusy() {
            tracing::debug!("Free-busy requests are not sent by email");
            return Self::fail_all(context, recipients, "iMIP does not support Free-Busy");
        }
        let Some(gateway) = &self.gateway else {
            tracing::warn!("No mail gateway configured");
            return Self::fail_all(context, recipients, "No mail gateway");
        };
        if context.originator.scheme() != AddressScheme::Mailto {
            tracing::warn!(originator = %context.originator, "Originator must be mailto: for email delivery");
            return Self::fail_all(context, recipients, "Originator is not an email address");
        }

        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let outcome = match gateway
                .send(context.originator, &recipient.address, context.message)
                .await
            {
                Ok(()) => DeliveryOutcome::new(recipient.address.as_str(), RequestStatus::SUCCESS),
                Err(e) => {
                    tracing::warn!(recipient = %recipient.address, error = %e, "Could not send iMIP message");
                    context.failure(
                        &recipient.address,
                        RequestStatus::SERVICE_UNAVAILABLE,
                        ScheduleCondition::RecipientFailed,
                        "Could not send email",
                    )
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}
