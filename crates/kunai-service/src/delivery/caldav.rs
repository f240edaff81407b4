use std::sync::Arc;

use async_trait::async_trait;
use kunai_rfc::rfc::ischedule::{DeliveryOutcome, RequestStatus, ScheduleCondition};

use super::{DeliveryContext, DeliveryService};
use crate::address::{DeliveryKind, Recipient};
use crate::directory::Mailbox;

/// Hands messages to the inboxes of locally hosted principals.
#[derive(Clone)]
pub struct CalDavDelivery {
    mailbox: Arc<dyn Mailbox>,
}

impl CalDavDelivery {
    #[must_use]
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }

    async fn deliver_one(&self, context: &DeliveryContext<'_>, recipient: &Recipient) -> DeliveryOutcome {
        let Some(principal) = recipient.principal() else {
            return context.failure(
                &recipient.address,
                RequestStatus::INVALID_CALENDAR_USER,
                ScheduleCondition::RecipientInvalid,
                "Unknown recipient",
            );
        };

        if context.is_freebusy() {
            return match self
                .mailbox
                .free_busy(principal, &recipient.address, context.message)
                .await
            {
                Ok(calendar) => DeliveryOutcome::new(recipient.address.as_str(), RequestStatus::SUCCESS)
                    .with_calendar_data(calendar),
                Err(e) => {
                    tracing::warn!(recipient = %recipient.address, error = %e, "Could not determine free busy information");
                    context.failure(
                        &recipient.address,
                        RequestStatus::NO_AUTHORITY,
                        ScheduleCondition::RecipientPermissions,
                        "Could not determine free busy information",
                    )
                }
            };
        }

        match self
            .mailbox
            .deliver(principal, context.originator, context.message)
            .await
        {
            Ok(()) => DeliveryOutcome::new(recipient.address.as_str(), RequestStatus::DELIVERED),
            Err(e) => {
                tracing::warn!(recipient = %recipient.address, error = %e, "Could not store data in inbox");
                context.failure(
                    &recipient.address,
                    RequestStatus::NO_AUTHORITY,
                    ScheduleCondition::RecipientPermissions,
                    "Could not store data in inbox",
                )
            }
        }
    }
}

#[async_trait]
impl DeliveryService for CalDavDelivery {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::CalDav
    }

    #[tracing::instrument(skip_all, fields(recipients = recipients.len()))]
    async fn deliver(
        &self,
        context: &DeliveryContext<'_>,
        recipients: &[Recipient],
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            outcomes.push(self.deliver_one(context, recipient).await);
        }
        outcomes
    }
}
