//! Outbound iMIP through an HTTP mail gateway.

use std::time::Duration;

use async_trait::async_trait;
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::itip::SchedulingMessage;
use serde::Serialize;

use super::MailGateway;
use crate::error::{ServiceError, ServiceResult};

/// JSON body accepted by the gateway.
#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    originator: &'a str,
    recipient: &'a str,
    method: &'a str,
    uid: Option<&'a str>,
    calendar: String,
}

/// Posts each message to the configured gateway URL, which turns it into an
/// email.
#[derive(Debug, Clone)]
pub struct HttpMailGateway {
    client: reqwest::Client,
    url: String,
}

impl HttpMailGateway {
    /// ## Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(kunai_core::constants::USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MailGateway for HttpMailGateway {
    #[tracing::instrument(skip(self, message), fields(gateway = %self.url, recipient = %recipient))]
    async fn send(
        &self,
        originator: &CalendarUserAddress,
        recipient: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<()> {
        let body = GatewayMessage {
            originator: originator.as_str(),
            recipient: recipient.as_str(),
            method: message.method().as_str(),
            uid: message.uid(),
            calendar: message.to_ical_string(),
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Mail gateway rejected message");
            return Err(ServiceError::DeliveryFailed(format!(
                "mail gateway answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
