use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::join_all;
use http::StatusCode;
use kunai_core::constants::{
    CALENDAR_CONTENT_TYPE, DKIM_SIGNATURE_HEADER, ISCHEDULE_MESSAGE_ID_HEADER,
    ISCHEDULE_VERSION_HEADER, ISCHEDULE_VERSION_VALUE, ORIGINATOR_HEADER, RECIPIENT_HEADER,
    REFRESH_ONLY_HEADER, USER_AGENT,
};
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::ical::serialize;
use kunai_rfc::rfc::ischedule::{
    DeliveryOutcome, RequestStatus, ScheduleCondition, parse_schedule_response,
};
use kunai_rfc::rfc::itip::SchedulingMessage;
use tracing_futures::Instrument;

use super::{DeliveryContext, DeliveryService};
use crate::address::{DeliveryKind, Recipient, RecipientKind};
use crate::directory::Directory;
use crate::dkim::DkimSigner;
use crate::error::{ServiceError, ServiceResult};
use crate::registry::{DestinationServer, LocalServers, PodServer, ServerLocation, ServerRegistry};

/// Redirects followed before a delivery is given up.
pub const MAX_REDIRECTS: usize = 3;

/// Delivers to other servers over iSchedule, one POST per server.
///
/// The same implementation serves remote domains, looked up in the
/// [`ServerRegistry`], and the other servers of this deployment, looked up
/// in [`LocalServers`] by the recipient principal's server id.
pub struct IScheduleDelivery {
    kind: DeliveryKind,
    client: reqwest::Client,
    registry: Option<Arc<ServerRegistry>>,
    local_servers: Arc<LocalServers>,
    directory: Arc<dyn Directory>,
    signer: Option<Arc<DkimSigner>>,
}

impl IScheduleDelivery {
    /// ## Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        kind: DeliveryKind,
        registry: Option<Arc<ServerRegistry>>,
        local_servers: Arc<LocalServers>,
        directory: Arc<dyn Directory>,
        signer: Option<Arc<DkimSigner>>,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            kind,
            client,
            registry,
            local_servers,
            directory,
            signer,
        })
    }

    fn server_for(&self, recipient: &Recipient) -> Option<Arc<DestinationServer>> {
        match &recipient.kind {
            RecipientKind::RemoteDomain(domain) => self
                .registry
                .as_ref()
                .and_then(|registry| registry.server_for_domain(domain)),
            RecipientKind::Partitioned(principal) | RecipientKind::OtherFederationNode(principal) => {
                principal
                    .server_id()
                    .and_then(|id| self.local_servers.server(id))
                    .map(PodServer::destination)
            }
            _ => None,
        }
    }

    /// Maps the calendar-user addresses of a message to the form the
    /// directory displays, for peers that expect un-normalized addresses.
    async fn display_addresses(
        &self,
        message: &SchedulingMessage,
    ) -> HashMap<CalendarUserAddress, String> {
        let mut addresses = HashMap::new();
        for address in message.organizer().into_iter().chain(message.attendees()) {
            if addresses.contains_key(address) {
                continue;
            }
            match self.directory.resolve_principal(address).await {
                Ok(Some(principal)) => {
                    if let Some(display) = principal.display_address()
                        && display.as_str() != address.as_str()
                    {
                        addresses.insert(address.clone(), display.as_str().to_string());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(address = %address, error = %e, "Could not look up address for un-normalization");
                }
            }
        }
        addresses
    }

    async fn deliver_group(
        &self,
        context: &DeliveryContext<'_>,
        server: &DestinationServer,
        recipients: &[&Recipient],
        display: &HashMap<CalendarUserAddress, String>,
    ) -> Vec<DeliveryOutcome> {
        let parsed = match self.post(context, server, recipients, display).await {
            Ok(body) => parse_schedule_response(&body).map_err(ServiceError::from),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(mut outcomes) => recipients
                .iter()
                .map(|recipient| {
                    let index = outcomes
                        .iter()
                        .position(|o| CalendarUserAddress::new(o.recipient.as_str()) == recipient.address);
                    match index {
                        Some(index) => {
                            let mut outcome = outcomes.swap_remove(index);
                            outcome.recipient = recipient.address.as_str().to_string();
                            outcome
                        }
                        None => {
                            tracing::warn!(server = %server.uri(), recipient = %recipient.address, "Server response omits recipient");
                            context.failure(
                                &recipient.address,
                                RequestStatus::SERVICE_UNAVAILABLE,
                                ScheduleCondition::RecipientFailed,
                                "No response for recipient",
                            )
                        }
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(server = %server.uri(), error = %e, "Could not do server-to-server request");
                recipients
                    .iter()
                    .map(|recipient| {
                        context.failure(
                            &recipient.address,
                            RequestStatus::SERVICE_UNAVAILABLE,
                            ScheduleCondition::RecipientFailed,
                            "Server-to-server request failed",
                        )
                    })
                    .collect()
            }
        }
    }

    /// Sends the group's request, following redirects, and returns the body
    /// of the final response.
    ///
    /// ## Summary
    /// A permanent redirect is recorded on the server for later deliveries;
    /// a temporary one is followed for this request only. Each attempt is
    /// signed afresh since the `Host` header and path change.
    async fn post(
        &self,
        context: &DeliveryContext<'_>,
        server: &DestinationServer,
        recipients: &[&Recipient],
        display: &HashMap<CalendarUserAddress, String>,
    ) -> ServiceResult<Vec<u8>> {
        let unnormalize = server.unnormalize_addresses;
        let rewrite = |address: &CalendarUserAddress| {
            if unnormalize {
                display.get(address).cloned()
            } else {
                None
            }
        };

        let batch: Vec<CalendarUserAddress> = recipients.iter().map(|r| r.address.clone()).collect();
        let body = serialize(&context.message.calendar_for(&batch, rewrite));
        let originator = rewrite(context.originator).unwrap_or_else(|| context.originator.to_string());

        let mut headers = vec![(ORIGINATOR_HEADER.to_string(), originator)];
        headers.extend(
            recipients
                .iter()
                .map(|r| (RECIPIENT_HEADER.to_string(), r.address.as_str().to_string())),
        );
        headers.push((
            "Content-Type".to_string(),
            format!(
                "{CALENDAR_CONTENT_TYPE}; charset=utf-8; component={}; method={}",
                context.message.kind().as_str(),
                context.message.method().as_str()
            ),
        ));
        headers.push((
            ISCHEDULE_VERSION_HEADER.to_string(),
            ISCHEDULE_VERSION_VALUE.to_string(),
        ));
        headers.push((
            ISCHEDULE_MESSAGE_ID_HEADER.to_string(),
            uuid::Uuid::new_v4().to_string(),
        ));
        headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
        headers.extend(server.headers.iter().cloned());
        if context.refresh_only {
            headers.push((REFRESH_ONLY_HEADER.to_string(), "T".to_string()));
        }

        let mut sign_headers = vec!["Host", "Recipient+"];
        if let Some(auth) = &server.authentication {
            let credentials = STANDARD.encode(format!("{}:{}", auth.user, auth.password));
            headers.push(("Authorization".to_string(), format!("Basic {credentials}")));
            sign_headers.push("Authorization");
        }

        let signer = self.signer.as_deref().filter(|_| !server.podding);
        let mut location = server.location();
        for _ in 0..=MAX_REDIRECTS {
            let mut request_headers = Vec::with_capacity(headers.len() + 2);
            request_headers.push(("Host".to_string(), location.host_header()));
            request_headers.extend(headers.iter().cloned());
            if let Some(signer) = signer {
                let signature =
                    signer.sign("POST", &location.path, &request_headers, &sign_headers, body.as_bytes())?;
                request_headers.push((DKIM_SIGNATURE_HEADER.to_string(), signature));
            }
            log_request(&location, &request_headers, &body);

            let mut request = self.client.post(location.url());
            for (name, value) in &request_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request.body(body.clone()).send().await?;
            let status = response.status();
            tracing::debug!(status = %status, url = %location.url(), "Received server-to-server response");

            match status {
                StatusCode::MOVED_PERMANENTLY => {
                    location = server.redirect(redirect_target(&response)?)?;
                }
                StatusCode::TEMPORARY_REDIRECT => {
                    let target = redirect_target(&response)?;
                    location = location.join(target).ok_or_else(|| {
                        ServiceError::DeliveryFailed(format!("invalid redirect location: {target}"))
                    })?;
                    tracing::debug!(location = %location.url(), "Following temporary redirect");
                }
                status if status.is_success() => {
                    let body = response.bytes().await?;
                    tracing::trace!(body = %String::from_utf8_lossy(&body), "Server-to-server response body");
                    return Ok(body.to_vec());
                }
                status => {
                    return Err(ServiceError::DeliveryFailed(format!(
                        "server answered {status}"
                    )));
                }
            }
        }
        Err(ServiceError::DeliveryFailed("Too many redirects".to_string()))
    }
}

fn redirect_target(response: &reqwest::Response) -> ServiceResult<&str> {
    response
        .headers()
        .get(http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::DeliveryFailed("redirect without location".to_string()))
}

fn log_request(location: &ServerLocation, headers: &[(String, String)], body: &str) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    let mut dump = format!("POST {} HTTP/1.1\n", location.path);
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Authorization") {
            dump.push_str(&format!("{name}: xxxxxxxxx\n"));
        } else {
            dump.push_str(&format!("{name}: {value}\n"));
        }
    }
    dump.push('\n');
    dump.push_str(body);
    tracing::trace!(request = %dump, "Sending server-to-server request");
}

#[async_trait]
impl DeliveryService for IScheduleDelivery {
    fn kind(&self) -> DeliveryKind {
        self.kind
    }

    #[tracing::instrument(skip_all, fields(kind = ?self.kind, recipients = recipients.len()))]
    async fn deliver(
        &self,
        context: &DeliveryContext<'_>,
        recipients: &[Recipient],
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        let mut groups: Vec<(Arc<DestinationServer>, Vec<&Recipient>)> = Vec::new();

        for recipient in recipients {
            match self.server_for(recipient) {
                None => {
                    tracing::debug!(recipient = %recipient.address, "No server for recipient");
                    outcomes.push(context.failure(
                        &recipient.address,
                        RequestStatus::NO_USER_SUPPORT,
                        ScheduleCondition::RecipientAllowed,
                        "No server for recipient",
                    ));
                }
                Some(server) if !server.allow_to => {
                    tracing::debug!(recipient = %recipient.address, server = %server.uri(), "Server does not accept requests from us");
                    outcomes.push(context.failure(
                        &recipient.address,
                        RequestStatus::SERVICE_UNAVAILABLE,
                        ScheduleCondition::RecipientAllowed,
                        "Cannot send to recipient's server",
                    ));
                }
                Some(server) => match groups.iter_mut().find(|(s, _)| s.uri() == server.uri()) {
                    Some((_, members)) => members.push(recipient),
                    None => groups.push((server, vec![recipient])),
                },
            }
        }

        if groups.is_empty() {
            return outcomes;
        }

        let display = if groups.iter().any(|(s, _)| s.unnormalize_addresses) {
            self.display_addresses(context.message).await
        } else {
            HashMap::new()
        };

        let requests = groups.iter().map(|(server, members)| {
            let span = tracing::info_span!(
                "ischedule_post",
                host = %server.location().host,
                recipients = members.len()
            );
            self.deliver_group(context, server, members, &display)
                .instrument(span)
        });
        for group in join_all(requests).await {
            outcomes.extend(group);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use kunai_rfc::rfc::ischedule::ErrorFlavor;

    const REQUEST: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nMETHOD:REQUEST\r\n\
BEGIN:VEVENT\r\nUID:event-1\r\nDTSTAMP:20240101T000000Z\r\nDTSTART:20240102T100000Z\r\n\
ORGANIZER:mailto:user01@example.com\r\nATTENDEE:mailto:bob@partner.org\r\n\
ATTENDEE:mailto:dave@closed.org\r\nATTENDEE:mailto:eve@unknown.org\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    fn remote(address: &str) -> Recipient {
        let address = CalendarUserAddress::new(address);
        Recipient {
            kind: RecipientKind::RemoteDomain(address.domain().unwrap_or_default().to_string()),
            address,
        }
    }

    #[tokio::test]
    async fn unroutable_recipients_fail_without_network() {
        let mut closed = DestinationServer::new("https://closed.org/ischedule").unwrap();
        closed.domains = vec!["closed.org".to_string()];
        closed.allow_to = false;
        let registry = Arc::new(ServerRegistry::from_servers(vec![closed]));

        let delivery = IScheduleDelivery::new(
            DeliveryKind::ISchedule,
            Some(registry),
            Arc::new(LocalServers::empty()),
            Arc::new(MemoryDirectory::default()),
            None,
            Duration::from_secs(1),
        )
        .unwrap();

        let message = SchedulingMessage::load(REQUEST).unwrap();
        let originator = CalendarUserAddress::new("mailto:user01@example.com");
        let context = DeliveryContext {
            message: &message,
            originator: &originator,
            flavor: ErrorFlavor::ISchedule,
            refresh_only: false,
        };

        let outcomes = delivery
            .deliver(
                &context,
                &[remote("mailto:dave@closed.org"), remote("mailto:eve@unknown.org")],
            )
            .await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].request_status, RequestStatus::SERVICE_UNAVAILABLE);
        assert_eq!(
            outcomes[0].description.as_deref(),
            Some("Cannot send to recipient's server")
        );
        assert_eq!(outcomes[1].request_status, RequestStatus::NO_USER_SUPPORT);
        assert_eq!(
            outcomes[1].error,
            Some(ScheduleCondition::RecipientAllowed.element(ErrorFlavor::ISchedule))
        );
    }
}
