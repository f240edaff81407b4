//! Per-channel authorization rules of the scheduler.
//!
//! Every channel a message can arrive on (a local client, an iSchedule
//! peer, the email gateway) has its own idea of who may send what. The
//! scheduler runs the same steps for all of them and asks the channel's
//! [`SchedulingPolicy`] at four points.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use kunai_core::constants::SHARED_SECRET_HEADER;
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::ischedule::ErrorFlavor;
use kunai_rfc::rfc::itip::{ITipMethod, SchedulingMessage};

use super::error::{SchedulingError, SchedulingResult};
use crate::directory::Principal;
use crate::dkim::{DkimVerifier, SignedRequest, VerifiedSignature};
use crate::net::HostResolver;
use crate::registry::{DestinationServer, LocalServers, ServerLocation, ServerRegistry};

/// An inbound iSchedule HTTP request as the scheduler needs it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub peer: IpAddr,
    pub method: String,
    /// Request target as received.
    pub path: String,
    /// Every header occurrence in wire order.
    pub headers: Vec<(String, String)>,
    /// The request carried HTTP credentials.
    pub authenticated: bool,
}

impl InboundRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The channel a scheduling request arrived on.
#[derive(Debug, Clone)]
pub enum RequestOrigin {
    /// A calendar client of this server, by authenticated principal UID.
    CalDav { authenticated: Option<String> },
    /// Another server speaking iSchedule.
    ISchedule(InboundRequest),
    /// The inbound email gateway.
    Imip { peer: IpAddr },
    /// Generated by this server; not authorized again.
    Internal,
}

impl RequestOrigin {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CalDav { .. } => "caldav",
            Self::ISchedule(_) => "ischedule",
            Self::Imip { .. } => "imip",
            Self::Internal => "internal",
        }
    }
}

/// A calendar user named by the message, with what the directory knows.
#[derive(Debug, Clone)]
pub struct Party {
    pub address: CalendarUserAddress,
    pub principal: Option<Principal>,
    pub in_my_domain: bool,
}

impl Party {
    /// Hosted on this very server.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.principal.as_ref().is_some_and(Principal::is_locally_hosted)
    }

    /// Hosted on another server of this deployment.
    #[must_use]
    pub fn other_server(&self) -> Option<&Principal> {
        self.principal.as_ref().filter(|p| !p.is_locally_hosted())
    }
}

/// What the policy hooks get to look at.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub origin: &'a RequestOrigin,
    pub message: &'a SchedulingMessage,
    pub originator: &'a Party,
    /// Present when the message names an organizer.
    pub organizer: Option<&'a Party>,
    /// The single attendee of a reply-class message.
    pub attendee: Option<&'a Party>,
    /// Signature that authenticated the request, if any.
    pub signature: Option<&'a VerifiedSignature>,
}

/// Authorization rules of one channel.
///
/// ## Summary
/// `check_authorization` runs before the body is parsed. The other hooks
/// run after the parties are resolved, in the order originator, organizer
/// or attendee, then security.
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    fn flavor(&self) -> ErrorFlavor;

    /// Whether recipients that are not users of this deployment may be
    /// addressed. Inbound channels never relay.
    fn allows_relay(&self) -> bool;

    /// ## Errors
    /// Returns the transaction-fatal failure.
    async fn check_authorization(
        &self,
        origin: &RequestOrigin,
        body: &str,
    ) -> SchedulingResult<Option<VerifiedSignature>>;

    /// ## Errors
    /// Returns the transaction-fatal failure.
    async fn check_originator(&self, input: PolicyInput<'_>) -> SchedulingResult<()>;

    /// ## Errors
    /// Returns the transaction-fatal failure.
    async fn check_organizer_or_attendee(&self, input: PolicyInput<'_>) -> SchedulingResult<()>;

    /// ## Errors
    /// Returns the transaction-fatal failure.
    async fn check_security(&self, input: PolicyInput<'_>) -> SchedulingResult<()>;
}

/// Messages posted by a local calendar user to their outbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalDavPolicy;

impl CalDavPolicy {
    fn authenticated(origin: &RequestOrigin) -> Option<&str> {
        match origin {
            RequestOrigin::CalDav { authenticated } => authenticated.as_deref(),
            _ => None,
        }
    }
}

#[async_trait]
impl SchedulingPolicy for CalDavPolicy {
    fn flavor(&self) -> ErrorFlavor {
        ErrorFlavor::CalDav
    }

    fn allows_relay(&self) -> bool {
        true
    }

    async fn check_authorization(
        &self,
        origin: &RequestOrigin,
        _body: &str,
    ) -> SchedulingResult<Option<VerifiedSignature>> {
        if Self::authenticated(origin).is_none() {
            tracing::warn!("Unauthenticated originators not allowed");
            return Err(SchedulingError::OriginatorDenied("Invalid originator"));
        }
        Ok(None)
    }

    async fn check_originator(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let Some(principal) = &input.originator.principal else {
            tracing::warn!(originator = %input.originator.address, "Could not find principal for originator");
            return Err(SchedulingError::OriginatorDenied("No principal for originator"));
        };
        if !principal.calendars_enabled() || !principal.is_locally_hosted() {
            tracing::warn!(originator = %input.originator.address, "Originator has no outbox on this server");
            return Err(SchedulingError::OriginatorDenied("Originator cannot be scheduled"));
        }
        Ok(())
    }

    async fn check_organizer_or_attendee(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let Some(organizer) = input.organizer else {
            if input.message.method() == ITipMethod::Publish {
                return Ok(());
            }
            tracing::warn!("ORGANIZER missing in calendar data");
            return Err(SchedulingError::InvalidSchedulingMessage(
                "Missing organizer".to_string(),
            ));
        };

        match &organizer.principal {
            Some(principal) if principal.calendars_enabled() => {}
            Some(_) => {
                tracing::warn!(organizer = %organizer.address, "No outbox for ORGANIZER");
                return Err(SchedulingError::OrganizerDenied("Organizer cannot schedule"));
            }
            None if organizer.in_my_domain => {
                tracing::warn!(organizer = %organizer.address, "No principal for ORGANIZER");
                return Err(SchedulingError::OrganizerDenied("No principal for organizer"));
            }
            None => {}
        }

        if !input.message.method().is_request_class() {
            return Ok(());
        }
        if !organizer.is_local() {
            tracing::warn!(organizer = %organizer.address, "ORGANIZER is not local to server");
            return Err(SchedulingError::OrganizerDenied("Organizer is not local to server"));
        }
        let owner = Self::authenticated(input.origin);
        if organizer.principal.as_ref().map(|p| p.uid.as_str()) != owner {
            tracing::warn!(organizer = %organizer.address, "Wrong outbox for ORGANIZER");
            return Err(SchedulingError::OrganizerDenied(
                "Outbox does not belong to organizer",
            ));
        }
        Ok(())
    }

    async fn check_security(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let method = input.message.method();
        if method.is_request_class() {
            return Ok(());
        }
        if !method.is_reply_class() {
            return Err(SchedulingError::UnknownMethod);
        }

        let Some(principal) = input.attendee.and_then(|a| a.principal.as_ref()) else {
            tracing::warn!("Unknown ATTENDEE in calendar data");
            return Err(SchedulingError::AttendeeDenied("No principal for attendee"));
        };
        if Some(principal.uid.as_str()) != Self::authenticated(input.origin) {
            tracing::warn!(attendee = %principal.uid, "ATTENDEE does not match owner of outbox");
            return Err(SchedulingError::AttendeeDenied("Outbox does not belong to attendee"));
        }
        Ok(())
    }
}

/// Messages arriving from other servers over iSchedule.
///
/// Anyone claiming a user hosted here is refused. Users on other pods of
/// this deployment must come from that pod. Users of other organizations
/// must come from a server the registry allows, unless a DKIM signature
/// already vouched for the request.
pub struct ISchedulePolicy {
    verifier: Option<Arc<DkimVerifier>>,
    require_dkim: bool,
    registry: Option<Arc<ServerRegistry>>,
    local_servers: Arc<LocalServers>,
    resolver: Arc<dyn HostResolver>,
}

impl ISchedulePolicy {
    #[must_use]
    pub fn new(
        verifier: Option<Arc<DkimVerifier>>,
        require_dkim: bool,
        registry: Option<Arc<ServerRegistry>>,
        local_servers: Arc<LocalServers>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            verifier,
            require_dkim,
            registry,
            local_servers,
            resolver,
        }
    }

    fn request(origin: &RequestOrigin) -> SchedulingResult<&InboundRequest> {
        match origin {
            RequestOrigin::ISchedule(request) => Ok(request),
            _ => Err(SchedulingError::OriginatorDenied("Originator not allowed to send to this server")),
        }
    }

    /// Checks that the peer speaks for the pod hosting `principal`.
    async fn valid_alternate_server(
        &self,
        request: &InboundRequest,
        principal: &Principal,
    ) -> bool {
        let Some(pod) = principal.server_id().and_then(|id| self.local_servers.server(id)) else {
            tracing::warn!(principal = %principal.uid, "No local server entry for principal");
            return false;
        };
        self.local_servers
            .authorize_peer(
                pod,
                request.peer,
                request.header(SHARED_SECRET_HEADER),
                self.resolver.as_ref(),
            )
            .await
    }

    fn registered_server(&self, originator: &CalendarUserAddress) -> Option<Arc<DestinationServer>> {
        originator
            .domain()
            .zip(self.registry.as_ref())
            .and_then(|(domain, registry)| registry.server_for_domain(domain))
    }

    /// Checks that the peer is the registered server of the originator's
    /// domain, by address or by reverse lookup name.
    async fn valid_ischedule_server(
        &self,
        request: &InboundRequest,
        server: &DestinationServer,
    ) -> bool {
        let host = ServerLocation::parse(server.uri()).map(|l| l.host);
        let is_server_host = |name: &str| host.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(name));

        let client = request.peer.to_string();
        if is_server_host(&client) || server.client_hosts.contains(&client) {
            return true;
        }

        match self.resolver.reverse(request.peer).await {
            Ok(names) => names
                .iter()
                .any(|name| is_server_host(name) || server.client_hosts.matches(name)),
            Err(e) => {
                tracing::debug!(client = %client, error = %e, "iSchedule cannot look up client address");
                false
            }
        }
    }

    /// A signature speaks for the originator when it was made by the
    /// originator's own domain, or by a domain the registry sends to the same
    /// server.
    fn signature_covers(&self, signature: &VerifiedSignature, originator: &CalendarUserAddress) -> bool {
        let Some(domain) = originator.domain() else {
            return false;
        };
        if signature.domain.eq_ignore_ascii_case(domain) {
            return true;
        }
        let Some(registry) = &self.registry else {
            return false;
        };
        match (
            registry.server_for_domain(domain),
            registry.server_for_domain(&signature.domain),
        ) {
            (Some(originator_server), Some(signer_server)) => {
                originator_server.uri() == signer_server.uri()
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SchedulingPolicy for ISchedulePolicy {
    fn flavor(&self) -> ErrorFlavor {
        ErrorFlavor::ISchedule
    }

    fn allows_relay(&self) -> bool {
        false
    }

    #[tracing::instrument(skip_all)]
    async fn check_authorization(
        &self,
        origin: &RequestOrigin,
        body: &str,
    ) -> SchedulingResult<Option<VerifiedSignature>> {
        let request = Self::request(origin)?;
        if request.authenticated {
            tracing::warn!(peer = %request.peer, "Authenticated originators not allowed");
            return Err(SchedulingError::OriginatorDenied("Authentication not allowed"));
        }

        let Some(verifier) = &self.verifier else {
            return Ok(None);
        };
        let signed = SignedRequest {
            method: &request.method,
            path: &request.path,
            headers: &request.headers,
            body: body.as_bytes(),
        };
        match verifier.verify(signed).await {
            Ok(signature) => {
                tracing::debug!(domain = %signature.domain, selector = %signature.selector, "DKIM signature verified");
                Ok(Some(signature))
            }
            Err(e) if e.is_missing() && !self.require_dkim => {
                tracing::debug!("No DKIM signature; falling back to server checks");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(peer = %request.peer, error = %e, "Failed to verify DKIM signature");
                Err(SchedulingError::VerificationFailed(
                    "Failed to verify DKIM signature".to_string(),
                ))
            }
        }
    }

    async fn check_originator(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let request = Self::request(input.origin)?;
        let originator = input.originator;

        if originator.is_local() || (originator.principal.is_none() && originator.in_my_domain) {
            tracing::warn!(originator = %originator.address, "Cannot use originator that is local to this server");
            return Err(SchedulingError::OriginatorDenied(
                "Originator cannot be local to server",
            ));
        }

        let allowed = match (originator.other_server(), input.signature) {
            (Some(principal), _) => self.valid_alternate_server(request, principal).await,
            (None, Some(signature)) => {
                let covered = self.signature_covers(signature, &originator.address);
                if !covered {
                    tracing::warn!(originator = %originator.address, signer = %signature.domain, "DKIM signing domain does not match originator");
                }
                covered
            }
            (None, None) => {
                let Some(server) = self
                    .registered_server(&originator.address)
                    .filter(|s| s.allow_from)
                else {
                    tracing::warn!(originator = %originator.address, "Originator not on recognized server");
                    return Err(SchedulingError::OriginatorDenied(
                        "Originator not recognized by server",
                    ));
                };
                self.valid_ischedule_server(request, &server).await
            }
        };

        if !allowed {
            tracing::warn!(originator = %originator.address, peer = %request.peer, "Originator not on allowed server");
            return Err(SchedulingError::OriginatorDenied(
                "Originator not allowed to send to this server",
            ));
        }
        Ok(())
    }

    async fn check_organizer_or_attendee(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        if !input.message.method().is_request_class() {
            return Ok(());
        }
        let request = Self::request(input.origin)?;
        let Some(organizer) = input.organizer else {
            tracing::warn!("ORGANIZER missing in calendar data");
            return Err(SchedulingError::OrganizerDenied("No organizer in calendar data"));
        };

        if organizer.is_local() {
            tracing::warn!(organizer = %organizer.address, "Invalid ORGANIZER in calendar data");
            return Err(SchedulingError::OrganizerDenied("Organizer is not local to server"));
        }
        if let Some(principal) = organizer.other_server() {
            if !self.valid_alternate_server(request, principal).await {
                return Err(SchedulingError::OriginatorDenied(
                    "Originator not allowed to send to this server",
                ));
            }
        } else if organizer.in_my_domain {
            tracing::warn!(organizer = %organizer.address, "Unsupported ORGANIZER in calendar data");
            return Err(SchedulingError::OrganizerDenied(
                "Organizer not allowed to be originator",
            ));
        }
        Ok(())
    }

    async fn check_security(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let method = input.message.method();
        if method.is_request_class() {
            return Ok(());
        }
        if !method.is_reply_class() {
            tracing::warn!(method = %method, "Unknown iTIP METHOD for security checks");
            return Err(SchedulingError::UnknownMethod);
        }

        let request = Self::request(input.origin)?;
        let Some(attendee) = input.attendee else {
            return Err(SchedulingError::InvalidSchedulingMessage(
                "Wrong number of attendees".to_string(),
            ));
        };
        if attendee.is_local() {
            tracing::warn!(attendee = %attendee.address, "Invalid ATTENDEE in calendar data");
            return Err(SchedulingError::AttendeeDenied(
                "Local attendee cannot send to this server",
            ));
        }
        if let Some(principal) = attendee.other_server() {
            if !self.valid_alternate_server(request, principal).await {
                return Err(SchedulingError::OriginatorDenied(
                    "Originator not allowed to send to this server",
                ));
            }
        } else if attendee.in_my_domain {
            tracing::warn!(attendee = %attendee.address, "Unknown ATTENDEE in calendar data");
            return Err(SchedulingError::AttendeeDenied("Attendee not allowed to schedule"));
        }
        Ok(())
    }
}

/// Replies injected by the inbound mail gateway.
pub struct ImipPolicy {
    mail_gateway_host: String,
    resolver: Arc<dyn HostResolver>,
}

impl ImipPolicy {
    #[must_use]
    pub fn new(mail_gateway_host: impl Into<String>, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            mail_gateway_host: mail_gateway_host.into(),
            resolver,
        }
    }
}

#[async_trait]
impl SchedulingPolicy for ImipPolicy {
    fn flavor(&self) -> ErrorFlavor {
        ErrorFlavor::CalDav
    }

    fn allows_relay(&self) -> bool {
        false
    }

    async fn check_authorization(
        &self,
        _origin: &RequestOrigin,
        _body: &str,
    ) -> SchedulingResult<Option<VerifiedSignature>> {
        Ok(None)
    }

    async fn check_originator(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let originator = input.originator;
        if originator.principal.is_some() || originator.in_my_domain {
            tracing::warn!(originator = %originator.address, "Cannot use originator that is on this server");
            return Err(SchedulingError::OriginatorDenied(
                "Originator cannot be local to server",
            ));
        }
        Ok(())
    }

    async fn check_organizer_or_attendee(&self, _input: PolicyInput<'_>) -> SchedulingResult<()> {
        Ok(())
    }

    async fn check_security(&self, input: PolicyInput<'_>) -> SchedulingResult<()> {
        let RequestOrigin::Imip { peer } = input.origin else {
            return Err(SchedulingError::OriginatorDenied(
                "Originator server not allowed to send to this server",
            ));
        };

        let expected = self.mail_gateway_host.as_str();
        let mut matched = peer.to_string() == expected;
        if !matched {
            matched = match self.resolver.reverse(*peer).await {
                Ok(names) => names.iter().any(|n| n.eq_ignore_ascii_case(expected)),
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "Cannot look up mail gateway address");
                    false
                }
            };
        }
        if !matched {
            tracing::warn!(peer = %peer, expected = %expected, "Only the mail gateway may inject iMIP replies");
            return Err(SchedulingError::OriginatorDenied(
                "Originator server not allowed to send to this server",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Hosting;
    use crate::net::StaticHostResolver;
    use crate::registry::HostPatterns;

    const REQUEST: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nMETHOD:REQUEST\r\n\
BEGIN:VEVENT\r\nUID:event-1\r\nDTSTAMP:20240101T000000Z\r\nDTSTART:20240102T100000Z\r\n\
ORGANIZER:mailto:bob@partner.org\r\nATTENDEE:mailto:user01@example.com\r\n\
END:VEVENT\r\nEND:VCALENDAR\r\n";

    const REPLY: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nMETHOD:REPLY\r\n\
BEGIN:VEVENT\r\nUID:event-1\r\nDTSTAMP:20240101T000000Z\r\nDTSTART:20240102T100000Z\r\n\
ORGANIZER:mailto:user01@example.com\r\nATTENDEE;PARTSTAT=ACCEPTED:mailto:bob@partner.org\r\n\
END:VEVENT\r\nEND:VCALENDAR\r\n";

    fn principal(uid: &str, hosting: Hosting) -> Principal {
        Principal {
            uid: uid.to_string(),
            display_name: None,
            addresses: vec![CalendarUserAddress::new(format!("mailto:{uid}@example.com"))],
            hosting,
            inbox: Some(format!("/calendars/__uids__/{uid}/inbox/")),
        }
    }

    fn local(uid: &str) -> Party {
        Party {
            address: CalendarUserAddress::new(format!("mailto:{uid}@example.com")),
            principal: Some(principal(uid, Hosting::ThisServer)),
            in_my_domain: true,
        }
    }

    fn remote(address: &str) -> Party {
        Party {
            address: CalendarUserAddress::new(address),
            principal: None,
            in_my_domain: false,
        }
    }

    fn inbound(peer: &str) -> RequestOrigin {
        RequestOrigin::ISchedule(InboundRequest {
            peer: peer.parse().unwrap(),
            method: "POST".to_string(),
            path: "/ischedule".to_string(),
            headers: Vec::new(),
            authenticated: false,
        })
    }

    fn ischedule_policy(resolver: StaticHostResolver) -> ISchedulePolicy {
        let mut partner = DestinationServer::new("https://ischedule.partner.org/ischedule").unwrap();
        partner.allow_from = true;
        partner.domains = vec!["partner.org".to_string(), "partner-mail.com".to_string()];
        partner.client_hosts = HostPatterns::new(["mx[0-9]+\\.partner\\.org"]);
        let mut closed = DestinationServer::new("https://closed.example.net/ischedule").unwrap();
        closed.domains = vec!["closed.example.net".to_string()];

        ISchedulePolicy::new(
            None,
            false,
            Some(Arc::new(ServerRegistry::from_servers(vec![partner, closed]))),
            Arc::new(LocalServers::empty()),
            Arc::new(resolver),
        )
    }

    fn input<'a>(
        origin: &'a RequestOrigin,
        message: &'a SchedulingMessage,
        originator: &'a Party,
        organizer: Option<&'a Party>,
        attendee: Option<&'a Party>,
    ) -> PolicyInput<'a> {
        PolicyInput {
            origin,
            message,
            originator,
            organizer,
            attendee,
            signature: None,
        }
    }

    #[tokio::test]
    async fn caldav_requires_authentication() {
        let policy = CalDavPolicy;
        let err = policy
            .check_authorization(&RequestOrigin::CalDav { authenticated: None }, "")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::OriginatorDenied("Invalid originator")));
    }

    #[tokio::test]
    async fn caldav_organizer_must_own_outbox() {
        let policy = CalDavPolicy;
        let message = SchedulingMessage::load(&REQUEST.replace("bob@partner.org", "user01@example.com"))
            .unwrap();
        let origin = RequestOrigin::CalDav {
            authenticated: Some("user02".to_string()),
        };
        let originator = local("user02");
        let organizer = local("user01");

        policy
            .check_originator(input(&origin, &message, &originator, Some(&organizer), None))
            .await
            .unwrap();
        let err = policy
            .check_organizer_or_attendee(input(&origin, &message, &originator, Some(&organizer), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OrganizerDenied("Outbox does not belong to organizer")
        ));
    }

    #[tokio::test]
    async fn caldav_rejects_remote_organizer() {
        let policy = CalDavPolicy;
        let message = SchedulingMessage::load(REQUEST).unwrap();
        let origin = RequestOrigin::CalDav {
            authenticated: Some("user01".to_string()),
        };
        let originator = local("user01");
        let organizer = remote("mailto:bob@partner.org");
        let err = policy
            .check_organizer_or_attendee(input(&origin, &message, &originator, Some(&organizer), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OrganizerDenied("Organizer is not local to server")
        ));
    }

    #[tokio::test]
    async fn caldav_reply_needs_attendee_principal() {
        let policy = CalDavPolicy;
        let message = SchedulingMessage::load(REPLY).unwrap();
        let origin = RequestOrigin::CalDav {
            authenticated: Some("user01".to_string()),
        };
        let originator = local("user01");
        let attendee = remote("mailto:bob@partner.org");
        let err = policy
            .check_security(input(&origin, &message, &originator, None, Some(&attendee)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::AttendeeDenied("No principal for attendee")));
    }

    #[test_log::test(tokio::test)]
    async fn ischedule_refuses_local_organizer() {
        let policy = ischedule_policy(StaticHostResolver::new());
        let message = SchedulingMessage::load(&REQUEST.replace("bob@partner.org", "user01@example.com"))
            .unwrap();
        let origin = inbound("192.0.2.10");
        let originator = remote("mailto:bob@partner.org");
        let organizer = local("user01");
        let err = policy
            .check_organizer_or_attendee(input(&origin, &message, &originator, Some(&organizer), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OrganizerDenied("Organizer is not local to server")
        ));
    }

    #[tokio::test]
    async fn ischedule_refuses_authenticated_peer() {
        let policy = ischedule_policy(StaticHostResolver::new());
        let RequestOrigin::ISchedule(mut request) = inbound("192.0.2.10") else {
            unreachable!()
        };
        request.authenticated = true;
        let err = policy
            .check_authorization(&RequestOrigin::ISchedule(request), "")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::OriginatorDenied("Authentication not allowed")));
    }

    #[tokio::test]
    async fn ischedule_originator_checks() {
        let peer: IpAddr = "192.0.2.10".parse().unwrap();
        let policy = ischedule_policy(StaticHostResolver::new().with_host("mx1.partner.org", peer));
        let message = SchedulingMessage::load(REQUEST).unwrap();

        // reverse name matches a client host pattern
        let origin = inbound("192.0.2.10");
        let originator = remote("mailto:bob@partner.org");
        policy
            .check_originator(input(&origin, &message, &originator, None, None))
            .await
            .unwrap();

        // unknown peer
        let stranger = inbound("198.51.100.7");
        let err = policy
            .check_originator(input(&stranger, &message, &originator, None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OriginatorDenied("Originator not allowed to send to this server")
        ));

        // server does not accept inbound requests
        let closed = remote("mailto:eve@closed.example.net");
        let err = policy
            .check_originator(input(&origin, &message, &closed, None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OriginatorDenied("Originator not recognized by server")
        ));

        // local users cannot arrive from outside
        let spoofed = local("user01");
        let err = policy
            .check_originator(input(&origin, &message, &spoofed, None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OriginatorDenied("Originator cannot be local to server")
        ));
    }

    #[tokio::test]
    async fn ischedule_signature_replaces_server_check() {
        let policy = ischedule_policy(StaticHostResolver::new());
        let message = SchedulingMessage::load(REQUEST).unwrap();
        let origin = inbound("198.51.100.7");
        let originator = remote("mailto:bob@partner.org");
        let signature = VerifiedSignature {
            domain: "partner.org".to_string(),
            selector: "ischedule".to_string(),
        };
        let mut checked = input(&origin, &message, &originator, None, None);
        checked.signature = Some(&signature);
        policy.check_originator(checked).await.unwrap();
    }

    #[tokio::test]
    async fn ischedule_signature_must_speak_for_originator() {
        let policy = ischedule_policy(StaticHostResolver::new());
        let message = SchedulingMessage::load(REQUEST).unwrap();
        let origin = inbound("198.51.100.7");
        let originator = remote("mailto:bob@partner.org");

        let stranger = VerifiedSignature {
            domain: "attacker.example".to_string(),
            selector: "ischedule".to_string(),
        };
        let mut checked = input(&origin, &message, &originator, None, None);
        checked.signature = Some(&stranger);
        let err = policy.check_originator(checked).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OriginatorDenied("Originator not allowed to send to this server")
        ));

        let sibling = VerifiedSignature {
            domain: "partner-mail.com".to_string(),
            selector: "ischedule".to_string(),
        };
        let mut checked = input(&origin, &message, &originator, None, None);
        checked.signature = Some(&sibling);
        policy.check_originator(checked).await.unwrap();
    }

    #[tokio::test]
    async fn ischedule_reply_from_local_attendee_is_denied() {
        let policy = ischedule_policy(StaticHostResolver::new());
        let message = SchedulingMessage::load(REPLY).unwrap();
        let origin = inbound("192.0.2.10");
        let originator = local("user02");
        let attendee = local("user02");
        let err = policy
            .check_security(input(&origin, &message, &originator, None, Some(&attendee)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::AttendeeDenied("Local attendee cannot send to this server")
        ));
    }

    #[tokio::test]
    async fn imip_only_from_gateway() {
        let gateway: IpAddr = "10.0.0.5".parse().unwrap();
        let policy = ImipPolicy::new(
            "mail.example.com",
            Arc::new(StaticHostResolver::new().with_host("mail.example.com", gateway)),
        );
        let message = SchedulingMessage::load(REPLY).unwrap();
        let originator = remote("mailto:bob@partner.org");

        let origin = RequestOrigin::Imip { peer: gateway };
        policy
            .check_originator(input(&origin, &message, &originator, None, None))
            .await
            .unwrap();
        policy
            .check_security(input(&origin, &message, &originator, None, None))
            .await
            .unwrap();

        let elsewhere = RequestOrigin::Imip {
            peer: "10.0.0.6".parse().unwrap(),
        };
        assert!(
            policy
                .check_security(input(&elsewhere, &message, &originator, None, None))
                .await
                .is_err()
        );

        let local_originator = local("user01");
        let err = policy
            .check_originator(input(&origin, &message, &local_originator, None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::OriginatorDenied("Originator cannot be local to server")
        ));
    }
}
