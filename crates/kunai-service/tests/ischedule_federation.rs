use std::sync::Arc;
use std::time::Duration;

use kunai_core::config::Settings;
use kunai_core::constants::DKIM_SIGNATURE_HEADER;
use kunai_core::types::{CalendarUserAddress, DkimAlgorithm, KeyLookupMethod};
use kunai_rfc::rfc::dkim::DkimError;
use kunai_rfc::rfc::ischedule::{ErrorFlavor, RequestStatus};
use kunai_rfc::rfc::itip::SchedulingMessage;
use kunai_service::address::{AddressClassifier, DeliveryKind, Recipient, RecipientKind};
use kunai_service::delivery::{CalDavDelivery, DeliveryContext, DeliveryService, IScheduleDelivery, MAX_REDIRECTS};
use kunai_service::directory::{Hosting, MemoryDirectory, MemoryMailbox, Principal};
use kunai_service::dkim::{DkimSigner, DkimVerifier, DnsTxtLookup, HttpWellKnownLookup, KeyCache, SignedRequest};
use kunai_service::net::StaticHostResolver;
use kunai_service::registry::{DestinationServer, LocalServers, ServerRegistry};
use kunai_service::scheduling::{
    ISchedulePolicy, InboundRequest, RequestOrigin, ScheduleRequest, Scheduler, SchedulingError, UidLocks,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIVATE_KEY: &str = include_str!("fixtures/dkim_private.pem");

const REQUEST: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nMETHOD:REQUEST\r\n\
BEGIN:VEVENT\r\nUID:event-1\r\nDTSTAMP:20240101T000000Z\r\nDTSTART:20240102T100000Z\r\n\
ORGANIZER:mailto:user01@example.com\r\nATTENDEE:mailto:user01@example.com\r\n\
ATTENDEE:mailto:bob@partner.org\r\nATTENDEE:mailto:carol@partner.org\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

fn response_for(recipients: &[&str]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<schedule-response xmlns=\"urn:ietf:params:xml:ns:ischedule\">\n",
    );
    for recipient in recipients {
        xml.push_str(&format!(
            "<response><recipient>{recipient}</recipient><request-status>2.0;Success</request-status></response>\n"
        ));
    }
    xml.push_str("</schedule-response>\n");
    xml
}

fn signer(domain: &str) -> DkimSigner {
    DkimSigner::from_pem(PRIVATE_KEY, domain, "ischedule", DkimAlgorithm::RsaSha256).unwrap()
}

fn dns_verifier(signer: &DkimSigner) -> DkimVerifier {
    let resolver = StaticHostResolver::new().with_txt(
        &format!("ischedule._domainkey.{}", signer.domain()),
        &signer.public_key_record().unwrap(),
    );
    DkimVerifier::new(
        vec![Box::new(DnsTxtLookup::new(Arc::new(resolver)))],
        Arc::new(KeyCache::from_seconds(3600)),
        Duration::from_secs(5),
    )
}

fn partner_server(mock: &MockServer) -> Arc<ServerRegistry> {
    let mut server = DestinationServer::new(format!("{}/ischedule", mock.uri())).unwrap();
    server.domains = vec!["partner.org".to_string()];
    server.allow_to = true;
    Arc::new(ServerRegistry::from_servers(vec![server]))
}

fn delivery(registry: Arc<ServerRegistry>, signer: Option<DkimSigner>) -> IScheduleDelivery {
    IScheduleDelivery::new(
        DeliveryKind::ISchedule,
        Some(registry),
        Arc::new(LocalServers::empty()),
        Arc::new(MemoryDirectory::default()),
        signer.map(Arc::new),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn remote(address: &str) -> Recipient {
    let domain = address.rsplit_once('@').map_or("partner.org", |(_, domain)| domain);
    Recipient {
        address: CalendarUserAddress::new(address),
        kind: RecipientKind::RemoteDomain(domain.to_string()),
    }
}

async fn deliver(service: &IScheduleDelivery, recipients: &[&str]) -> Vec<(String, RequestStatus, Option<String>)> {
    let message = SchedulingMessage::load(REQUEST).unwrap();
    let originator = CalendarUserAddress::new("mailto:user01@example.com");
    let context = DeliveryContext {
        message: &message,
        originator: &originator,
        flavor: ErrorFlavor::CalDav,
        refresh_only: false,
    };
    let recipients: Vec<Recipient> = recipients.iter().map(|r| remote(r)).collect();
    service
        .deliver(&context, &recipients)
        .await
        .into_iter()
        .map(|o| (o.recipient, o.request_status, o.description))
        .collect()
}

fn wire_headers(request: &wiremock::Request) -> Vec<(String, String)> {
    request
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap().to_string()))
        .collect()
}

#[test_log::test(tokio::test)]
async fn signed_post_verifies_on_the_receiving_side() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(response_for(&["mailto:bob@partner.org", "mailto:carol@partner.org"])),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let signer = signer("example.com");
    let verifier = dns_verifier(&signer);
    let service = delivery(partner_server(&mock), Some(signer));

    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:carol@partner.org"]).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, status, _)| *status == RequestStatus::SUCCESS));

    let received = mock.received_requests().await.unwrap();
    let request = &received[0];
    let headers = wire_headers(request);
    let recipients: Vec<&str> = headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("recipient"))
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(recipients, vec!["mailto:bob@partner.org", "mailto:carol@partner.org"]);
    assert!(headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(DKIM_SIGNATURE_HEADER)));

    let verified = verifier
        .verify(SignedRequest {
            method: "POST",
            path: request.url.path(),
            headers: &headers,
            body: &request.body,
        })
        .await
        .unwrap();
    assert_eq!(verified.domain, "example.com");
    assert_eq!(verified.selector, "ischedule");
}

#[test_log::test(tokio::test)]
async fn permanent_redirect_is_remembered() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/moved"))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/moved"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response_for(&["mailto:bob@partner.org"])))
        .expect(2)
        .mount(&mock)
        .await;

    let registry = partner_server(&mock);
    let service = delivery(Arc::clone(&registry), None);
    for _ in 0..2 {
        let outcomes = deliver(&service, &["mailto:bob@partner.org"]).await;
        assert_eq!(outcomes[0].1, RequestStatus::SUCCESS);
    }

    let server = registry.server_for_domain("partner.org").unwrap();
    assert_eq!(server.location().path, "/moved");
}

#[test_log::test(tokio::test)]
async fn temporary_redirect_is_followed_once() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/elsewhere"))
        .expect(2)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response_for(&["mailto:bob@partner.org"])))
        .expect(2)
        .mount(&mock)
        .await;

    let registry = partner_server(&mock);
    let service = delivery(Arc::clone(&registry), None);
    for _ in 0..2 {
        let outcomes = deliver(&service, &["mailto:bob@partner.org"]).await;
        assert_eq!(outcomes[0].1, RequestStatus::SUCCESS);
    }
    assert_eq!(
        registry.server_for_domain("partner.org").unwrap().location().path,
        "/ischedule"
    );
}

#[test_log::test(tokio::test)]
async fn redirect_loop_gives_up() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/ischedule"))
        .expect(u64::try_from(MAX_REDIRECTS + 1).unwrap())
        .mount(&mock)
        .await;

    let service = delivery(partner_server(&mock), None);
    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:carol@partner.org"]).await;
    assert_eq!(outcomes.len(), 2);
    for (_, status, description) in outcomes {
        assert_eq!(status, RequestStatus::SERVICE_UNAVAILABLE);
        assert_eq!(description.as_deref(), Some("Server-to-server request failed"));
    }
}

#[test_log::test(tokio::test)]
async fn malformed_or_partial_responses() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a schedule response"))
        .up_to_n_times(1)
        .mount(&mock)
        .await;

    let service = delivery(partner_server(&mock), None);
    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:carol@partner.org"]).await;
    assert!(outcomes
        .iter()
        .all(|(_, status, _)| *status == RequestStatus::SERVICE_UNAVAILABLE));

    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response_for(&["mailto:bob@partner.org"])))
        .mount(&mock)
        .await;
    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:carol@partner.org"]).await;
    assert_eq!(outcomes[0].1, RequestStatus::SUCCESS);
    assert_eq!(outcomes[1].1, RequestStatus::SERVICE_UNAVAILABLE);
    assert_eq!(outcomes[1].2.as_deref(), Some("No response for recipient"));
}

#[test_log::test(tokio::test)]
async fn server_error_fails_the_group() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let service = delivery(partner_server(&mock), None);
    let outcomes = deliver(&service, &["mailto:bob@partner.org"]).await;
    assert_eq!(outcomes[0].1, RequestStatus::SERVICE_UNAVAILABLE);
}

#[test_log::test(tokio::test)]
async fn truncated_response_fails_the_group() {
    let mock = MockServer::start().await;
    let full = response_for(&["mailto:bob@partner.org", "mailto:carol@partner.org"]);
    let truncated = full.trim_end().trim_end_matches("</schedule-response>").to_string();
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(200).set_body_string(truncated))
        .mount(&mock)
        .await;

    let service = delivery(partner_server(&mock), None);
    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:carol@partner.org"]).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|(_, status, _)| *status == RequestStatus::SERVICE_UNAVAILABLE));
}

#[test_log::test(tokio::test)]
async fn failing_server_leaves_other_groups_alone() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&failing)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(response_for(&["mailto:dave@other.org", "mailto:erin@other.org"])),
        )
        .expect(1)
        .mount(&healthy)
        .await;

    let mut partner = DestinationServer::new(format!("{}/ischedule", failing.uri())).unwrap();
    partner.domains = vec!["partner.org".to_string()];
    partner.allow_to = true;
    let mut other = DestinationServer::new(format!("{}/ischedule", healthy.uri())).unwrap();
    other.domains = vec!["other.org".to_string()];
    other.allow_to = true;
    let registry = Arc::new(ServerRegistry::from_servers(vec![partner, other]));

    let service = delivery(registry, None);
    let outcomes = deliver(
        &service,
        &[
            "mailto:bob@partner.org",
            "mailto:dave@other.org",
            "mailto:carol@partner.org",
            "mailto:erin@other.org",
        ],
    )
    .await;

    let status = |recipient: &str| {
        outcomes
            .iter()
            .find(|(r, _, _)| r == recipient)
            .map(|(_, status, _)| status.clone())
    };
    assert_eq!(outcomes.len(), 4);
    assert_eq!(status("mailto:bob@partner.org"), Some(RequestStatus::SERVICE_UNAVAILABLE));
    assert_eq!(status("mailto:carol@partner.org"), Some(RequestStatus::SERVICE_UNAVAILABLE));
    assert_eq!(status("mailto:dave@other.org"), Some(RequestStatus::SUCCESS));
    assert_eq!(status("mailto:erin@other.org"), Some(RequestStatus::SUCCESS));
}

#[test_log::test(tokio::test)]
async fn entries_for_one_server_share_a_post() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ischedule"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(response_for(&["mailto:bob@partner.org", "mailto:dave@partner.net"])),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let entries = ["partner.org", "partner.net"].map(|domain| {
        let mut server = DestinationServer::new(format!("{}/ischedule", mock.uri())).unwrap();
        server.domains = vec![domain.to_string()];
        server.allow_to = true;
        server
    });
    let service = delivery(Arc::new(ServerRegistry::from_servers(entries.into())), None);
    let outcomes = deliver(&service, &["mailto:bob@partner.org", "mailto:dave@partner.net"]).await;
    assert!(outcomes.iter().all(|(_, status, _)| *status == RequestStatus::SUCCESS));
}

fn body() -> &'static [u8] {
    b"BEGIN:VCALENDAR\r\nMETHOD:REQUEST\r\nEND:VCALENDAR\r\n"
}

fn request_headers() -> Vec<(String, String)> {
    vec![
        ("Host".to_string(), "calendar.example.com:443".to_string()),
        ("Originator".to_string(), "mailto:bob@partner.org".to_string()),
        ("Recipient".to_string(), "mailto:user02@example.com".to_string()),
        ("Content-Type".to_string(), "text/calendar; charset=utf-8".to_string()),
    ]
}

fn http_verifier(mock: &MockServer, ttl_seconds: u64) -> DkimVerifier {
    DkimVerifier::new(
        vec![Box::new(
            HttpWellKnownLookup::new(Some(mock.uri()), Duration::from_secs(5)).unwrap(),
        )],
        Arc::new(KeyCache::from_seconds(ttl_seconds)),
        Duration::from_secs(5),
    )
}

#[test_log::test(tokio::test)]
async fn well_known_key_is_fetched_once() {
    let signer = signer("partner.org").with_key_methods(vec![KeyLookupMethod::HttpWellKnown]);
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/domainkey/partner.org/ischedule"))
        .respond_with(ResponseTemplate::new(200).set_body_string(signer.public_key_record().unwrap()))
        .expect(1)
        .mount(&mock)
        .await;

    let verifier = http_verifier(&mock, 3600);
    let mut headers = request_headers();
    let signature = signer
        .sign("POST", "/ischedule", &headers, &["Host", "Recipient+"], body())
        .unwrap();
    headers.push((DKIM_SIGNATURE_HEADER.to_string(), signature));

    for _ in 0..2 {
        let verified = verifier
            .verify(SignedRequest {
                method: "POST",
                path: "/ischedule",
                headers: &headers,
                body: body(),
            })
            .await
            .unwrap();
        assert_eq!(verified.domain, "partner.org");
    }
    assert_eq!(verifier.cache().len(), 1);
}

#[test_log::test(tokio::test)]
async fn expired_signature_never_fetches_a_key() {
    let signer = signer("partner.org")
        .with_key_methods(vec![KeyLookupMethod::HttpWellKnown])
        .with_expiration(60);
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(signer.public_key_record().unwrap()))
        .expect(0)
        .mount(&mock)
        .await;

    let mut headers = request_headers();
    let an_hour_ago = chrono::Utc::now().timestamp() - 3600;
    let signature = signer
        .sign_at(an_hour_ago, "POST", "/ischedule", &headers, &["Host"], body())
        .unwrap();
    headers.push((DKIM_SIGNATURE_HEADER.to_string(), signature));

    let err = http_verifier(&mock, 3600)
        .verify(SignedRequest {
            method: "POST",
            path: "/ischedule",
            headers: &headers,
            body: body(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DkimError::Expired { .. }));
}

fn principal(uid: &str) -> Principal {
    Principal {
        uid: uid.to_string(),
        display_name: None,
        addresses: vec![CalendarUserAddress::new(format!("mailto:{uid}@example.com"))],
        hosting: Hosting::ThisServer,
        inbox: Some(format!("/calendars/__uids__/{uid}/inbox/")),
    }
}

/// A receiving server that trusts partner.org through its DKIM key.
fn receiving_scheduler(mailbox: Arc<MemoryMailbox>) -> Scheduler {
    let mut settings = Settings::default();
    settings.scheduling.local_email_domains = vec!["example.com".to_string()];
    settings.ischedule.enabled = true;

    let mut directory = MemoryDirectory::default();
    directory.insert(principal("user01"));
    directory.insert(principal("user02"));

    let partner = signer("partner.org");
    let resolver = Arc::new(StaticHostResolver::new().with_txt(
        "ischedule._domainkey.partner.org",
        &partner.public_key_record().unwrap(),
    ));
    let policy = ISchedulePolicy::new(
        Some(Arc::new(dns_verifier(&partner))),
        true,
        Some(Arc::new(ServerRegistry::empty())),
        Arc::new(LocalServers::empty()),
        resolver,
    );

    Scheduler::new(
        Arc::new(directory),
        Arc::new(AddressClassifier::new(&settings, None).unwrap()),
        UidLocks::new(Duration::from_secs(1), Duration::from_secs(60)),
    )
    .with_delivery(Arc::new(CalDavDelivery::new(mailbox)))
    .with_ischedule_policy(Arc::new(policy))
}

fn inbound(organizer: &str) -> ScheduleRequest {
    let body = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Partner//EN\r\nMETHOD:REQUEST\r\n\
BEGIN:VEVENT\r\nUID:partner-event\r\nDTSTAMP:20240101T000000Z\r\nDTSTART:20240102T100000Z\r\n\
ORGANIZER:{organizer}\r\nATTENDEE:mailto:bob@partner.org\r\n\
ATTENDEE:mailto:user02@example.com\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    );
    let mut headers = vec![
        ("Host".to_string(), "calendar.example.com:443".to_string()),
        ("Originator".to_string(), "mailto:bob@partner.org".to_string()),
        ("Recipient".to_string(), "mailto:user02@example.com".to_string()),
        ("Content-Type".to_string(), "text/calendar; charset=utf-8".to_string()),
    ];
    let signature = signer("partner.org")
        .sign("POST", "/ischedule", &headers, &["Host", "Recipient+"], body.as_bytes())
        .unwrap();
    headers.push((DKIM_SIGNATURE_HEADER.to_string(), signature));

    ScheduleRequest::new(
        RequestOrigin::ISchedule(InboundRequest {
            peer: "192.0.2.10".parse().unwrap(),
            method: "POST".to_string(),
            path: "/ischedule".to_string(),
            headers,
            authenticated: false,
        }),
        body,
    )
    .with_originator(CalendarUserAddress::new("mailto:bob@partner.org"))
    .with_recipients(vec![CalendarUserAddress::new("mailto:user02@example.com")])
}

#[test_log::test(tokio::test)]
async fn signed_partner_request_is_delivered() {
    let mailbox = Arc::new(MemoryMailbox::new());
    let scheduler = receiving_scheduler(Arc::clone(&mailbox));

    let response = scheduler.schedule(inbound("mailto:bob@partner.org")).await.unwrap();
    assert_eq!(response.flavor, ErrorFlavor::ISchedule);
    assert_eq!(response.outcomes.len(), 1);
    assert_eq!(response.outcomes[0].request_status, RequestStatus::DELIVERED);
    assert_eq!(mailbox.delivered_to("user02").len(), 1);
}

#[test_log::test(tokio::test)]
async fn spoofed_local_organizer_is_refused() {
    let mailbox = Arc::new(MemoryMailbox::new());
    let scheduler = receiving_scheduler(Arc::clone(&mailbox));

    let err = scheduler
        .schedule(inbound("mailto:user01@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::OrganizerDenied("Organizer is not local to server")));
    let xml = err.to_xml(ErrorFlavor::ISchedule).unwrap().unwrap();
    assert!(xml.contains("organizer-denied"));
    assert!(mailbox.delivered().is_empty());
}

#[test_log::test(tokio::test)]
async fn tampered_body_fails_verification() {
    let scheduler = receiving_scheduler(Arc::new(MemoryMailbox::new()));
    let mut request = inbound("mailto:bob@partner.org");
    request.body = request.body.replace("DTSTART:20240102", "DTSTART:20240103");

    let err = scheduler.schedule(request).await.unwrap_err();
    assert!(matches!(err, SchedulingError::VerificationFailed(_)));
    assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
}
