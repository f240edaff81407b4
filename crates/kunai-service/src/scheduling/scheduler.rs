use std::collections::HashMap;
use std::sync::Arc;

use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::ischedule::{ErrorFlavor, RequestStatus, ScheduleCondition};
use kunai_rfc::rfc::itip::SchedulingMessage;

use super::accounting::{Accounting, AccountingKind};
use super::aggregator::{ResponseAggregator, ScheduleResponse};
use super::error::{SchedulingError, SchedulingResult};
use super::lock::{UidLease, UidLocks};
use super::policy::{CalDavPolicy, Party, PolicyInput, RequestOrigin, SchedulingPolicy};
use crate::address::{AddressClassifier, DeliveryKind, Recipient, RecipientKind};
use crate::delivery::{DeliveryContext, DeliveryService};
use crate::directory::Directory;

/// Steps of a scheduling transaction, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Authorize,
    LoadMessage,
    ResolveOriginator,
    ResolveRecipients,
    ValidateOrganizer,
    SecurityCheck,
    Accounting,
    Dispatch,
    Aggregate,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::LoadMessage => "load-message",
            Self::ResolveOriginator => "resolve-originator",
            Self::ResolveRecipients => "resolve-recipients",
            Self::ValidateOrganizer => "validate-organizer",
            Self::SecurityCheck => "security-check",
            Self::Accounting => "accounting",
            Self::Dispatch => "dispatch",
            Self::Aggregate => "aggregate",
        }
    }
}

/// One scheduling request.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub origin: RequestOrigin,
    /// The `Originator` header; the message's sender when absent.
    pub originator: Option<CalendarUserAddress>,
    /// The `Recipient` headers, in request order.
    pub recipients: Vec<CalendarUserAddress>,
    pub body: String,
    /// Peers should only refresh their copy.
    pub refresh_only: bool,
    /// Skip delivery outside this deployment.
    pub suppress_refresh: bool,
}

impl ScheduleRequest {
    #[must_use]
    pub fn new(origin: RequestOrigin, body: impl Into<String>) -> Self {
        Self {
            origin,
            originator: None,
            recipients: Vec::new(),
            body: body.into(),
            refresh_only: false,
            suppress_refresh: false,
        }
    }

    #[must_use]
    pub fn with_originator(mut self, originator: CalendarUserAddress) -> Self {
        self.originator = Some(originator);
        self
    }

    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<CalendarUserAddress>) -> Self {
        self.recipients = recipients;
        self
    }
}

#[derive(Debug)]
struct Transaction {
    step: Step,
}

impl Transaction {
    fn enter(&mut self, step: Step) {
        tracing::trace!(step = step.as_str(), "Scheduling step");
        self.step = step;
    }
}

/// Validates, authorizes and routes scheduling messages.
///
/// ## Summary
/// Every request runs the same steps. The policy of the request's channel
/// decides who may send what, the [`AddressClassifier`] decides how each
/// recipient is reached, and one [`DeliveryService`] per delivery kind
/// produces the recipients' outcomes. Messages generated by this server
/// ([`RequestOrigin::Internal`]) skip the authorization steps.
pub struct Scheduler {
    directory: Arc<dyn Directory>,
    classifier: Arc<AddressClassifier>,
    deliveries: HashMap<DeliveryKind, Arc<dyn DeliveryService>>,
    caldav: Arc<dyn SchedulingPolicy>,
    ischedule: Option<Arc<dyn SchedulingPolicy>>,
    imip: Option<Arc<dyn SchedulingPolicy>>,
    locks: Arc<UidLocks>,
    accounting: Option<Accounting>,
    limit_freebusy_attendees: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        directory: Arc<dyn Directory>,
        classifier: Arc<AddressClassifier>,
        locks: Arc<UidLocks>,
    ) -> Self {
        Self {
            directory,
            classifier,
            deliveries: HashMap::new(),
            caldav: Arc::new(CalDavPolicy),
            ischedule: None,
            imip: None,
            locks,
            accounting: None,
            limit_freebusy_attendees: 0,
        }
    }

    #[must_use]
    pub fn with_delivery(mut self, service: Arc<dyn DeliveryService>) -> Self {
        self.deliveries.insert(service.kind(), service);
        self
    }

    #[must_use]
    pub fn with_ischedule_policy(mut self, policy: Arc<dyn SchedulingPolicy>) -> Self {
        self.ischedule = Some(policy);
        self
    }

    #[must_use]
    pub fn with_imip_policy(mut self, policy: Arc<dyn SchedulingPolicy>) -> Self {
        self.imip = Some(policy);
        self
    }

    #[must_use]
    pub fn with_accounting(mut self, accounting: Option<Accounting>) -> Self {
        self.accounting = accounting;
        self
    }

    /// Free-busy recipients past `limit` are refused; 0 disables the limit.
    #[must_use]
    pub fn with_freebusy_limit(mut self, limit: usize) -> Self {
        self.limit_freebusy_attendees = limit;
        self
    }

    /// Error namespace used for a request arriving on `origin`.
    #[must_use]
    pub fn flavor_for(&self, origin: &RequestOrigin) -> ErrorFlavor {
        match origin {
            RequestOrigin::ISchedule(_) => ErrorFlavor::ISchedule,
            _ => ErrorFlavor::CalDav,
        }
    }

    fn policy_for(&self, origin: &RequestOrigin) -> SchedulingResult<Option<&dyn SchedulingPolicy>> {
        let policy = match origin {
            RequestOrigin::CalDav { .. } => Some(self.caldav.as_ref()),
            RequestOrigin::ISchedule(_) => Some(self.ischedule.as_deref().ok_or(
                SchedulingError::OriginatorDenied("iSchedule is not enabled on this server"),
            )?),
            RequestOrigin::Imip { .. } => Some(self.imip.as_deref().ok_or(
                SchedulingError::OriginatorDenied("iMIP is not enabled on this server"),
            )?),
            RequestOrigin::Internal => None,
        };
        Ok(policy)
    }

    /// Runs one scheduling transaction.
    ///
    /// ## Errors
    /// Returns the failure that aborted the transaction. Failures of single
    /// recipients are outcomes in the response instead.
    #[tracing::instrument(skip_all, fields(origin = request.origin.name(), recipients = request.recipients.len()))]
    pub async fn schedule(&self, request: ScheduleRequest) -> SchedulingResult<ScheduleResponse> {
        let mut transaction = Transaction {
            step: Step::Authorize,
        };
        let result = self.run(&request, &mut transaction).await;
        match &result {
            Ok(response) => {
                tracing::debug!(outcomes = response.outcomes.len(), "Scheduling transaction complete");
            }
            Err(e) => {
                tracing::warn!(step = transaction.step.as_str(), error = %e, "Scheduling transaction failed");
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ScheduleRequest,
        transaction: &mut Transaction,
    ) -> SchedulingResult<ScheduleResponse> {
        let Some(policy) = self.policy_for(&request.origin)? else {
            return self.run_direct(request, transaction).await;
        };

        transaction.enter(Step::Authorize);
        let signature = policy
            .check_authorization(&request.origin, &request.body)
            .await?;

        transaction.enter(Step::LoadMessage);
        let message = load_message(&request.body)?;
        let _lease = self.lock(&message).await?;

        transaction.enter(Step::ResolveOriginator);
        let originator_address = request
            .originator
            .clone()
            .or_else(|| message.sender().cloned())
            .ok_or(SchedulingError::OriginatorMissing("Missing originator"))?;
        if request.recipients.is_empty() {
            return Err(SchedulingError::RecipientMissing("Missing recipient"));
        }
        let originator = self.party(&originator_address).await?;
        let organizer = match message.organizer() {
            Some(address) => Some(self.party(address).await?),
            None => None,
        };
        let attendee = match message.replying_attendee() {
            Some(address) if message.method().is_reply_class() => Some(self.party(address).await?),
            _ => None,
        };
        let input = PolicyInput {
            origin: &request.origin,
            message: &message,
            originator: &originator,
            organizer: organizer.as_ref(),
            attendee: attendee.as_ref(),
            signature: signature.as_ref(),
        };
        policy.check_originator(input).await?;

        transaction.enter(Step::ResolveRecipients);
        let recipients = self
            .resolve_recipients(&request.recipients, policy.allows_relay())
            .await?;

        transaction.enter(Step::ValidateOrganizer);
        policy.check_organizer_or_attendee(input).await?;

        transaction.enter(Step::SecurityCheck);
        policy.check_security(input).await?;

        transaction.enter(Step::Accounting);
        if let Some(organizer) = &organizer {
            self.account(&message, &originator_address, organizer, &request.recipients)
                .await;
        }

        transaction.enter(Step::Dispatch);
        let context = DeliveryContext {
            message: &message,
            originator: &originator_address,
            flavor: policy.flavor(),
            refresh_only: request.refresh_only,
        };
        let aggregator = self
            .dispatch(&context, recipients, request.suppress_refresh)
            .await;

        transaction.enter(Step::Aggregate);
        Ok(aggregator.finish(&request_order(&request.recipients)))
    }

    /// Messages generated by this server: already authorized by whoever
    /// generated them, so only loading, routing and delivery remain.
    async fn run_direct(
        &self,
        request: &ScheduleRequest,
        transaction: &mut Transaction,
    ) -> SchedulingResult<ScheduleResponse> {
        transaction.enter(Step::LoadMessage);
        let message = load_message(&request.body)?;
        let originator = request
            .originator
            .clone()
            .or_else(|| message.sender().cloned())
            .ok_or(SchedulingError::OriginatorMissing("Missing originator"))?;

        let addresses = if request.recipients.is_empty() {
            message
                .attendees()
                .iter()
                .filter(|a| **a != originator)
                .cloned()
                .collect()
        } else {
            request.recipients.clone()
        };

        transaction.enter(Step::ResolveRecipients);
        let recipients = self.resolve_recipients(&addresses, true).await?;

        transaction.enter(Step::Dispatch);
        let context = DeliveryContext {
            message: &message,
            originator: &originator,
            flavor: ErrorFlavor::CalDav,
            refresh_only: request.refresh_only,
        };
        let aggregator = self
            .dispatch(&context, recipients, request.suppress_refresh)
            .await;

        transaction.enter(Step::Aggregate);
        Ok(aggregator.finish(&request_order(&addresses)))
    }

    async fn lock(&self, message: &SchedulingMessage) -> SchedulingResult<Option<UidLease>> {
        if message.is_freebusy() {
            return Ok(None);
        }
        match message.uid() {
            Some(uid) => self.locks.acquire(uid).await.map(Some),
            None => Ok(None),
        }
    }

    async fn party(&self, address: &CalendarUserAddress) -> SchedulingResult<Party> {
        let principal = self.directory.resolve_principal(address).await?;
        Ok(Party {
            address: address.clone(),
            principal,
            in_my_domain: self.classifier.is_in_my_domain(address),
        })
    }

    async fn resolve_recipients(
        &self,
        addresses: &[CalendarUserAddress],
        allow_relay: bool,
    ) -> SchedulingResult<Vec<Recipient>> {
        let mut recipients = Vec::with_capacity(addresses.len());
        for address in addresses {
            let principal = self.directory.resolve_principal(address).await?;
            let mut recipient = self.classifier.classify(address, principal);
            if !allow_relay && recipient.principal().is_none() {
                tracing::debug!(recipient = %address, "Refusing to relay to a recipient outside this deployment");
                recipient.kind = RecipientKind::Invalid;
            }
            recipients.push(recipient);
        }
        Ok(recipients)
    }

    /// Records the message against a local organizer. Failures are logged
    /// and do not affect the transaction.
    async fn account(
        &self,
        message: &SchedulingMessage,
        originator: &CalendarUserAddress,
        organizer: &Party,
        recipients: &[CalendarUserAddress],
    ) {
        let Some(accounting) = &self.accounting else {
            return;
        };
        let Some(principal) = organizer.principal.as_ref().filter(|_| organizer.is_local()) else {
            return;
        };
        let kind = if message.is_freebusy() {
            AccountingKind::ItipFreeBusy
        } else {
            AccountingKind::Itip
        };
        if let Err(e) = accounting
            .record(
                kind,
                &principal.uid,
                originator,
                recipients,
                message.method().as_str(),
                &message.to_ical_string(),
            )
            .await
        {
            tracing::error!(organizer = %principal.uid, error = %e, "Could not write accounting record");
        }
    }

    /// Hands every recipient to its delivery service.
    ///
    /// ## Summary
    /// Free-busy recipients past the configured limit and recipients that
    /// cannot be reached get their outcome here. Local recipients are
    /// delivered first, then other servers of this deployment, then other
    /// organizations and email unless the request suppresses them.
    #[tracing::instrument(skip_all, fields(recipients = recipients.len()))]
    async fn dispatch(
        &self,
        context: &DeliveryContext<'_>,
        recipients: Vec<Recipient>,
        suppress_refresh: bool,
    ) -> ResponseAggregator {
        let mut aggregator = ResponseAggregator::new(context.flavor);
        let limit = self.limit_freebusy_attendees;
        let mut groups: HashMap<DeliveryKind, Vec<Recipient>> = HashMap::new();

        for (index, recipient) in recipients.into_iter().enumerate() {
            if context.is_freebusy() && limit > 0 && index >= limit {
                aggregator.add(context.failure(
                    &recipient.address,
                    RequestStatus::SERVICE_UNAVAILABLE,
                    ScheduleCondition::MaxRecipients,
                    "Too many attendees",
                ));
                continue;
            }
            match recipient.delivery_kind() {
                Some(kind) => groups.entry(kind).or_default().push(recipient),
                None => aggregator.add(context.failure(
                    &recipient.address,
                    RequestStatus::INVALID_CALENDAR_USER,
                    ScheduleCondition::RecipientInvalid,
                    "Unknown recipient",
                )),
            }
        }

        for kind in [
            DeliveryKind::CalDav,
            DeliveryKind::Federation,
            DeliveryKind::ISchedule,
            DeliveryKind::Imip,
        ] {
            let Some(batch) = groups.remove(&kind) else {
                continue;
            };
            let external = matches!(kind, DeliveryKind::ISchedule | DeliveryKind::Imip);
            if external && suppress_refresh {
                tracing::debug!(recipients = batch.len(), ?kind, "Skipping external delivery of suppressed refresh");
                continue;
            }

            let Some(service) = self.deliveries.get(&kind) else {
                tracing::warn!(?kind, "No delivery service configured");
                aggregator.extend(batch.iter().map(|r| {
                    context.failure(
                        &r.address,
                        RequestStatus::NO_USER_SUPPORT,
                        ScheduleCondition::RecipientFailed,
                        "No scheduling support for user",
                    )
                }));
                continue;
            };

            let scoped = DeliveryContext {
                refresh_only: context.refresh_only && kind == DeliveryKind::Federation,
                ..*context
            };
            aggregator.extend(service.deliver(&scoped, &batch).await);
        }

        aggregator
    }
}

fn load_message(body: &str) -> SchedulingResult<SchedulingMessage> {
    let message = SchedulingMessage::load(body)?;
    if message.method().is_reply_class() && message.attendees().len() != 1 {
        return Err(SchedulingError::InvalidSchedulingMessage(
            "Wrong number of attendees".to_string(),
        ));
    }
    Ok(message)
}

fn request_order(addresses: &[CalendarUserAddress]) -> Vec<String> {
    addresses.iter().map(|a| a.as_str().to_string()).collect()
}
