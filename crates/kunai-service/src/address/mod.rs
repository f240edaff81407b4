//! Classification of calendar-user addresses into delivery routes.

use std::sync::Arc;

use kunai_core::config::{DeploymentMode, Settings};
use kunai_core::types::{AddressScheme, CalendarUserAddress};
use regex::Regex;

use crate::directory::{Hosting, Principal};
use crate::error::ServiceResult;
use crate::registry::ServerRegistry;

/// How a recipient must be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientKind {
    /// Hosted on this server with a schedule inbox.
    Local(Principal),
    /// Hosted on another partition of a partitioned deployment.
    Partitioned(Principal),
    /// Hosted on another pod of a multi-pod deployment.
    OtherFederationNode(Principal),
    /// A user of another organization reached over iSchedule.
    RemoteDomain(String),
    /// Reached through the email gateway.
    Email(String),
    Invalid,
}

/// Which delivery service handles a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    CalDav,
    /// Same-deployment iSchedule to partitions and pods.
    Federation,
    ISchedule,
    Imip,
}

/// A classified recipient; keeps the address as requested for correlating
/// its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: CalendarUserAddress,
    pub kind: RecipientKind,
}

impl Recipient {
    #[must_use]
    pub fn delivery_kind(&self) -> Option<DeliveryKind> {
        match self.kind {
            RecipientKind::Local(_) => Some(DeliveryKind::CalDav),
            RecipientKind::Partitioned(_) | RecipientKind::OtherFederationNode(_) => {
                Some(DeliveryKind::Federation)
            }
            RecipientKind::RemoteDomain(_) => Some(DeliveryKind::ISchedule),
            RecipientKind::Email(_) => Some(DeliveryKind::Imip),
            RecipientKind::Invalid => None,
        }
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match &self.kind {
            RecipientKind::Local(p)
            | RecipientKind::Partitioned(p)
            | RecipientKind::OtherFederationNode(p) => Some(p),
            _ => None,
        }
    }
}

/// Decides the route of an address from its resolved principal and the
/// routing configuration.
///
/// Classification reads the configuration and the server registry only, so
/// the same address and principal always give the same answer while the
/// registry file is unchanged.
#[derive(Debug)]
pub struct AddressClassifier {
    mode: DeploymentMode,
    local_email_domains: Vec<String>,
    local_http_domains: Vec<String>,
    ischedule_enabled: bool,
    ischedule_patterns: Vec<Regex>,
    imip_enabled: bool,
    imip_patterns: Vec<Regex>,
    registry: Option<Arc<ServerRegistry>>,
}

impl AddressClassifier {
    /// ## Errors
    /// Returns an error if a configured address pattern is not a valid
    /// regular expression.
    pub fn new(settings: &Settings, registry: Option<Arc<ServerRegistry>>) -> ServiceResult<Self> {
        let compile = |patterns: &[String]| -> ServiceResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(Into::into))
                .collect()
        };

        Ok(Self {
            mode: settings.federation.mode,
            local_email_domains: lowercase_all(&settings.scheduling.local_email_domains),
            local_http_domains: lowercase_all(&settings.scheduling.local_http_domains),
            ischedule_enabled: settings.ischedule.enabled,
            ischedule_patterns: compile(&settings.ischedule.address_patterns)?,
            imip_enabled: settings.imip.enabled,
            imip_patterns: compile(&settings.imip.address_patterns)?,
            registry,
        })
    }

    /// Returns whether the address belongs to a domain served by this
    /// deployment.
    #[must_use]
    pub fn is_in_my_domain(&self, address: &CalendarUserAddress) -> bool {
        match address.scheme() {
            AddressScheme::Mailto => address.mailto_domain().is_some_and(|d| {
                self.local_email_domains.iter().any(|local| local == d)
            }),
            AddressScheme::Http => address.http_host().is_some_and(|h| {
                let h = h.to_ascii_lowercase();
                self.local_http_domains.iter().any(|local| *local == h)
            }),
            AddressScheme::Urn | AddressScheme::Path => true,
            AddressScheme::Other => false,
        }
    }

    /// Classifies a recipient.
    ///
    /// ## Summary
    /// A resolved principal hosted here is `Local` when it has an inbox. One
    /// hosted elsewhere in the deployment is `Partitioned` or
    /// `OtherFederationNode` depending on the deployment mode. Without a
    /// principal, addresses in a local domain are `Invalid`; others go to
    /// iSchedule when the registry knows the domain or an iSchedule pattern
    /// matches, then to email when an iMIP pattern matches.
    #[must_use]
    pub fn classify(
        &self,
        address: &CalendarUserAddress,
        principal: Option<Principal>,
    ) -> Recipient {
        let kind = match principal {
            Some(principal) => self.classify_principal(principal),
            None => self.classify_external(address),
        };
        if kind == RecipientKind::Invalid {
            tracing::debug!(recipient = %address, "Recipient classified as invalid");
        }
        Recipient {
            address: address.clone(),
            kind,
        }
    }

    fn classify_principal(&self, principal: Principal) -> RecipientKind {
        if !principal.calendars_enabled() {
            return RecipientKind::Invalid;
        }
        match (&principal.hosting, self.mode) {
            (Hosting::ThisServer, _) => RecipientKind::Local(principal),
            (Hosting::OtherServer(_), DeploymentMode::Partitioned) => {
                RecipientKind::Partitioned(principal)
            }
            (Hosting::OtherServer(_), DeploymentMode::Pods) => {
                RecipientKind::OtherFederationNode(principal)
            }
            (Hosting::OtherServer(_), DeploymentMode::Standalone) => RecipientKind::Invalid,
        }
    }

    fn classify_external(&self, address: &CalendarUserAddress) -> RecipientKind {
        if self.is_in_my_domain(address) {
            return RecipientKind::Invalid;
        }

        if self.ischedule_enabled
            && let Some(domain) = address.domain()
        {
            let registered = self
                .registry
                .as_ref()
                .is_some_and(|r| r.server_for_domain(domain).is_some());
            if registered || matches_any(&self.ischedule_patterns, address) {
                return RecipientKind::RemoteDomain(domain.to_string());
            }
        }

        if self.imip_enabled
            && matches_any(&self.imip_patterns, address)
            && let Some(email) = address.email()
        {
            return RecipientKind::Email(email.to_string());
        }

        RecipientKind::Invalid
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_ascii_lowercase()).collect()
}

fn matches_any(patterns: &[Regex], address: &CalendarUserAddress) -> bool {
    patterns
        .iter()
        .any(|p| p.is_match(address.as_str()) || p.is_match(address.normalized()))
}
