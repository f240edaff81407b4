//! Collaborators the scheduler consumes: principal lookup, inbox delivery
//! and the outbound mail gateway.
//!
//! Only the narrow interfaces are defined here. `memory` provides the
//! configuration-backed implementations the binary runs with, `gateway` the
//! HTTP mail gateway client.

mod gateway;
mod memory;

use async_trait::async_trait;
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::itip::SchedulingMessage;

use crate::error::ServiceResult;

pub use gateway::HttpMailGateway;
pub use memory::{BusyPeriod, DeliveredMessage, MemoryDirectory, MemoryMailbox};

/// Where a principal's calendar data lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Hosting {
    /// This server.
    ThisServer,
    /// Another server of the same deployment, by server id.
    OtherServer(String),
}

/// A calendar user known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    pub display_name: Option<String>,
    /// Canonical addresses, preferred first.
    pub addresses: Vec<CalendarUserAddress>,
    pub hosting: Hosting,
    /// Schedule inbox reference; `None` when calendaring is disabled.
    pub inbox: Option<String>,
}

impl Principal {
    #[must_use]
    pub fn is_locally_hosted(&self) -> bool {
        self.hosting == Hosting::ThisServer
    }

    /// Id of the other server hosting this principal.
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        match &self.hosting {
            Hosting::ThisServer => None,
            Hosting::OtherServer(id) => Some(id),
        }
    }

    #[must_use]
    pub fn calendars_enabled(&self) -> bool {
        self.inbox.is_some()
    }

    /// The address other servers should see for this principal.
    ///
    /// Prefers `mailto:`, then URL forms, then whatever comes first.
    #[must_use]
    pub fn display_address(&self) -> Option<&CalendarUserAddress> {
        use kunai_core::types::AddressScheme;

        self.addresses
            .iter()
            .find(|a| a.scheme() == AddressScheme::Mailto)
            .or_else(|| {
                self.addresses
                    .iter()
                    .find(|a| a.scheme() == AddressScheme::Http)
            })
            .or_else(|| self.addresses.first())
    }
}

/// Resolves calendar-user addresses to principals.
#[async_trait]
pub trait Directory: Send + Sync {
    /// ## Errors
    /// Returns an error if the directory backend fails. An unknown address
    /// is `Ok(None)`.
    async fn resolve_principal(
        &self,
        address: &CalendarUserAddress,
    ) -> ServiceResult<Option<Principal>>;
}

/// The in-process inbox store of locally hosted principals.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Stores a scheduling message in the principal's inbox.
    ///
    /// ## Errors
    /// Returns an error if the inbox refuses the message.
    async fn deliver(
        &self,
        principal: &Principal,
        originator: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<()>;

    /// Answers a free-busy request for the principal with a VFREEBUSY REPLY
    /// calendar.
    ///
    /// ## Errors
    /// Returns an error if the principal's calendars cannot be read.
    async fn free_busy(
        &self,
        principal: &Principal,
        recipient: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<String>;
}

/// Hands scheduling messages to an email gateway.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// ## Errors
    /// Returns an error if the gateway does not accept the message.
    async fn send(
        &self,
        originator: &CalendarUserAddress,
        recipient: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_address_prefers_mailto() {
        let principal = Principal {
            uid: "user01".to_string(),
            display_name: None,
            addresses: vec![
                CalendarUserAddress::new("urn:uuid:user01"),
                CalendarUserAddress::new("https://cal.example.com/principals/user01"),
                CalendarUserAddress::new("mailto:user01@example.com"),
            ],
            hosting: Hosting::OtherServer("B".to_string()),
            inbox: None,
        };
        assert_eq!(
            principal.display_address().map(CalendarUserAddress::as_str),
            Some("mailto:user01@example.com")
        );
        assert_eq!(principal.server_id(), Some("B"));
        assert!(!principal.is_locally_hosted());
        assert!(!principal.calendars_enabled());
    }
}
