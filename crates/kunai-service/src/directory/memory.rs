//! Configuration-backed directory and an in-memory inbox store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kunai_core::config::DirectoryConfig;
use kunai_core::constants::{ICAL_UTC_FORMAT, PRODID};
use kunai_core::types::CalendarUserAddress;
use kunai_rfc::rfc::ical::{Component, ComponentKind, ICalendar, Property, serialize};
use kunai_rfc::rfc::itip::{ITipMethod, SchedulingMessage};
use parking_lot::Mutex;

use super::{Directory, Hosting, Mailbox, Principal};
use crate::error::{ServiceError, ServiceResult};

/// Directory answering from the `directory.principals` configuration.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    by_address: HashMap<CalendarUserAddress, Principal>,
}

impl MemoryDirectory {
    /// Builds the directory, treating principals without a server id, or
    /// with `this_server_id`, as hosted here.
    #[must_use]
    pub fn from_config(config: &DirectoryConfig, this_server_id: Option<&str>) -> Self {
        let mut directory = Self::default();
        for entry in &config.principals {
            let hosting = match entry.server_id.as_deref() {
                None => Hosting::ThisServer,
                Some(id) if Some(id) == this_server_id => Hosting::ThisServer,
                Some(id) => Hosting::OtherServer(id.to_string()),
            };
            directory.insert(Principal {
                uid: entry.uid.clone(),
                display_name: entry.display_name.clone(),
                addresses: entry
                    .addresses
                    .iter()
                    .map(|a| CalendarUserAddress::new(a.as_str()))
                    .collect(),
                hosting,
                inbox: entry
                    .calendars_enabled
                    .then(|| format!("/calendars/__uids__/{}/inbox/", entry.uid)),
            });
        }
        tracing::debug!(principals = config.principals.len(), "Loaded directory");
        directory
    }

    /// Adds a principal under each of its addresses.
    pub fn insert(&mut self, principal: Principal) {
        for address in &principal.addresses {
            self.by_address.insert(address.clone(), principal.clone());
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn resolve_principal(
        &self,
        address: &CalendarUserAddress,
    ) -> ServiceResult<Option<Principal>> {
        Ok(self.by_address.get(address).cloned())
    }
}

/// A message stored in a local inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub principal_uid: String,
    pub originator: String,
    pub method: ITipMethod,
    pub uid: Option<String>,
    pub calendar: String,
}

/// A busy block on a principal's calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyPeriod {
    /// UID of the event occupying the time.
    pub event_uid: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inbox store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    delivered: Mutex<Vec<DeliveredMessage>>,
    busy: Mutex<HashMap<String, Vec<BusyPeriod>>>,
    refused: Mutex<HashSet<String>>,
}

impl MemoryMailbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_busy(&self, principal_uid: &str, period: BusyPeriod) {
        self.busy
            .lock()
            .entry(principal_uid.to_string())
            .or_default()
            .push(period);
    }

    /// Makes the principal's inbox reject every delivery.
    pub fn refuse(&self, principal_uid: &str) {
        self.refused.lock().insert(principal_uid.to_string());
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.delivered.lock().clone()
    }

    #[must_use]
    pub fn delivered_to(&self, principal_uid: &str) -> Vec<DeliveredMessage> {
        self.delivered
            .lock()
            .iter()
            .filter(|m| m.principal_uid == principal_uid)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn deliver(
        &self,
        principal: &Principal,
        originator: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<()> {
        if self.refused.lock().contains(&principal.uid) {
            return Err(ServiceError::DeliveryFailed(format!(
                "inbox of {} refused the message",
                principal.uid
            )));
        }

        self.delivered.lock().push(DeliveredMessage {
            principal_uid: principal.uid.clone(),
            originator: originator.to_string(),
            method: message.method(),
            uid: message.uid().map(str::to_string),
            calendar: message.to_ical_string(),
        });
        Ok(())
    }

    async fn free_busy(
        &self,
        principal: &Principal,
        recipient: &CalendarUserAddress,
        message: &SchedulingMessage,
    ) -> ServiceResult<String> {
        let range = message.freebusy_range().ok_or(ServiceError::InvariantViolation(
            "free-busy answer requested for a message without a range",
        ))?;

        let mut component = Component::new(ComponentKind::FreeBusy);
        component.add_property(Property::new(
            "DTSTAMP",
            Utc::now().format(ICAL_UTC_FORMAT).to_string(),
        ));
        component.add_property(Property::new(
            "DTSTART",
            range.start.format(ICAL_UTC_FORMAT).to_string(),
        ));
        component.add_property(Property::new(
            "DTEND",
            range.end.format(ICAL_UTC_FORMAT).to_string(),
        ));
        if let Some(uid) = message.uid() {
            component.add_property(Property::new("UID", uid));
        }
        if let Some(organizer) = message.organizer() {
            component.add_property(Property::new("ORGANIZER", organizer.as_str()));
        }
        component.add_property(Property::new("ATTENDEE", recipient.as_str()));

        let busy = self.busy.lock();
        for period in busy.get(&principal.uid).into_iter().flatten() {
            if message.mask_uid() == Some(period.event_uid.as_str()) {
                continue;
            }
            if period.end <= range.start || period.start >= range.end {
                continue;
            }
            let start = period.start.max(range.start);
            let end = period.end.min(range.end);
            component.add_property(
                Property::new(
                    "FREEBUSY",
                    format!(
                        "{}/{}",
                        start.format(ICAL_UTC_FORMAT),
                        end.format(ICAL_UTC_FORMAT)
                    ),
                )
                .with_param("FBTYPE", "BUSY"),
            );
        }

        let mut calendar = ICalendar::new(PRODID);
        calendar.root.add_property(Property::new("METHOD", "REPLY"));
        calendar.root.add_child(component);
        Ok(serialize(&calendar))
    }
}
