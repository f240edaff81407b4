//! Scheduling message model.

use chrono::{DateTime, Utc};
use kunai_core::types::CalendarUserAddress;

use super::error::{ITipError, ITipResult};
use super::method::ITipMethod;
use crate::rfc::ical::core::{ComponentKind, ICalendar};
use crate::rfc::ical::parse::{parse, parse_utc_datetime};
use crate::rfc::ical::serialize;

/// Free-busy request component property naming an event to leave out.
pub const MASK_UID_PROPERTY: &str = "X-CALENDARSERVER-MASK-UID";

/// Calendar property that marks private data; it must never travel in a
/// scheduling message.
pub const PRIVATE_ACCESS_PROPERTY: &str = "X-CALENDARSERVER-ACCESS";

/// UTC window of a VFREEBUSY request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBusyRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A validated iTIP message.
///
/// Built once per scheduling transaction by [`SchedulingMessage::load`] and
/// not changed afterward. Delivery that needs a modified body works on a
/// copy obtained from [`SchedulingMessage::calendar_for`].
#[derive(Debug, Clone)]
pub struct SchedulingMessage {
    calendar: ICalendar,
    method: ITipMethod,
    kind: ComponentKind,
    uid: Option<String>,
    organizer: Option<CalendarUserAddress>,
    attendees: Vec<CalendarUserAddress>,
    freebusy: Option<FreeBusyRange>,
    mask_uid: Option<String>,
}

impl SchedulingMessage {
    /// Parses and validates a calendar body as an iTIP message.
    ///
    /// ## Summary
    /// Checks that the body is iCalendar, that it carries a known METHOD and
    /// a single kind of schedulable component sharing one UID and one
    /// ORGANIZER, and that the private access flag is absent. A REQUEST for
    /// a VFREEBUSY must hold exactly one VFREEBUSY with UTC start and end.
    ///
    /// ## Errors
    /// Returns the first rule the body violates.
    #[tracing::instrument(skip(data), fields(data_len = data.len()))]
    pub fn load(data: &str) -> ITipResult<Self> {
        let calendar = parse(data)?;
        Self::from_calendar(calendar)
    }

    /// Validates an already parsed calendar as an iTIP message.
    ///
    /// ## Errors
    /// See [`SchedulingMessage::load`].
    pub fn from_calendar(calendar: ICalendar) -> ITipResult<Self> {
        let method_value = calendar.method().ok_or(ITipError::MissingMethod)?;
        let method = ITipMethod::parse(method_value)
            .ok_or_else(|| ITipError::InvalidMethod(method_value.to_string()))?;

        let mains = calendar.main_components();
        if mains.is_empty() {
            return Err(ITipError::MissingComponent);
        }
        let kind = calendar
            .main_kind()
            .filter(|k| k.is_schedulable())
            .ok_or(ITipError::InvalidComponentType)?;

        if calendar.root.has_property_deep(PRIVATE_ACCESS_PROPERTY) {
            tracing::warn!("Scheduling message carries the private access flag");
            return Err(ITipError::PrivateEvent);
        }

        let uid = single_value(mains.iter().map(|c| c.uid()), ITipError::MultipleUids)?;
        if uid.is_none() && kind != ComponentKind::FreeBusy {
            return Err(ITipError::MissingUid);
        }

        let organizer = single_value(
            mains.iter().map(|c| c.property_value("ORGANIZER")),
            ITipError::MultipleOrganizers,
        )?;
        if organizer.is_none() && method != ITipMethod::Publish {
            return Err(ITipError::MissingOrganizer);
        }

        let mut attendees: Vec<CalendarUserAddress> = Vec::new();
        for component in &mains {
            for prop in component.get_properties("ATTENDEE") {
                let address = CalendarUserAddress::new(prop.value.trim());
                if !attendees.contains(&address) {
                    attendees.push(address);
                }
            }
        }

        let (freebusy, mask_uid) = if method == ITipMethod::Request && kind == ComponentKind::FreeBusy
        {
            let [vfreebusy] = mains.as_slice() else {
                return Err(ITipError::InvalidFreeBusy(
                    "iTIP data is not valid for a VFREEBUSY request",
                ));
            };
            let start = vfreebusy.property_value("DTSTART");
            let end = vfreebusy.property_value("DTEND");
            let (Some(start), Some(end)) = (start, end) else {
                return Err(ITipError::InvalidFreeBusy("VFREEBUSY start/end not valid"));
            };
            let (Some(start), Some(end)) = (parse_utc_datetime(start), parse_utc_datetime(end))
            else {
                return Err(ITipError::InvalidFreeBusy("VFREEBUSY start or end not UTC"));
            };
            let mask = vfreebusy
                .property_value(MASK_UID_PROPERTY)
                .map(|v| v.trim().to_string());
            (Some(FreeBusyRange { start, end }), mask)
        } else {
            (None, None)
        };

        tracing::debug!(
            method = %method,
            kind = %kind,
            attendees = attendees.len(),
            freebusy = freebusy.is_some(),
            "Loaded scheduling message"
        );

        let uid = uid.map(str::to_string);
        let organizer = organizer.map(|o| CalendarUserAddress::new(o.trim()));

        Ok(Self {
            calendar,
            uid,
            organizer,
            method,
            kind,
            attendees,
            freebusy,
            mask_uid,
        })
    }

    #[must_use]
    pub fn calendar(&self) -> &ICalendar {
        &self.calendar
    }

    #[must_use]
    pub fn method(&self) -> ITipMethod {
        self.method
    }

    /// Kind of the main components.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    #[must_use]
    pub fn organizer(&self) -> Option<&CalendarUserAddress> {
        self.organizer.as_ref()
    }

    /// Distinct attendees across all main components, in first-seen order.
    #[must_use]
    pub fn attendees(&self) -> &[CalendarUserAddress] {
        &self.attendees
    }

    /// Returns whether this is a VFREEBUSY REQUEST.
    #[must_use]
    pub fn is_freebusy(&self) -> bool {
        self.freebusy.is_some()
    }

    #[must_use]
    pub fn freebusy_range(&self) -> Option<FreeBusyRange> {
        self.freebusy
    }

    #[must_use]
    pub fn mask_uid(&self) -> Option<&str> {
        self.mask_uid.as_deref()
    }

    /// The one attendee a reply-class message speaks for, if there is
    /// exactly one.
    #[must_use]
    pub fn replying_attendee(&self) -> Option<&CalendarUserAddress> {
        match self.attendees.as_slice() {
            [attendee] => Some(attendee),
            _ => None,
        }
    }

    /// Address that sends this message: the organizer for request-class
    /// methods, the single attendee for reply-class ones.
    #[must_use]
    pub fn sender(&self) -> Option<&CalendarUserAddress> {
        if self.method.is_reply_class() {
            self.replying_attendee()
        } else {
            self.organizer()
        }
    }

    /// Wire form of the message.
    #[must_use]
    pub fn to_ical_string(&self) -> String {
        serialize(&self.calendar)
    }

    /// Returns a copy of the calendar suited to one batch of recipients.
    ///
    /// For free-busy requests only the ATTENDEE properties naming one of
    /// `recipients` are kept. Every ORGANIZER and ATTENDEE value is then
    /// passed through `rewrite`, which returns a replacement address or
    /// `None` to keep the value.
    #[must_use]
    pub fn calendar_for(
        &self,
        recipients: &[CalendarUserAddress],
        rewrite: impl Fn(&CalendarUserAddress) -> Option<String>,
    ) -> ICalendar {
        let mut calendar = self.calendar.clone();

        if self.is_freebusy() {
            for component in &mut calendar.root.children {
                if component.kind == ComponentKind::FreeBusy {
                    component.retain_properties("ATTENDEE", &mut |prop| {
                        recipients.contains(&CalendarUserAddress::new(prop.value.trim()))
                    });
                }
            }
        }

        for name in ["ORGANIZER", "ATTENDEE"] {
            calendar.root.for_each_property_mut(name, &mut |prop| {
                if let Some(replacement) = rewrite(&CalendarUserAddress::new(prop.value.trim())) {
                    prop.value = replacement;
                }
            });
        }

        calendar
    }
}

/// Collapses per-component values to one, failing if two components
/// disagree.
fn single_value<'a>(
    values: impl Iterator<Item = Option<&'a str>>,
    conflict: ITipError,
) -> ITipResult<Option<&'a str>> {
    let mut found: Option<&'a str> = None;
    for value in values.flatten() {
        match found {
            Some(existing) if existing != value => return Err(conflict),
            Some(_) => {}
            None => found = Some(value),
        }
    }
    Ok(found)
}
