//! Schedule-response XML parsing.

use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;

use super::condition::ErrorElement;
use super::error::{XmlError, XmlResult};
use super::response::DeliveryOutcome;
use super::status::RequestStatus;

/// One `response` element as read, before its required children are
/// checked.
#[derive(Debug, Default)]
struct RawResponse {
    recipient: Option<String>,
    request_status: Option<String>,
    calendar_data: Option<String>,
    error: Option<ErrorElement>,
    description: Option<String>,
}

/// Parses a schedule-response document returned by a peer.
///
/// ## Summary
/// Accepts both the iSchedule and CalDAV forms, matching elements by local
/// name. The recipient may be given as text or as a `href` child. Every
/// `response` is checked for a recipient and a request-status before any
/// outcome is returned, so one malformed entry rejects the whole document.
///
/// ## Errors
/// Returns an error if the XML is malformed, the root is not a
/// `schedule-response` with at least one `response`, or any `response`
/// lacks a recipient or request-status.
#[tracing::instrument(skip(xml), fields(xml_len = xml.len()))]
pub fn parse_schedule_response(xml: &[u8]) -> XmlResult<Vec<DeliveryOutcome>> {
    let raw = read_responses(xml)?;

    if raw.is_empty() {
        return Err(XmlError::Malformed("schedule-response has no responses"));
    }
    if raw
        .iter()
        .any(|r| r.recipient.is_none() || r.request_status.is_none())
    {
        tracing::warn!("Schedule response entry lacks recipient or request-status");
        return Err(XmlError::Malformed(
            "response without recipient or request-status",
        ));
    }

    Ok(raw
        .into_iter()
        .filter_map(|r| {
            Some(DeliveryOutcome {
                recipient: r.recipient?,
                request_status: RequestStatus::new(r.request_status?),
                calendar_data: r.calendar_data,
                error: r.error,
                description: r.description,
            })
        })
        .collect())
}

fn read_responses(xml: &[u8]) -> XmlResult<Vec<RawResponse>> {
    let mut reader = NsReader::from_reader(xml);
    let decoder = reader.decoder();

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut responses: Vec<RawResponse> = Vec::new();

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        let namespace = match ns {
            ResolveResult::Bound(ns) => decoder.decode(ns.as_ref())?.into_owned(),
            ResolveResult::Unbound | ResolveResult::Unknown(_) => String::new(),
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = decoder.decode(e.local_name().as_ref())?.into_owned();
                let depth = stack.len() + 1;

                match depth {
                    1 if local != "schedule-response" => {
                        return Err(XmlError::Malformed("root element is not schedule-response"));
                    }
                    2 if local != "response" => {
                        return Err(XmlError::Malformed("unexpected element in schedule-response"));
                    }
                    2 if is_empty => {
                        return Err(XmlError::Malformed("empty response element"));
                    }
                    2 => responses.push(RawResponse::default()),
                    4 if stack.get(2).is_some_and(|p| p == "error") => {
                        if let Some(current) = responses.last_mut() {
                            current
                                .error
                                .get_or_insert_with(|| ErrorElement::owned(namespace, local.clone()));
                        }
                    }
                    _ => {}
                }

                if !is_empty {
                    stack.push(local);
                    text.clear();
                }
            }
            Event::Text(ref e) => text.push_str(&decoder.decode(e.as_ref())?),
            Event::CData(ref e) => text.push_str(&decoder.decode(e.as_ref())?),
            Event::GeneralRef(ref e) => {
                if let Some(ch) = e.resolve_char_ref()? {
                    text.push(ch);
                } else {
                    let name = decoder.decode(e.as_ref())?;
                    let resolved = quick_xml::escape::resolve_predefined_entity(&name)
                        .ok_or(XmlError::Malformed("unknown entity reference"))?;
                    text.push_str(resolved);
                }
            }
            Event::End(_) => {
                let depth = stack.len();
                let Some(local) = stack.pop() else {
                    return Err(XmlError::Malformed("unbalanced end tag"));
                };
                let Some(current) = responses.last_mut() else {
                    continue;
                };

                match (depth, local.as_str()) {
                    (3 | 4, "recipient" | "href") => {
                        let value = text.trim();
                        if current.recipient.is_none() && !value.is_empty() {
                            current.recipient = Some(value.to_string());
                        }
                    }
                    (3, "request-status") => {
                        current.request_status = Some(text.trim().to_string());
                    }
                    (3, "calendar-data") => current.calendar_data = Some(text.clone()),
                    (3, "response-description" | "responsedescription") => {
                        current.description = Some(text.trim().to_string());
                    }
                    _ => {}
                }
            }
            Event::Eof if stack.is_empty() => break,
            Event::Eof => return Err(XmlError::Malformed("unexpected end of document")),
            _ => {}
        }
    }

    Ok(responses)
}
