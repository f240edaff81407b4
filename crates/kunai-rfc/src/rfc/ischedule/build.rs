//! Schedule-response, error and capabilities XML serialization.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::condition::{ErrorElement, ErrorFlavor};
use super::error::{XmlError, XmlResult};
use super::namespace::{CALDAV_NS, DAV_NS, ISCHEDULE_NS};
use super::response::DeliveryOutcome;

/// Element names of one flavor of schedule-response document.
struct Names {
    schedule_response: &'static str,
    response: &'static str,
    recipient: &'static str,
    request_status: &'static str,
    calendar_data: &'static str,
    error: &'static str,
    description: &'static str,
}

const CALDAV_NAMES: Names = Names {
    schedule_response: "C:schedule-response",
    response: "C:response",
    recipient: "C:recipient",
    request_status: "C:request-status",
    calendar_data: "C:calendar-data",
    error: "D:error",
    description: "D:responsedescription",
};

const ISCHEDULE_NAMES: Names = Names {
    schedule_response: "schedule-response",
    response: "response",
    recipient: "recipient",
    request_status: "request-status",
    calendar_data: "calendar-data",
    error: "error",
    description: "response-description",
};

const fn names(flavor: ErrorFlavor) -> &'static Names {
    match flavor {
        ErrorFlavor::CalDav => &CALDAV_NAMES,
        ErrorFlavor::ISchedule => &ISCHEDULE_NAMES,
    }
}

/// Adds the namespace declarations a flavor's root element needs.
fn declare_namespaces(elem: &mut BytesStart<'_>, flavor: ErrorFlavor) {
    match flavor {
        ErrorFlavor::CalDav => {
            elem.push_attribute(("xmlns:D", DAV_NS));
            elem.push_attribute(("xmlns:C", CALDAV_NS));
        }
        ErrorFlavor::ISchedule => elem.push_attribute(("xmlns", ISCHEDULE_NS)),
    }
}

/// Serializes per-recipient outcomes as a schedule-response document.
///
/// ## Summary
/// Writes one `response` element per outcome, in order, with the recipient,
/// its request-status and whichever of calendar data, error element and
/// description the outcome carries.
///
/// ## Errors
/// Returns an error if XML writing fails.
pub fn write_schedule_response(
    outcomes: &[DeliveryOutcome],
    flavor: ErrorFlavor,
) -> XmlResult<String> {
    let names = names(flavor);
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new(names.schedule_response);
    declare_namespaces(&mut root, flavor);
    writer.write_event(Event::Start(root))?;

    for outcome in outcomes {
        writer.write_event(Event::Start(BytesStart::new(names.response)))?;

        match flavor {
            ErrorFlavor::CalDav => {
                writer.write_event(Event::Start(BytesStart::new(names.recipient)))?;
                write_text_element(&mut writer, "D:href", &outcome.recipient)?;
                writer.write_event(Event::End(BytesEnd::new(names.recipient)))?;
            }
            ErrorFlavor::ISchedule => {
                write_text_element(&mut writer, names.recipient, &outcome.recipient)?;
            }
        }

        write_text_element(
            &mut writer,
            names.request_status,
            outcome.request_status.as_str(),
        )?;

        if let Some(ref data) = outcome.calendar_data {
            write_text_element(&mut writer, names.calendar_data, data)?;
        }

        if let Some(ref error) = outcome.error {
            writer.write_event(Event::Start(BytesStart::new(names.error)))?;
            write_error_element(&mut writer, error)?;
            writer.write_event(Event::End(BytesEnd::new(names.error)))?;
        }

        if let Some(ref desc) = outcome.description {
            write_text_element(&mut writer, names.description, desc)?;
        }

        writer.write_event(Event::End(BytesEnd::new(names.response)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(names.schedule_response)))?;

    into_string(writer)
}

/// Serializes a transaction-fatal error as an error document.
///
/// ## Errors
/// Returns an error if XML writing fails.
pub fn write_error(
    element: &ErrorElement,
    description: Option<&str>,
    flavor: ErrorFlavor,
) -> XmlResult<String> {
    let names = names(flavor);
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new(names.error);
    declare_namespaces(&mut root, flavor);
    writer.write_event(Event::Start(root))?;

    write_error_element(&mut writer, element)?;
    if let Some(desc) = description {
        write_text_element(&mut writer, names.description, desc)?;
    }

    writer.write_event(Event::End(BytesEnd::new(names.error)))?;

    into_string(writer)
}

/// Serializes the iSchedule capabilities document answered on `GET`.
///
/// Lists protocol version 1.0, the component/method pairs this server
/// accepts, and the free-busy recipient limit when one is configured.
///
/// ## Errors
/// Returns an error if XML writing fails.
pub fn write_capabilities(serial: u64, max_recipients: Option<usize>) -> XmlResult<String> {
    const MESSAGES: &[(&str, &[&str])] = &[
        (
            "VEVENT",
            &["REQUEST", "ADD", "REPLY", "CANCEL", "REFRESH", "COUNTER", "DECLINECOUNTER"],
        ),
        (
            "VTODO",
            &["REQUEST", "ADD", "REPLY", "CANCEL", "REFRESH", "COUNTER", "DECLINECOUNTER"],
        ),
        ("VFREEBUSY", &["REQUEST"]),
    ];

    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("query-result");
    root.push_attribute(("xmlns", ISCHEDULE_NS));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("capabilities")))?;

    write_text_element(&mut writer, "serial-number", &serial.to_string())?;

    writer.write_event(Event::Start(BytesStart::new("versions")))?;
    write_text_element(
        &mut writer,
        "version",
        kunai_core::constants::ISCHEDULE_VERSION_VALUE,
    )?;
    writer.write_event(Event::End(BytesEnd::new("versions")))?;

    writer.write_event(Event::Start(BytesStart::new("scheduling-messages")))?;
    for (component, methods) in MESSAGES {
        let mut comp = BytesStart::new("component");
        comp.push_attribute(("name", *component));
        writer.write_event(Event::Start(comp))?;
        for method in *methods {
            let mut elem = BytesStart::new("method");
            elem.push_attribute(("name", *method));
            writer.write_event(Event::Empty(elem))?;
        }
        writer.write_event(Event::End(BytesEnd::new("component")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("scheduling-messages")))?;

    writer.write_event(Event::Start(BytesStart::new("calendar-data-types")))?;
    let mut data_type = BytesStart::new("calendar-data-type");
    data_type.push_attribute(("content-type", kunai_core::constants::CALENDAR_CONTENT_TYPE));
    data_type.push_attribute(("version", "2.0"));
    writer.write_event(Event::Empty(data_type))?;
    writer.write_event(Event::End(BytesEnd::new("calendar-data-types")))?;

    if let Some(max) = max_recipients {
        write_text_element(&mut writer, "max-recipients", &max.to_string())?;
    }

    writer.write_event(Event::End(BytesEnd::new("capabilities")))?;
    writer.write_event(Event::End(BytesEnd::new("query-result")))?;

    into_string(writer)
}

/// Writes a precondition as an empty element declaring its own namespace.
fn write_error_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    element: &ErrorElement,
) -> XmlResult<()> {
    let mut elem = BytesStart::new(element.name.as_ref());
    elem.push_attribute(("xmlns", element.namespace.as_ref()));
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> XmlResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn into_string(writer: Writer<Vec<u8>>) -> XmlResult<String> {
    String::from_utf8(writer.into_inner()).map_err(|e| {
        tracing::error!("Generated invalid UTF-8 in schedule XML: {}", e);
        XmlError::Utf8(e.utf8_error())
    })
}
