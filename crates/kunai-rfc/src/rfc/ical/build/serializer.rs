//! iCalendar serializer (RFC 5545).
//!
//! Properties and components are written in their original order with their
//! raw values, so a parsed message serializes back to what was received
//! apart from any edits made in between.

use super::escape::escape_param_value;
use super::fold::fold_line;
use crate::rfc::ical::core::{Component, ICalendar, Parameter, Property};

/// Serializes an iCalendar document to a string.
#[must_use]
pub fn serialize(ical: &ICalendar) -> String {
    serialize_component(&ical.root)
}

/// Serializes a component and its children to a string.
#[must_use]
pub fn serialize_component(component: &Component) -> String {
    let mut result = fold_line(&format!("BEGIN:{}", component.name));

    for prop in &component.properties {
        result.push_str(&serialize_property(prop));
    }
    for child in &component.children {
        result.push_str(&serialize_component(child));
    }

    result.push_str(&fold_line(&format!("END:{}", component.name)));
    result
}

/// Serializes a single property as a folded content line.
#[must_use]
pub fn serialize_property(prop: &Property) -> String {
    let mut line = prop.name.clone();
    for param in &prop.params {
        line.push(';');
        line.push_str(&serialize_parameter(param));
    }
    line.push(':');
    line.push_str(&prop.value);
    fold_line(&line)
}

fn serialize_parameter(param: &Parameter) -> String {
    let values: Vec<String> = param.values.iter().map(|v| escape_param_value(v)).collect();
    format!("{}={}", param.name, values.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfc::ical::parse::parse;

    #[test]
    fn round_trips_parsed_document() {
        let input = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
METHOD:REPLY\r\n\
BEGIN:VEVENT\r\n\
UID:r-1\r\n\
ATTENDEE;CN=\"Doe, Jane\";PARTSTAT=ACCEPTED:mailto:jane@example.com\r\n\
SUMMARY:Lunch\\, maybe\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";
        let ical = parse(input).unwrap();
        assert_eq!(serialize(&ical), input);
    }

    #[test]
    fn edited_parameter_is_serialized() {
        let prop = Property::new("ATTENDEE", "mailto:a@example.com")
            .with_param("SCHEDULE-STATUS", "1.2");
        assert_eq!(
            serialize_property(&prop),
            "ATTENDEE;SCHEDULE-STATUS=1.2:mailto:a@example.com\r\n"
        );
    }

    #[test]
    fn new_calendar_has_header_properties() {
        let mut ical = ICalendar::new("-//Kunai//EN");
        ical.root.add_child(Component::named("VEVENT"));
        let text = serialize(&ical);
        assert!(text.starts_with("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Kunai//EN\r\n"));
        assert!(text.contains("BEGIN:VEVENT\r\nEND:VEVENT\r\n"));
    }
}
