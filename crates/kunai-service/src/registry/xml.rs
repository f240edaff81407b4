//! Minimal element tree for the server configuration files.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use kunai_rfc::rfc::ischedule::{XmlError, XmlResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Texts of the `item` children, e.g. `<domains><domain>..</domain></domains>`.
    pub fn list(&self, item: &str) -> Vec<String> {
        self.children_named(item)
            .filter_map(XmlElement::text)
            .map(str::to_string)
            .collect()
    }
}

fn start_element(e: &BytesStart<'_>) -> XmlResult<XmlElement> {
    let name = std::str::from_utf8(e.local_name().as_ref())?.to_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_owned();
        let value = std::str::from_utf8(&attr.value)?.to_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        ..XmlElement::default()
    })
}

/// Parses a document into its root element. Element names are local
/// names; namespaces are not used by these files.
pub(crate) fn parse_document(xml: &[u8]) -> XmlResult<XmlElement> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let decoder = reader.decoder();

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(start_element(e)?),
            Event::Empty(ref e) => {
                let element = start_element(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::Malformed("unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(ref e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&decoder.decode(e.as_ref())?);
                }
            }
            Event::CData(ref e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&decoder.decode(e.as_ref())?);
                }
            }
            Event::GeneralRef(ref e) => {
                let resolved = match e.resolve_char_ref()? {
                    Some(ch) => ch.to_string(),
                    None => {
                        let name = decoder.decode(e.as_ref())?;
                        quick_xml::escape::resolve_predefined_entity(&name)
                            .ok_or(XmlError::Malformed("unknown entity reference"))?
                            .to_string()
                    }
                };
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Malformed("unclosed element"));
    }
    root.ok_or(XmlError::Malformed("document has no root element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree() {
        let root = parse_document(
            br#"<?xml version="1.0"?>
<servers>
  <server implicit="no">
    <id>A</id>
    <domains><domain>a.example</domain><domain> b.example </domain></domains>
    <allow-requests-from/>
    <password>p&amp;ss</password>
  </server>
</servers>"#,
        )
        .unwrap();

        assert_eq!(root.name, "servers");
        let server = root.child("server").unwrap();
        assert_eq!(server.attribute("implicit"), Some("no"));
        assert_eq!(server.child("id").and_then(XmlElement::text), Some("A"));
        assert_eq!(
            server.child("domains").unwrap().list("domain"),
            vec!["a.example", "b.example"]
        );
        assert!(server.child("allow-requests-from").is_some());
        assert_eq!(server.child("password").and_then(XmlElement::text), Some("p&ss"));
    }

    #[test]
    fn rejects_broken_documents() {
        assert!(parse_document(b"<servers><server></servers>").is_err());
        assert!(parse_document(b"").is_err());
    }
}
