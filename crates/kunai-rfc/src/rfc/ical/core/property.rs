//! iCalendar property and content line types (RFC 5545 §3.1, §3.8).

use super::Parameter;

/// A raw content line as parsed from iCalendar text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    /// Property name (normalized to uppercase).
    pub name: String,
    /// Parameters in order of appearance.
    pub params: Vec<Parameter>,
    /// Raw value string (after unfolding, before unescaping).
    pub raw_value: String,
}

/// An iCalendar property.
///
/// The value is kept exactly as it appeared on the wire so that rewriting
/// one property never disturbs the encoding of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property name (normalized to uppercase).
    pub name: String,
    /// Parameters in order of appearance.
    pub params: Vec<Parameter>,
    /// Raw (still escaped) value.
    pub value: String,
}

impl From<ContentLine> for Property {
    fn from(line: ContentLine) -> Self {
        Self {
            name: line.name,
            params: line.params,
            value: line.raw_value,
        }
    }
}

impl Property {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            params: Vec::new(),
            value: value.into(),
        }
    }

    /// Adds a parameter, builder style.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Returns the parameter with the given name.
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&Parameter> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns the first value of a parameter.
    #[must_use]
    pub fn get_param_value(&self, name: &str) -> Option<&str> {
        self.get_param(name)?.value()
    }

    /// Replaces (or adds) a single-valued parameter.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let param = Parameter::new(name, value);
        if let Some(existing) = self.params.iter_mut().find(|p| p.name == param.name) {
            *existing = param;
        } else {
            self.params.push(param);
        }
    }

    /// Removes every parameter with the given name.
    pub fn remove_param(&mut self, name: &str) {
        self.params.retain(|p| !p.name.eq_ignore_ascii_case(name));
    }

    /// Returns the value with TEXT escapes (RFC 5545 §3.3.11) removed.
    #[must_use]
    pub fn text(&self) -> String {
        crate::rfc::ical::parse::unescape_text(&self.value)
    }
}
