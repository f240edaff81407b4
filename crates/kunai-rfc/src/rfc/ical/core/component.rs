//! iCalendar component types (RFC 5545 §3.4-3.6).

use super::Property;

/// Component kind for iCalendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// VCALENDAR wrapper component.
    Calendar,
    /// VEVENT component.
    Event,
    /// VTODO component.
    Todo,
    /// VJOURNAL component.
    Journal,
    /// VFREEBUSY component.
    FreeBusy,
    /// VTIMEZONE component.
    Timezone,
    /// VALARM component (nested within VEVENT/VTODO).
    Alarm,
    /// STANDARD sub-component of VTIMEZONE.
    Standard,
    /// DAYLIGHT sub-component of VTIMEZONE.
    Daylight,
    /// VAVAILABILITY component.
    Availability,
    /// Unknown/X-component.
    Unknown,
}

impl ComponentKind {
    /// Returns the string name for this component kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calendar => "VCALENDAR",
            Self::Event => "VEVENT",
            Self::Todo => "VTODO",
            Self::Journal => "VJOURNAL",
            Self::FreeBusy => "VFREEBUSY",
            Self::Timezone => "VTIMEZONE",
            Self::Alarm => "VALARM",
            Self::Standard => "STANDARD",
            Self::Daylight => "DAYLIGHT",
            Self::Availability => "VAVAILABILITY",
            Self::Unknown => "X-UNKNOWN",
        }
    }

    /// Parses a component kind from a string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "VCALENDAR" => Self::Calendar,
            "VEVENT" => Self::Event,
            "VTODO" => Self::Todo,
            "VJOURNAL" => Self::Journal,
            "VFREEBUSY" => Self::FreeBusy,
            "VTIMEZONE" => Self::Timezone,
            "VALARM" => Self::Alarm,
            "STANDARD" => Self::Standard,
            "DAYLIGHT" => Self::Daylight,
            "VAVAILABILITY" => Self::Availability,
            _ => Self::Unknown,
        }
    }

    /// Returns whether this kind can be the subject of an iTIP message.
    #[must_use]
    pub const fn is_schedulable(self) -> bool {
        matches!(
            self,
            Self::Event | Self::Todo | Self::Journal | Self::FreeBusy | Self::Availability
        )
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An iCalendar component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub kind: ComponentKind,
    /// Original component name (preserved for X-components).
    pub name: String,
    /// Properties in order of appearance.
    pub properties: Vec<Property>,
    /// Nested sub-components.
    pub children: Vec<Component>,
}

impl Component {
    /// Creates a new component with the given kind.
    #[must_use]
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates a component from its wire name, keeping X-names intact.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into().to_ascii_uppercase();
        Self {
            kind: ComponentKind::parse(&name),
            name,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn add_property(&mut self, prop: Property) {
        self.properties.push(prop);
    }

    pub fn add_child(&mut self, child: Component) {
        self.children.push(child);
    }

    /// Returns the first property with the given name.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns all properties with the given name.
    #[must_use]
    pub fn get_properties(&self, name: &str) -> Vec<&Property> {
        self.properties
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .collect()
    }

    /// Returns the raw value of the first property with the given name.
    #[must_use]
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.get_property(name).map(|p| p.value.as_str())
    }

    /// Returns the UID property value if present.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.property_value("UID")
    }

    /// Returns children of a specific kind.
    #[must_use]
    pub fn children_of_kind(&self, kind: ComponentKind) -> Vec<&Component> {
        self.children.iter().filter(|c| c.kind == kind).collect()
    }

    /// Returns whether this component or any descendant has the property.
    #[must_use]
    pub fn has_property_deep(&self, name: &str) -> bool {
        self.get_property(name).is_some() || self.children.iter().any(|c| c.has_property_deep(name))
    }

    /// Applies `f` to every property with the given name, here and below.
    pub fn for_each_property_mut(&mut self, name: &str, f: &mut impl FnMut(&mut Property)) {
        for prop in &mut self.properties {
            if prop.name.eq_ignore_ascii_case(name) {
                f(prop);
            }
        }
        for child in &mut self.children {
            child.for_each_property_mut(name, f);
        }
    }

    /// Keeps only the properties with the given name for which `keep` holds.
    pub fn retain_properties(&mut self, name: &str, keep: &mut impl FnMut(&Property) -> bool) {
        self.properties
            .retain(|p| !p.name.eq_ignore_ascii_case(name) || keep(p));
    }
}

/// Top-level iCalendar object wrapping the VCALENDAR component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ICalendar {
    /// The root VCALENDAR component.
    pub root: Component,
}

impl ICalendar {
    /// Creates a new empty iCalendar with required properties.
    #[must_use]
    pub fn new(prodid: impl Into<String>) -> Self {
        let mut root = Component::new(ComponentKind::Calendar);
        root.add_property(Property::new("VERSION", "2.0"));
        root.add_property(Property::new("PRODID", prodid));
        Self { root }
    }

    /// Returns the METHOD property value, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.root.property_value("METHOD")
    }

    /// Returns the components that carry scheduling data (everything but
    /// VTIMEZONE).
    #[must_use]
    pub fn main_components(&self) -> Vec<&Component> {
        self.root
            .children
            .iter()
            .filter(|c| c.kind != ComponentKind::Timezone)
            .collect()
    }

    /// Returns the kind shared by all main components, or `None` if there
    /// are none or they disagree.
    #[must_use]
    pub fn main_kind(&self) -> Option<ComponentKind> {
        let mut kinds = self.main_components().into_iter().map(|c| c.kind);
        let first = kinds.next()?;
        kinds.all(|k| k == first).then_some(first)
    }

    /// Returns the wire name of the main component type.
    #[must_use]
    pub fn main_type_name(&self) -> Option<&str> {
        self.main_components().first().map(|c| c.name.as_str())
    }
}
