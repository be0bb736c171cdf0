//! iCalendar content model (RFC 5545 §3.1, §3.4).
//!
//! Properties are kept as raw content lines; values are decoded on demand by
//! the consumer that knows which value type a property carries.

/// A property parameter, e.g. `TZID=America/New_York`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name (normalized to uppercase).
    pub name: String,
    /// Parameter values (comma-separated in the source).
    pub values: Vec<String>,
}

impl Parameter {
    #[must_use]
    pub fn with_values(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            values,
        }
    }

    /// Returns the first value, which is the only one for most parameters.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// A raw content line as parsed from iCalendar text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    /// Property name (normalized to uppercase).
    pub name: String,
    /// Parameters in order of appearance.
    pub params: Vec<Parameter>,
    /// Raw value string (after unfolding, before unescaping).
    pub raw_value: String,
    /// 1-based source line, 0 for lines built in code.
    pub line: usize,
}

impl ContentLine {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            params: Vec::new(),
            raw_value: value.into(),
            line: 0,
        }
    }

    /// Returns the value of a parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .and_then(Parameter::value)
    }

    /// Returns the VALUE parameter if present.
    #[must_use]
    pub fn value_type(&self) -> Option<&str> {
        self.param("VALUE")
    }

    /// Returns the TZID parameter if present.
    #[must_use]
    pub fn tzid(&self) -> Option<&str> {
        self.param("TZID")
    }
}

/// An iCalendar component with its properties and nested components.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Component {
    /// Component name (normalized to uppercase), e.g. `VEVENT`.
    pub name: String,
    /// Properties in order of appearance.
    pub properties: Vec<ContentLine>,
    /// Nested sub-components.
    pub children: Vec<Component>,
}

impl Component {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the first property with the given name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ContentLine> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns all properties with the given name, in order.
    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ContentLine> {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// Returns nested components with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Component> {
        self.children
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn add_property(&mut self, property: ContentLine) {
        self.properties.push(property);
    }

    pub fn add_child(&mut self, child: Component) {
        self.children.push(child);
    }
}

/// A parsed iCalendar document rooted at its `VCALENDAR` component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ICalendar {
    pub root: Component,
}

impl ICalendar {
    /// Returns all `VEVENT` components.
    pub fn events(&self) -> impl Iterator<Item = &Component> {
        self.root.children_named("VEVENT")
    }

    /// Returns all `VTIMEZONE` components.
    pub fn timezones(&self) -> impl Iterator<Item = &Component> {
        self.root.children_named("VTIMEZONE")
    }
}
