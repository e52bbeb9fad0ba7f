//! Generic selector-driven extractors
//!
//! Most catalog fields are "take the text (or an attribute) of the first
//! element matching a CSS selector, then coerce it to the field's type".
//! [`SelectorExtractor`] does exactly that, so a site can be declared in
//! configuration without writing code.

use scraper::Selector;

use crate::extract::document::parse_selector;
use crate::extract::{Document, ExtractContext, FieldExtractor, FieldKind, FieldValue, ValueKind};
use crate::ConfigError;

/// Where the raw string comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Element text content
    Text,
    /// Value of the named attribute
    Attr(String),
}

/// Extractor that reads one element and coerces it to a value kind
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    selector: Selector,
    raw: String,
    source: Source,
    output: ValueKind,
    markers: Vec<String>,
}

impl SelectorExtractor {
    /// Creates an extractor producing values of `output` kind
    pub fn new(selector: &str, output: ValueKind) -> Result<Self, ConfigError> {
        Ok(Self {
            selector: parse_selector(selector)?,
            raw: selector.to_string(),
            source: Source::Text,
            output,
            markers: Vec::new(),
        })
    }

    /// Creates an extractor whose output kind matches the field's declared kind
    pub fn for_field(kind: FieldKind, selector: &str) -> Result<Self, ConfigError> {
        if kind.is_engine_owned() {
            return Err(ConfigError::EngineOwnedField(kind));
        }
        Self::new(selector, kind.value_kind())
    }

    /// Reads the given attribute instead of the element text
    pub fn with_attr(mut self, attr: impl Into<String>) -> Self {
        self.source = Source::Attr(attr.into());
        self
    }

    /// Availability markers
    ///
    /// With markers set, an availability field is true when the element text
    /// contains any marker (case-insensitive). Without markers, availability
    /// is simply whether the selector matches.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.markers = markers
            .into_iter()
            .map(|m| m.as_ref().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// The selector as written in configuration
    pub fn selector(&self) -> &str {
        &self.raw
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    fn raw_value(&self, document: &Document) -> Option<String> {
        match &self.source {
            Source::Text => document.select_text(&self.selector),
            Source::Attr(attr) => document.select_attr(&self.selector, attr),
        }
    }
}

impl FieldExtractor for SelectorExtractor {
    fn extract(&self, document: &Document, _context: &ExtractContext<'_>) -> Option<FieldValue> {
        match self.output {
            ValueKind::Text => self.raw_value(document).map(FieldValue::Text),
            ValueKind::Link => self
                .raw_value(document)
                .and_then(|href| document.resolve_link(&href))
                .map(FieldValue::Link),
            ValueKind::Number => self
                .raw_value(document)
                .and_then(|text| parse_number(&text))
                .map(FieldValue::Number),
            ValueKind::Availability => {
                if self.markers.is_empty() {
                    Some(FieldValue::Availability(document.exists(&self.selector)))
                } else {
                    let text = self.raw_value(document)?.to_lowercase();
                    let in_stock = self.markers.iter().any(|m| text.contains(m.as_str()));
                    Some(FieldValue::Availability(in_stock))
                }
            }
            ValueKind::Timestamp => None,
        }
    }
}

/// Parses a price-like number out of free text
///
/// Takes the first numeric run, tolerating currency symbols, grouping spaces
/// (including non-breaking ones), thousands separators and decimal commas.
///
/// # Examples
///
/// ```
/// use shelfscan::extract::parse_number;
///
/// assert_eq!(parse_number("1 299,90 ₽"), Some(1299.90));
/// assert_eq!(parse_number("$1,299.99"), Some(1299.99));
/// assert_eq!(parse_number("no price"), None);
/// ```
pub fn parse_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let run: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | ' ' | '\u{a0}' | '\u{202f}'))
        .filter(|c| !c.is_whitespace())
        .collect();
    let run = run.trim_end_matches([',', '.']);

    let last_comma = run.rfind(',');
    let last_dot = run.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                run.replace('.', "").replace(',', ".")
            } else {
                run.replace(',', "")
            }
        }
        (Some(_), None) => {
            let groups: Vec<&str> = run.split(',').collect();
            let is_grouping = groups.len() > 2 || groups.last().map(|g| g.len()) == Some(3);
            if is_grouping {
                run.replace(',', "")
            } else {
                run.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if run.matches('.').count() > 1 {
                run.replace('.', "")
            } else {
                run.to_string()
            }
        }
        (None, None) => run.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}
