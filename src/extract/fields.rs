//! Field catalogue and typed field values
//!
//! Every datum a catalog page can yield is one [`FieldKind`]. Each kind has a
//! fixed [`ValueKind`], which the assembler enforces on extractor output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// A structured field that can be extracted from a catalog page
///
/// Variant order is the canonical output order of a [`ResultItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKind {
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "stock")]
    Stock,
    #[serde(rename = "link")]
    Link,
    #[serde(rename = "price")]
    Price,
    #[serde(rename = "oldprice")]
    OldPrice,
    #[serde(rename = "article")]
    Article,
    #[serde(rename = "imageLink")]
    ImageLink,
    #[serde(rename = "timestamp")]
    Timestamp,
}

impl FieldKind {
    /// All known field kinds
    pub const ALL: [FieldKind; 8] = [
        Self::Name,
        Self::Stock,
        Self::Link,
        Self::Price,
        Self::OldPrice,
        Self::Article,
        Self::ImageLink,
        Self::Timestamp,
    ];

    /// Wire name used in configuration and output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Stock => "stock",
            Self::Link => "link",
            Self::Price => "price",
            Self::OldPrice => "oldprice",
            Self::Article => "article",
            Self::ImageLink => "imageLink",
            Self::Timestamp => "timestamp",
        }
    }

    /// Human-readable description of the field
    pub fn description(&self) -> &'static str {
        match self {
            Self::Name => "Product name",
            Self::Stock => "Stock availability",
            Self::Link => "Product page link",
            Self::Price => "Current price",
            Self::OldPrice => "Price before discount",
            Self::Article => "Article number (SKU)",
            Self::ImageLink => "Main image link",
            Self::Timestamp => "Extraction time",
        }
    }

    /// The value type every value of this field must have
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::Name | Self::Article => ValueKind::Text,
            Self::Stock => ValueKind::Availability,
            Self::Link | Self::ImageLink => ValueKind::Link,
            Self::Price | Self::OldPrice => ValueKind::Number,
            Self::Timestamp => ValueKind::Timestamp,
        }
    }

    /// Returns true for fields the engine fills in itself
    pub fn is_engine_owned(&self) -> bool {
        matches!(self, Self::Timestamp)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .or(match wanted {
                "old-price" | "old_price" => Some(Self::OldPrice),
                "image-link" | "image_link" => Some(Self::ImageLink),
                _ => None,
            })
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Number,
    Link,
    Availability,
    Timestamp,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Link => "link",
            Self::Availability => "availability",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field value
///
/// `Empty` is what an optional field holds when its extractor found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Link(String),
    Availability(bool),
    Timestamp(DateTime<Utc>),
    Empty,
}

impl FieldValue {
    /// The value type, or None for `Empty`
    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            Self::Text(_) => Some(ValueKind::Text),
            Self::Number(_) => Some(ValueKind::Number),
            Self::Link(_) => Some(ValueKind::Link),
            Self::Availability(_) => Some(ValueKind::Availability),
            Self::Timestamp(_) => Some(ValueKind::Timestamp),
            Self::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Link(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Plain JSON rendering used for output records
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) | Self::Link(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Availability(b) => serde_json::Value::Bool(*b),
            Self::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Self::Empty => serde_json::Value::Null,
        }
    }
}

/// A normalized item record
///
/// The key set always equals the declared field set of the configuration the
/// item was assembled under, `timestamp` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    url: String,
    fields: BTreeMap<FieldKind, FieldValue>,
}

impl ResultItem {
    pub(crate) fn new(url: String, fields: BTreeMap<FieldKind, FieldValue>) -> Self {
        Self { url, fields }
    }

    /// The URL the item was extracted from
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn get(&self, kind: FieldKind) -> Option<&FieldValue> {
        self.fields.get(&kind)
    }

    /// Field kinds present in this item, in canonical order
    pub fn keys(&self) -> impl Iterator<Item = FieldKind> + '_ {
        self.fields.keys().copied()
    }

    pub fn fields(&self) -> &BTreeMap<FieldKind, FieldValue> {
        &self.fields
    }

    /// The assembly-time timestamp
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.fields.get(&FieldKind::Timestamp) {
            Some(FieldValue::Timestamp(t)) => Some(*t),
            _ => None,
        }
    }

    /// Flat JSON object keyed by field wire names
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(kind, value)| (kind.as_str().to_string(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}
