//! Field extraction
//!
//! This module contains everything a field extractor touches:
//! - The field catalogue and typed values ([`FieldKind`], [`FieldValue`])
//! - Parsed documents with selector queries ([`Document`])
//! - The extractor trait and registry
//! - Generic selector-driven extractors for configuration-only sites

mod document;
mod fields;
mod registry;
mod selectors;

pub use document::{parse_selector, Document, ExtractContext, ParseMode};
pub use fields::{FieldKind, FieldValue, ResultItem, ValueKind};
pub use registry::{ExtractorRegistry, FieldExtractor};
pub use selectors::{parse_number, SelectorExtractor, Source};
