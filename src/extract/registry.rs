//! Field extractor trait and registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::extract::{Document, ExtractContext, FieldKind, FieldValue};

/// A named, stateless extraction function
///
/// Extractors see only the document and the page context. They must not
/// depend on the output of other extractors.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, document: &Document, context: &ExtractContext<'_>) -> Option<FieldValue>;
}

/// Adapter that lets a plain closure act as an extractor
struct FnExtractor<F>(F);

impl<F> FieldExtractor for FnExtractor<F>
where
    F: Fn(&Document, &ExtractContext<'_>) -> Option<FieldValue> + Send + Sync,
{
    fn extract(&self, document: &Document, context: &ExtractContext<'_>) -> Option<FieldValue> {
        (self.0)(document, context)
    }
}

/// Mapping from field kind to its extractor
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<FieldKind, Arc<dyn FieldExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extractor, replacing any previous one for the same field
    pub fn register<E>(&mut self, kind: FieldKind, extractor: E) -> &mut Self
    where
        E: FieldExtractor + 'static,
    {
        self.extractors.insert(kind, Arc::new(extractor));
        self
    }

    /// Registers a closure as the extractor for a field
    ///
    /// # Example
    ///
    /// ```
    /// use shelfscan::extract::{ExtractorRegistry, FieldKind, FieldValue};
    ///
    /// let mut registry = ExtractorRegistry::new();
    /// registry.register_fn(FieldKind::Article, |doc, _ctx| {
    ///     let id = doc.url().path_segments()?.last()?.to_string();
    ///     Some(FieldValue::Text(id))
    /// });
    /// assert!(registry.contains(FieldKind::Article));
    /// ```
    pub fn register_fn<F>(&mut self, kind: FieldKind, f: F) -> &mut Self
    where
        F: Fn(&Document, &ExtractContext<'_>) -> Option<FieldValue> + Send + Sync + 'static,
    {
        self.extractors.insert(kind, Arc::new(FnExtractor(f)));
        self
    }

    /// Builder-style variant of [`register`](Self::register)
    pub fn with<E>(mut self, kind: FieldKind, extractor: E) -> Self
    where
        E: FieldExtractor + 'static,
    {
        self.register(kind, extractor);
        self
    }

    pub fn get(&self, kind: FieldKind) -> Option<&Arc<dyn FieldExtractor>> {
        self.extractors.get(&kind)
    }

    pub fn contains(&self, kind: FieldKind) -> bool {
        self.extractors.contains_key(&kind)
    }

    /// Registered field kinds in canonical order
    pub fn kinds(&self) -> Vec<FieldKind> {
        let mut kinds: Vec<_> = self.extractors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// A copy holding only the extractors for the given fields
    pub fn restricted_to(&self, fields: &[FieldKind]) -> Self {
        let extractors = self
            .extractors
            .iter()
            .filter(|(kind, _)| fields.contains(kind))
            .map(|(kind, extractor)| (*kind, Arc::clone(extractor)))
            .collect();
        Self { extractors }
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}
