//! Item assembly
//!
//! Runs the configured extractors against a valid document and builds the
//! normalized [`ResultItem`].

use std::collections::BTreeMap;

use crate::config::TargetConfig;
use crate::engine::Clock;
use crate::extract::{Document, ExtractContext, FieldKind, FieldValue, ResultItem};
use crate::TargetError;

/// Assembles an item from a document
///
/// Every declared field gets a value. A required field whose extractor
/// returns nothing, or a value of the wrong kind, fails the whole item with
/// an extraction error naming that field. Optional fields fall back to
/// [`FieldValue::Empty`]. `timestamp` always comes from `clock`.
pub fn assemble(
    document: &Document,
    config: &TargetConfig,
    context: &ExtractContext<'_>,
    clock: &dyn Clock,
) -> Result<ResultItem, TargetError> {
    let mut fields = BTreeMap::new();

    for &kind in config.fields() {
        if kind == FieldKind::Timestamp {
            fields.insert(kind, FieldValue::Timestamp(clock.now()));
            continue;
        }

        let value = config
            .extractors()
            .get(kind)
            .and_then(|extractor| extractor.extract(document, context));

        let value = match value {
            Some(value) if !value.is_empty() => {
                if value.value_kind() != Some(kind.value_kind()) {
                    return Err(TargetError::Extraction {
                        url: context.requested_url.to_string(),
                        field: kind,
                        reason: format!(
                            "expected a {} value, extractor returned {:?}",
                            kind.value_kind(),
                            value
                        ),
                    });
                }
                if let FieldValue::Number(n) = &value {
                    if !n.is_finite() {
                        return Err(TargetError::Extraction {
                            url: context.requested_url.to_string(),
                            field: kind,
                            reason: format!("number {} is not finite", n),
                        });
                    }
                }
                value
            }
            _ if config.is_optional(kind) => FieldValue::Empty,
            _ => {
                return Err(TargetError::Extraction {
                    url: context.requested_url.to_string(),
                    field: kind,
                    reason: "required field not found on page".to_string(),
                });
            }
        };

        fields.insert(kind, value);
    }

    Ok(ResultItem::new(context.requested_url.to_string(), fields))
}
