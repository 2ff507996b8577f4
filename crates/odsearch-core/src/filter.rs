//! Metadata predicates.
//!
//! The index service speaks a small string expression language over JSON
//! fields (`metadata["type"] in ["dataset"]`). Filters are built as values
//! here and rendered on the way out, so an embedded backend can evaluate the
//! same predicate without parsing strings back.

use serde_json::Value;

use crate::types::Metadata;

pub const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches when any of `keys` holds a string contained in `values`.
    MetadataIn { keys: Vec<String>, values: Vec<String> },
    /// An expression passed through verbatim to the index service.
    Raw(String),
}

impl Filter {
    /// Object-type filter over both spellings used by the harvested records.
    /// Blank entries are dropped; `None` when nothing is left.
    pub fn object_types<S: AsRef<str>>(types: &[S]) -> Option<Self> {
        let values: Vec<String> = types
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(Self::MetadataIn {
            keys: vec!["type".to_string(), "object_type".to_string()],
            values,
        })
    }

    pub fn to_expression(&self) -> String {
        match self {
            Self::Raw(expr) => expr.clone(),
            Self::MetadataIn { keys, values } => {
                let quoted = values
                    .iter()
                    .map(|v| quote(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                keys.iter()
                    .map(|k| format!("({METADATA_FIELD}[{}] in [{quoted}])", quote(k)))
                    .collect::<Vec<_>>()
                    .join(" or ")
            }
        }
    }

    /// In-process evaluation. `None` for raw expressions, which only the
    /// index service can interpret.
    pub fn matches(&self, metadata: Option<&Metadata>) -> Option<bool> {
        match self {
            Self::Raw(_) => None,
            Self::MetadataIn { keys, values } => {
                let Some(meta) = metadata else { return Some(false) };
                Some(keys.iter().any(|k| match meta.get(k) {
                    Some(Value::String(s)) => values.iter().any(|v| v == s),
                    _ => false,
                }))
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
