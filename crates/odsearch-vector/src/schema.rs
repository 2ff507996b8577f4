//! The catalogue collection layout.

use odsearch_core::schema::{CollectionSpec, FieldSpec, FunctionKind, FunctionSpec, IndexSpec, MetricType};
use serde_json::{json, Map};

pub use odsearch_core::filter::METADATA_FIELD;

pub const ID_FIELD: &str = "id";
pub const TEXT_FIELD: &str = "text";
pub const DENSE_FIELD: &str = "text_dense";
pub const SPARSE_FIELD: &str = "text_sparse";

/// Room for a hyphenated UUID.
pub const ID_MAX_LEN: usize = 36;
pub const TEXT_MAX_LEN: usize = 8000;

/// Longest prefix of `s` that fits `max_bytes` without splitting a char.
/// VarChar `max_length` counts UTF-8 bytes, not chars.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..end]
}

pub const BM25_FUNCTION: &str = "text_bm25_emb";
pub const DENSE_INDEX: &str = "text_dense_index";
pub const SPARSE_INDEX: &str = "text_sparse_index";

pub fn catalogue_collection(name: &str, dim: usize) -> CollectionSpec {
    let mut sparse_params = Map::new();
    sparse_params.insert("inverted_index_algo".into(), json!("DAAT_MAXSCORE"));
    CollectionSpec {
        name: name.to_string(),
        fields: vec![
            FieldSpec::varchar(ID_FIELD, ID_MAX_LEN).primary(),
            FieldSpec::json(METADATA_FIELD),
            FieldSpec::varchar(TEXT_FIELD, TEXT_MAX_LEN).analyzed(),
            FieldSpec::float_vector(DENSE_FIELD, dim),
            FieldSpec::sparse_vector(SPARSE_FIELD),
        ],
        functions: vec![FunctionSpec {
            name: BM25_FUNCTION.to_string(),
            kind: FunctionKind::Bm25,
            input_fields: vec![TEXT_FIELD.to_string()],
            output_fields: vec![SPARSE_FIELD.to_string()],
        }],
        indexes: vec![
            IndexSpec {
                field: DENSE_FIELD.to_string(),
                name: DENSE_INDEX.to_string(),
                index_type: "AUTOINDEX".to_string(),
                metric: MetricType::InnerProduct,
                params: Map::new(),
            },
            IndexSpec {
                field: SPARSE_FIELD.to_string(),
                name: SPARSE_INDEX.to_string(),
                index_type: "SPARSE_INVERTED_INDEX".to_string(),
                metric: MetricType::Bm25,
                params: sparse_params,
            },
        ],
    }
}
