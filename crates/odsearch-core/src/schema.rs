//! Backend-neutral description of a collection: fields, derived functions
//! and indexes. Backends translate this into their own wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    VarChar,
    Json,
    FloatVector,
    SparseFloatVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: FieldType,
    pub is_primary: bool,
    pub max_length: Option<usize>,
    pub dim: Option<usize>,
    pub enable_analyzer: bool,
}

impl FieldSpec {
    pub fn varchar(name: &str, max_length: usize) -> Self {
        Self {
            name: name.to_string(),
            data_type: FieldType::VarChar,
            is_primary: false,
            max_length: Some(max_length),
            dim: None,
            enable_analyzer: false,
        }
    }

    pub fn json(name: &str) -> Self {
        Self { data_type: FieldType::Json, max_length: None, ..Self::varchar(name, 0) }
    }

    pub fn float_vector(name: &str, dim: usize) -> Self {
        Self { data_type: FieldType::FloatVector, max_length: None, dim: Some(dim), ..Self::varchar(name, 0) }
    }

    pub fn sparse_vector(name: &str) -> Self {
        Self { data_type: FieldType::SparseFloatVector, max_length: None, ..Self::varchar(name, 0) }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn analyzed(mut self) -> Self {
        self.enable_analyzer = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Bm25,
}

/// A server-side function deriving one field from others (e.g. BM25 sparse
/// vectors from raw text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub kind: FunctionKind,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    InnerProduct,
    Bm25,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub name: String,
    pub index_type: String,
    pub metric: MetricType,
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub functions: Vec<FunctionSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Dimension of the first dense vector field.
    pub fn dense_dim(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|f| f.data_type == FieldType::FloatVector)
            .and_then(|f| f.dim)
    }
}
