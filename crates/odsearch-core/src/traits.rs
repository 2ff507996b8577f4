use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::schema::CollectionSpec;
use crate::types::{CollectionInfo, Metadata, RankerWeights, RawHit};

/// Which entry points an embedding backend actually implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub sync_batch: bool,
    pub sync_query: bool,
    pub async_batch: bool,
    pub async_query: bool,
}

impl Capabilities {
    pub const SYNC: Self = Self { sync_batch: true, sync_query: true, async_batch: false, async_query: false };
    pub const ASYNC: Self = Self { sync_batch: false, sync_query: false, async_batch: true, async_query: true };
}

/// A pluggable embedding provider.
///
/// Backends override the methods their capabilities advertise; the
/// remaining defaults report `UnsupportedOperation`. The `Embedder` wrapper
/// decides how to bridge between sync and async callers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Provider/model label used in logs and errors.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(unsupported(self.name(), "embed_documents"))
    }

    fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(unsupported(self.name(), "embed_query"))
    }

    async fn aembed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(unsupported(self.name(), "aembed_documents"))
    }

    async fn aembed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(unsupported(self.name(), "aembed_query"))
    }
}

fn unsupported(backend: &str, method: &str) -> Error {
    Error::UnsupportedOperation(format!("embedding backend '{backend}' does not implement '{method}'"))
}

/// One point as written to the index. `metadata` is left out of the payload
/// entirely when absent so older schemas accept the row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertRow {
    pub id: String,
    pub text: String,
    pub text_dense: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnData {
    Dense(Vec<Vec<f32>>),
    Text(Vec<String>),
}

impl AnnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One sub-search of a hybrid request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnRequest {
    pub anns_field: String,
    pub data: AnnData,
    pub limit: usize,
    pub filter: Option<Filter>,
    pub params: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridRequest {
    pub requests: Vec<AnnRequest>,
    pub weights: RankerWeights,
    pub limit: usize,
    pub output_fields: Vec<String>,
}

impl HybridRequest {
    /// Number of queries carried by each sub-request.
    pub fn num_queries(&self) -> usize {
        self.requests.first().map_or(0, |r| r.data.len())
    }
}

/// The vector index service as seen by the store: a black box with
/// collection lifecycle, point writes and fused multi-request search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend label for logs and error context.
    fn name(&self) -> &str;

    async fn list_collections(&self) -> Result<Vec<String>>;
    async fn has_collection(&self, collection: &str) -> Result<bool>;
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;
    async fn drop_collection(&self, collection: &str) -> Result<()>;
    async fn upsert(&self, collection: &str, rows: &[UpsertRow]) -> Result<()>;
    /// One ranked hit list per query, in query order.
    async fn hybrid_search(&self, collection: &str, request: &HybridRequest) -> Result<Vec<Vec<RawHit>>>;
    async fn get(&self, collection: &str, ids: &[String], output_fields: &[String]) -> Result<Vec<RawHit>>;
}

/// Operational collection management exposed over HTTP.
#[async_trait]
pub trait CollectionAdmin: Send + Sync {
    async fn describe(&self, collection: &str) -> Result<Value>;
    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo>;
    async fn load(&self, collection: &str) -> Result<()>;
    async fn release(&self, collection: &str) -> Result<()>;
    async fn rename(&self, collection: &str, new_name: &str) -> Result<()>;
    async fn list_aliases(&self, collection: &str) -> Result<Vec<String>>;
    async fn create_alias(&self, collection: &str, alias: &str) -> Result<()>;
    async fn drop_alias(&self, alias: &str) -> Result<()>;
}

