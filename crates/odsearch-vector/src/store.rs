//! Writes and hybrid search against the catalogue collection.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use odsearch_core::filter::Filter;
use odsearch_core::traits::{AnnData, AnnRequest, HybridRequest, UpsertRow, VectorIndex};
use odsearch_core::types::{Metadata, RankerWeights, RawHit, StoredRecord};
use odsearch_core::{Error, Result};
use serde_json::{json, Map, Value};

use crate::collection::CollectionManager;
use crate::schema::{DENSE_FIELD, ID_FIELD, METADATA_FIELD, SPARSE_FIELD, TEXT_FIELD};

pub const MIN_CANDIDATES: usize = 512;
pub const MAX_CANDIDATES: usize = 16_384;
pub const DENSE_NPROBE: u32 = 10;
pub const SPARSE_DROP_RATIO: f32 = 0.2;

/// Per-request candidate pool for each sub-search.
pub fn candidate_pool(limit: usize) -> usize {
    limit.saturating_mul(10).clamp(MIN_CANDIDATES, MAX_CANDIDATES)
}

const UNKNOWN: u8 = 0;
const SUPPORTED: u8 = 1;
const UNSUPPORTED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSupport {
    Unknown,
    Supported,
    Unsupported,
}

pub struct VectorStore {
    manager: Arc<CollectionManager>,
    metadata: AtomicU8,
}

impl VectorStore {
    pub fn new(manager: Arc<CollectionManager>) -> Self {
        Self { manager, metadata: AtomicU8::new(UNKNOWN) }
    }

    /// Builds the store and makes sure its collection exists.
    pub async fn open(manager: Arc<CollectionManager>) -> Result<Self> {
        manager.ensure().await?;
        Ok(Self::new(manager))
    }

    pub fn collection(&self) -> &str {
        self.manager.name()
    }

    pub fn dim(&self) -> usize {
        self.manager.dim()
    }

    pub fn manager(&self) -> &Arc<CollectionManager> {
        &self.manager
    }

    fn index(&self) -> &Arc<dyn VectorIndex> {
        self.manager.index()
    }

    pub fn metadata_support(&self) -> MetadataSupport {
        match self.metadata.load(Ordering::Acquire) {
            SUPPORTED => MetadataSupport::Supported,
            UNSUPPORTED => MetadataSupport::Unsupported,
            _ => MetadataSupport::Unknown,
        }
    }

    fn mark_metadata(&self, support: MetadataSupport) {
        let v = match support {
            MetadataSupport::Unknown => UNKNOWN,
            MetadataSupport::Supported => SUPPORTED,
            MetadataSupport::Unsupported => UNSUPPORTED,
        };
        if self.metadata.swap(v, Ordering::AcqRel) != v && support == MetadataSupport::Unsupported {
            tracing::warn!(collection = self.collection(), "collection has no metadata field; writing and reading without it");
        }
    }

    fn check_dim(&self, what: &str, i: usize, v: &[f32]) -> Result<()> {
        let expected = self.dim();
        if v.len() != expected {
            return Err(Error::Validation(format!(
                "{what}[{i}] has dim {} but collection expects {expected}",
                v.len()
            )));
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.manager.reset().await?;
        self.mark_metadata(MetadataSupport::Unknown);
        Ok(())
    }

    /// Last-write-wins on `id`. All inputs are validated before the index
    /// is contacted.
    pub async fn upsert(
        &self,
        ids: &[String],
        texts: &[String],
        dense_vectors: &[Vec<f32>],
        metadatas: Option<&[Metadata]>,
    ) -> Result<()> {
        if ids.len() != texts.len() || ids.len() != dense_vectors.len() {
            return Err(Error::Validation(format!(
                "ids, texts, dense_vectors must be the same length (got {}, {}, {})",
                ids.len(),
                texts.len(),
                dense_vectors.len()
            )));
        }
        if let Some(m) = metadatas {
            if m.len() != ids.len() {
                return Err(Error::Validation(format!(
                    "metadatas must match ids in length (got {}, expected {})",
                    m.len(),
                    ids.len()
                )));
            }
        }
        for (i, v) in dense_vectors.iter().enumerate() {
            self.check_dim("dense_vectors", i, v)?;
        }
        if ids.is_empty() {
            return Ok(());
        }

        let rows = |with_metadata: bool| -> Vec<UpsertRow> {
            (0..ids.len())
                .map(|i| UpsertRow {
                    id: ids[i].clone(),
                    text: texts[i].clone(),
                    text_dense: dense_vectors[i].clone(),
                    metadata: metadatas.filter(|_| with_metadata).map(|m| m[i].clone()),
                })
                .collect()
        };

        let index = self.index();
        let collection = self.collection();
        if metadatas.is_none() || self.metadata_support() == MetadataSupport::Unsupported {
            return index.upsert(collection, &rows(false)).await;
        }
        match index.upsert(collection, &rows(true)).await {
            Ok(()) => {
                self.mark_metadata(MetadataSupport::Supported);
                Ok(())
            }
            Err(e) if self.metadata_support() == MetadataSupport::Supported => Err(e),
            Err(e) => {
                tracing::warn!(collection, error = %e, "upsert with metadata failed; retrying without metadata");
                index.upsert(collection, &rows(false)).await?;
                if matches!(e, Error::SchemaCompatibility(_)) {
                    self.mark_metadata(MetadataSupport::Unsupported);
                }
                Ok(())
            }
        }
    }

    /// Fused dense + BM25 search, one hit list per query (in query order),
    /// each holding at most `limit` hits.
    pub async fn hybrid_search(
        &self,
        query_texts: &[String],
        query_denses: &[Vec<f32>],
        limit: usize,
        weights: Option<RankerWeights>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Vec<RawHit>>> {
        if query_texts.len() != query_denses.len() {
            return Err(Error::Validation(format!(
                "query_texts and query_denses must be the same length (got {}, {})",
                query_texts.len(),
                query_denses.len()
            )));
        }
        if query_texts.is_empty() {
            return Ok(Vec::new());
        }
        if limit == 0 {
            return Err(Error::Validation("limit must be positive".to_string()));
        }
        for (i, v) in query_denses.iter().enumerate() {
            self.check_dim("query_denses", i, v)?;
        }

        let pool = candidate_pool(limit);
        let sub = |field: &str, data: AnnData, params: Value| {
            let mut params = match params {
                Value::Object(m) => m,
                _ => Map::new(),
            };
            if filter.is_some() {
                params.insert("hints".into(), json!("iterative_filter"));
            }
            AnnRequest { anns_field: field.to_string(), data, limit: pool, filter: filter.cloned(), params }
        };
        let mut request = HybridRequest {
            requests: vec![
                sub(DENSE_FIELD, AnnData::Dense(query_denses.to_vec()), json!({"nprobe": DENSE_NPROBE})),
                sub(SPARSE_FIELD, AnnData::Text(query_texts.to_vec()), json!({"drop_ratio_search": SPARSE_DROP_RATIO})),
            ],
            weights: weights.unwrap_or_default(),
            limit,
            output_fields: self.output_fields(&[ID_FIELD, TEXT_FIELD]),
        };
        tracing::debug!(
            collection = self.collection(),
            queries = query_texts.len(),
            limit,
            pool,
            filtered = filter.is_some(),
            "hybrid search"
        );

        let with_metadata = request.output_fields.iter().any(|f| f == METADATA_FIELD);
        match self.index().hybrid_search(self.collection(), &request).await {
            Ok(hits) => {
                if with_metadata {
                    self.mark_metadata(MetadataSupport::Supported);
                }
                Ok(hits)
            }
            Err(e) if !with_metadata || self.metadata_support() == MetadataSupport::Supported => Err(e),
            Err(e) => {
                tracing::warn!(collection = self.collection(), error = %e, "hybrid search with metadata failed; retrying without metadata");
                request.output_fields.retain(|f| f != METADATA_FIELD);
                let hits = self.index().hybrid_search(self.collection(), &request).await?;
                if matches!(e, Error::SchemaCompatibility(_)) {
                    self.mark_metadata(MetadataSupport::Unsupported);
                }
                Ok(hits)
            }
        }
    }

    /// Reads one stored point back, `None` when the id is unknown.
    pub async fn fetch(&self, id: &str) -> Result<Option<StoredRecord>> {
        let ids = [id.to_string()];
        let fields = self.output_fields(&[ID_FIELD, TEXT_FIELD, DENSE_FIELD]);
        let with_metadata = fields.iter().any(|f| f == METADATA_FIELD);
        let rows = match self.index().get(self.collection(), &ids, &fields).await {
            Ok(rows) => rows,
            Err(e) if with_metadata && matches!(e, Error::SchemaCompatibility(_)) => {
                self.mark_metadata(MetadataSupport::Unsupported);
                let fields = self.output_fields(&[ID_FIELD, TEXT_FIELD, DENSE_FIELD]);
                self.index().get(self.collection(), &ids, &fields).await?
            }
            Err(e) => return Err(e),
        };
        rows.into_iter().next().map(stored_record).transpose()
    }

    fn output_fields(&self, base: &[&str]) -> Vec<String> {
        let mut fields: Vec<String> = base.iter().map(|f| f.to_string()).collect();
        if self.metadata_support() != MetadataSupport::Unsupported {
            fields.push(METADATA_FIELD.to_string());
        }
        fields
    }
}

fn stored_record(hit: RawHit) -> Result<StoredRecord> {
    match hit {
        RawHit::Entity(h) => Ok(StoredRecord {
            id: h.id,
            text: h.text.unwrap_or_default(),
            dense: h.dense.unwrap_or_default(),
            metadata: h.metadata,
        }),
        RawHit::Map(mut row) => {
            let id = match row.remove(ID_FIELD) {
                Some(Value::String(s)) => s,
                Some(Value::Number(n)) => n.to_string(),
                other => {
                    return Err(Error::DataIntegrity(format!("stored row has no usable id: {other:?}")));
                }
            };
            let text = match row.remove(TEXT_FIELD) {
                Some(Value::String(s)) => s,
                _ => String::new(),
            };
            let dense = match row.remove(DENSE_FIELD) {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .map(|f| f as f32)
                            .ok_or_else(|| Error::DataIntegrity(format!("non-numeric vector component in '{id}'")))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                _ => Vec::new(),
            };
            let metadata = match row.remove(METADATA_FIELD) {
                Some(Value::Object(m)) => Some(m),
                _ => None,
            };
            Ok(StoredRecord { id, text, dense, metadata })
        }
    }
}
