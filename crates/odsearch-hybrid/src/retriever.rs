use std::sync::Arc;

use odsearch_core::config::default_batch_size;
use odsearch_core::filter::Filter;
use odsearch_core::types::{Hit, RankerWeights, RawHit, SearchItem};
use odsearch_core::{blocking, Error, Result};
use odsearch_embed::Embedder;
use odsearch_vector::VectorStore;
use serde_json::{Map, Value};
use uuid::Uuid;

pub struct Retriever {
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
    batch_size: usize,
    weights: RankerWeights,
}

impl Retriever {
    pub fn new(embedder: Arc<Embedder>, store: Arc<VectorStore>) -> Self {
        Self { embedder, store, batch_size: default_batch_size(), weights: RankerWeights::default() }
    }

    /// Queries per index round trip. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_weights(mut self, weights: RankerWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub async fn aretrieve(&self, query: &str, limit: usize, filter: Option<&Filter>) -> Result<Vec<SearchItem>> {
        let dense = self.embedder.aembed_query(query).await?;
        let mut lists = self
            .store
            .hybrid_search(&[query.to_string()], &[dense], limit, Some(self.weights), filter)
            .await?;
        let hits = if lists.is_empty() { Vec::new() } else { lists.swap_remove(0) };
        hits.into_iter().map(to_search_item).collect()
    }

    /// One result list per query, in input order. Queries are embedded in a
    /// single call, then searched `batch_size` at a time.
    pub async fn aretrieve_batch(
        &self,
        queries: &[String],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Vec<SearchItem>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let denses = self.embedder.aembed_documents(queries).await?;
        let mut out = Vec::with_capacity(queries.len());
        for (texts, vectors) in queries.chunks(self.batch_size).zip(denses.chunks(self.batch_size)) {
            let lists = self
                .store
                .hybrid_search(texts, vectors, limit, Some(self.weights), filter)
                .await?;
            if lists.len() != texts.len() {
                return Err(Error::provider(
                    "hybrid_search",
                    self.store.collection(),
                    format!("index answered {} result lists for {} queries", lists.len(), texts.len()),
                ));
            }
            for hits in lists {
                out.push(hits.into_iter().map(to_search_item).collect::<Result<Vec<_>>>()?);
            }
        }
        tracing::debug!(queries = queries.len(), batch_size = self.batch_size, "batch retrieval done");
        Ok(out)
    }

    /// Neighbours of an already stored record, excluding the record itself.
    pub async fn aretrieve_similar(
        &self,
        source_id: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchItem>> {
        let source = self
            .store
            .fetch(source_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("record '{source_id}'")))?;
        let dense = if source.dense.len() == self.store.dim() {
            source.dense
        } else {
            tracing::debug!(source_id, "stored vector unusable; re-embedding source text");
            self.embedder.aembed_query(&source.text).await?
        };
        let mut lists = self
            .store
            .hybrid_search(&[source.text], &[dense], limit.saturating_add(1), Some(self.weights), filter)
            .await?;
        let hits = if lists.is_empty() { Vec::new() } else { lists.swap_remove(0) };
        let mut items = hits.into_iter().map(to_search_item).collect::<Result<Vec<_>>>()?;
        items.retain(|item| !same_id(item.id, source_id));
        items.truncate(limit);
        Ok(items)
    }

    /// Blocking form of [`Retriever::aretrieve`]. Refuses to run inside an
    /// async runtime.
    pub fn retrieve(&self, query: &str, limit: usize, filter: Option<&Filter>) -> Result<Vec<SearchItem>> {
        blocking::block_on(self.aretrieve(query, limit, filter))?
    }

    pub fn retrieve_batch(
        &self,
        queries: &[String],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Vec<SearchItem>>> {
        blocking::block_on(self.aretrieve_batch(queries, limit, filter))?
    }

    pub fn retrieve_similar(&self, source_id: &str, limit: usize, filter: Option<&Filter>) -> Result<Vec<SearchItem>> {
        blocking::block_on(self.aretrieve_similar(source_id, limit, filter))?
    }
}

fn same_id(id: Uuid, raw: &str) -> bool {
    Uuid::parse_str(raw.trim()).map_or(false, |other| other == id)
}

/// Normalizes one index hit. Remote rows may nest their fields under
/// `entity`; top-level keys win when both are present.
pub fn to_search_item(hit: RawHit) -> Result<SearchItem> {
    let hit = match hit {
        RawHit::Entity(h) => h,
        RawHit::Map(row) => hit_from_map(row),
    };
    let id = Uuid::parse_str(hit.id.trim())
        .map_err(|e| Error::DataIntegrity(format!("result id '{}' is not a UUID: {e}", hit.id)))?;
    Ok(SearchItem { id, text: hit.text.unwrap_or_default(), distance: hit.distance, metadata: hit.metadata })
}

fn hit_from_map(mut row: Map<String, Value>) -> Hit {
    let mut entity = match row.remove("entity") {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    let mut take = |key: &str| row.remove(key).or_else(|| entity.remove(key));
    let id = match take("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let distance = take("distance").or_else(|| take("score")).and_then(|v| v.as_f64()).map(|d| d as f32);
    let text = match take("text") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    let metadata = match take("metadata") {
        Some(Value::Object(m)) => Some(m),
        _ => None,
    };
    Hit { id, distance, text, metadata, dense: None }
}
