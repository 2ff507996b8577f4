//! Milvus RESTful (v2) client.
//!
//! Every endpoint is a POST returning `{code, message, data}`; a non-zero
//! `code` is a failure even under HTTP 200.

use std::time::Duration;

use async_trait::async_trait;
use odsearch_core::config::IndexSettings;
use odsearch_core::schema::{CollectionSpec, FieldType, FunctionKind, MetricType};
use odsearch_core::traits::{AnnData, CollectionAdmin, HybridRequest, UpsertRow, VectorIndex};
use odsearch_core::types::{CollectionInfo, RawHit};
use odsearch_core::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::schema::METADATA_FIELD;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

pub struct MilvusIndex {
    client: Client,
    base: String,
    token: Option<String>,
}

impl MilvusIndex {
    pub fn new(uri: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: uri.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    /// Builds the client and waits until the server answers, retrying with a
    /// fixed backoff.
    pub async fn connect(settings: &IndexSettings) -> Result<Self> {
        let index = Self::new(&settings.uri, Some(&settings.token), Duration::from_millis(settings.timeout_ms))?;
        index.wait_ready(settings.ready_retries, Duration::from_millis(settings.ready_backoff_ms)).await?;
        Ok(index)
    }

    pub async fn wait_ready(&self, retries: u32, backoff: Duration) -> Result<()> {
        let attempts = retries.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.list_collections().await {
                Ok(_) => {
                    tracing::info!(uri = %self.base, attempt, "vector index ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(uri = %self.base, attempt, error = %e, "vector index not ready");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last.unwrap_or_else(|| Error::provider("connect", &self.base, "server not ready")))
    }

    async fn call(&self, path: &str, target: &str, body: Value) -> Result<Value> {
        let operation = path.trim_start_matches("/v2/vectordb/");
        let mut req = self.client.post(format!("{}{path}", self.base)).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{operation} on '{target}'"))
            } else {
                Error::provider(operation, target, e)
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider(operation, target, format!("HTTP {status}: {text}")));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| Error::provider(operation, target, format!("malformed response: {e}")))?;
        if envelope.code != 0 {
            return Err(classify(operation, target, envelope.code, &envelope.message));
        }
        Ok(envelope.data)
    }

    async fn collection_call(&self, path: &str, collection: &str) -> Result<Value> {
        self.call(path, collection, json!({ "collectionName": collection })).await
    }

    async fn load_state(&self, collection: &str) -> Result<(String, i32)> {
        let data = self.collection_call("/v2/vectordb/collections/get_load_state", collection).await?;
        let raw = data.get("loadState").and_then(Value::as_str).unwrap_or_default();
        Ok(load_state_code(raw))
    }

    async fn row_count(&self, collection: &str) -> Result<Option<u64>> {
        let data = self.collection_call("/v2/vectordb/collections/get_stats", collection).await?;
        Ok(data.get("rowCount").and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))))
    }
}

/// `(state, code)` with 3 = loaded, 2 = loading, 1 = not loaded, 0 = missing.
fn load_state_code(raw: &str) -> (String, i32) {
    let code = match raw {
        "LoadStateLoaded" => 3,
        "LoadStateLoading" => 2,
        "LoadStateNotLoad" => 1,
        "LoadStateNotExist" => 0,
        _ => -1,
    };
    let state = match code {
        3 => "LOADED",
        -1 => "UNKNOWN",
        _ => "DISK",
    };
    (state.to_string(), code)
}

fn classify(operation: &str, target: &str, code: i64, message: &str) -> Error {
    let lower = message.to_ascii_lowercase();
    if lower.contains(METADATA_FIELD)
        && ["not exist", "not found", "does not", "unknown field"].iter().any(|p| lower.contains(p))
    {
        return Error::SchemaCompatibility(format!("{operation} on '{target}': {message}"));
    }
    if lower.contains("collection not found") || lower.contains("can't find collection") {
        return Error::NotFound(format!("collection '{target}'"));
    }
    Error::provider(operation, target, format!("code {code}: {message}"))
}

fn data_type(t: FieldType) -> &'static str {
    match t {
        FieldType::VarChar => "VarChar",
        FieldType::Json => "JSON",
        FieldType::FloatVector => "FloatVector",
        FieldType::SparseFloatVector => "SparseFloatVector",
    }
}

fn metric(m: MetricType) -> &'static str {
    match m {
        MetricType::InnerProduct => "IP",
        MetricType::Bm25 => "BM25",
    }
}

/// Request body for `collections/create`.
pub fn create_body(spec: &CollectionSpec) -> Value {
    let fields: Vec<Value> = spec
        .fields
        .iter()
        .map(|f| {
            let mut params = Map::new();
            if let Some(n) = f.max_length {
                params.insert("max_length".into(), json!(n.to_string()));
            }
            if let Some(d) = f.dim {
                params.insert("dim".into(), json!(d.to_string()));
            }
            if f.enable_analyzer {
                params.insert("enable_analyzer".into(), json!(true));
            }
            let mut field = json!({
                "fieldName": f.name,
                "dataType": data_type(f.data_type),
                "isPrimary": f.is_primary,
            });
            if !params.is_empty() {
                field["elementTypeParams"] = Value::Object(params);
            }
            field
        })
        .collect();
    let functions: Vec<Value> = spec
        .functions
        .iter()
        .map(|f| {
            let kind = match f.kind {
                FunctionKind::Bm25 => "BM25",
            };
            json!({
                "name": f.name,
                "type": kind,
                "inputFieldNames": f.input_fields,
                "outputFieldNames": f.output_fields,
                "params": {},
            })
        })
        .collect();
    let indexes: Vec<Value> = spec
        .indexes
        .iter()
        .map(|i| {
            let mut idx = json!({
                "fieldName": i.field,
                "indexName": i.name,
                "indexType": i.index_type,
                "metricType": metric(i.metric),
            });
            if !i.params.is_empty() {
                idx["params"] = Value::Object(i.params.clone());
            }
            idx
        })
        .collect();
    json!({
        "collectionName": spec.name,
        "schema": {
            "autoId": false,
            "enableDynamicField": false,
            "fields": fields,
            "functions": functions,
        },
        "indexParams": indexes,
    })
}

/// Request body for one query of a hybrid search.
pub fn hybrid_body(collection: &str, request: &HybridRequest, query: usize) -> Value {
    let search: Vec<Value> = request
        .requests
        .iter()
        .map(|r| {
            let data = match &r.data {
                AnnData::Dense(v) => json!([v.get(query)]),
                AnnData::Text(v) => json!([v.get(query)]),
            };
            let mut params = r.params.clone();
            let hints = params.remove("hints");
            let mut sub = json!({
                "data": data,
                "annsField": r.anns_field,
                "limit": r.limit,
                "params": { "params": params },
            });
            if let Some(h) = hints {
                sub["params"]["hints"] = h;
            }
            if let Some(f) = &r.filter {
                sub["filter"] = json!(f.to_expression());
            }
            sub
        })
        .collect();
    json!({
        "collectionName": collection,
        "search": search,
        "rerank": {
            "strategy": "weighted",
            "params": { "weights": request.weights.as_array(), "norm_score": true },
        },
        "limit": request.limit,
        "outputFields": request.output_fields,
    })
}

fn rows(data: Value) -> Vec<RawHit> {
    match data {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(RawHit::Map(m)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn strings(data: &Value) -> Vec<String> {
    data.as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for MilvusIndex {
    fn name(&self) -> &str {
        "milvus"
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let data = self.call("/v2/vectordb/collections/list", &self.base, json!({})).await?;
        Ok(strings(&data))
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let data = self.collection_call("/v2/vectordb/collections/has", collection).await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        self.call("/v2/vectordb/collections/create", &spec.name, create_body(spec)).await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collection_call("/v2/vectordb/collections/drop", collection).await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: &[UpsertRow]) -> Result<()> {
        let body = json!({ "collectionName": collection, "data": rows });
        let data = self.call("/v2/vectordb/entities/upsert", collection, body).await?;
        tracing::debug!(collection, rows = rows.len(), upserted = ?data.get("upsertCount"), "upsert");
        Ok(())
    }

    /// Sent as one request per query: the REST API flattens multi-query
    /// results into a single list.
    async fn hybrid_search(&self, collection: &str, request: &HybridRequest) -> Result<Vec<Vec<RawHit>>> {
        let mut out = Vec::with_capacity(request.num_queries());
        for q in 0..request.num_queries() {
            let data = self.call("/v2/vectordb/entities/hybrid_search", collection, hybrid_body(collection, request, q)).await?;
            out.push(rows(data));
        }
        Ok(out)
    }

    async fn get(&self, collection: &str, ids: &[String], output_fields: &[String]) -> Result<Vec<RawHit>> {
        let body = json!({ "collectionName": collection, "id": ids, "outputFields": output_fields });
        let data = self.call("/v2/vectordb/entities/get", collection, body).await?;
        Ok(rows(data))
    }
}

#[async_trait]
impl CollectionAdmin for MilvusIndex {
    async fn describe(&self, collection: &str) -> Result<Value> {
        self.collection_call("/v2/vectordb/collections/describe", collection).await
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let (state, state_code) = self.load_state(collection).await?;
        let n_entities = self.row_count(collection).await?;
        let aliases = self.list_aliases(collection).await?;
        Ok(CollectionInfo { name: collection.to_string(), state, state_code, n_entities, aliases })
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.collection_call("/v2/vectordb/collections/load", collection).await?;
        Ok(())
    }

    async fn release(&self, collection: &str) -> Result<()> {
        self.collection_call("/v2/vectordb/collections/release", collection).await?;
        Ok(())
    }

    async fn rename(&self, collection: &str, new_name: &str) -> Result<()> {
        let body = json!({ "collectionName": collection, "newCollectionName": new_name });
        self.call("/v2/vectordb/collections/rename", collection, body).await?;
        Ok(())
    }

    async fn list_aliases(&self, collection: &str) -> Result<Vec<String>> {
        let data = self.collection_call("/v2/vectordb/aliases/list", collection).await?;
        Ok(strings(&data))
    }

    async fn create_alias(&self, collection: &str, alias: &str) -> Result<()> {
        let body = json!({ "collectionName": collection, "aliasName": alias });
        self.call("/v2/vectordb/aliases/create", collection, body).await?;
        Ok(())
    }

    async fn drop_alias(&self, alias: &str) -> Result<()> {
        self.call("/v2/vectordb/aliases/drop", alias, json!({ "aliasName": alias })).await?;
        Ok(())
    }
}
