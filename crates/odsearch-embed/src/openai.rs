//! OpenAI-compatible `/embeddings` client.
//!
//! Works against api.openai.com and the many self-hosted servers that mimic
//! it. Only the async batch entry point is native; the `Embedder` derives
//! the others.

use std::time::Duration;

use async_trait::async_trait;
use odsearch_core::traits::{Capabilities, EmbeddingBackend};
use odsearch_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, api_base: Option<&str>, api_key: Option<String>) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(Error::Configuration("openai embedder needs a model name".into()));
        }
        let base = api_base.unwrap_or(DEFAULT_API_BASE).trim_end_matches('/');
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint: format!("{base}/embeddings"), api_key, model, dimensions: None })
    }

    /// Requests shortened vectors. Only the `text-embedding-3` family honors it.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions.filter(|_| self.model.starts_with("text-embedding-3"));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { async_batch: true, ..Capabilities::default() }
    }

    async fn aembed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest { model: &self.model, input: texts, dimensions: self.dimensions };
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::provider("embeddings", &self.model, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider("embeddings", &self.model, format!("HTTP {status}: {text}")));
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Error::provider("embeddings", &self.model, format!("malformed response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        tracing::debug!(count = parsed.data.len(), model = %self.model, "embeddings received");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
