//! odsearch-embed
//!
//! `Embedder` wraps one pluggable `EmbeddingBackend` and gives every caller
//! the same four entry points (sync/async, single/batch) whatever the
//! backend natively supports. It also owns the vector dimensionality of the
//! deployment: configured up front or probed once, then used to flag drift.

use std::sync::Arc;

use odsearch_core::traits::{Capabilities, EmbeddingBackend};
use odsearch_core::{blocking, Error, Result};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

pub mod factory;
pub mod hashing;
pub mod openai;

#[cfg(feature = "local-model")]
pub mod device;
#[cfg(feature = "local-model")]
pub mod local;
#[cfg(feature = "local-model")]
pub mod pool;
#[cfg(feature = "local-model")]
pub mod tokenize;

pub use factory::backend_from_settings;
pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;
#[cfg(feature = "local-model")]
pub use pool::masked_mean_l2;

/// Text embedded to discover the output dimension of a backend.
pub const PROBE_TEXT: &str = "Hello World!";

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    dim: OnceCell<usize>,
    probe_lock: Mutex<()>,
}

impl Embedder {
    /// `configured_dim` is taken as the dimension when positive; otherwise it
    /// is probed on first use.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, configured_dim: Option<usize>) -> Self {
        let configured = configured_dim.filter(|d| *d > 0);
        if let Some(d) = configured {
            tracing::info!(dim = d, backend = backend.name(), "using configured embedding dimension");
        }
        Self { backend, dim: OnceCell::new_with(configured), probe_lock: Mutex::new(()) }
    }

    pub fn from_settings(settings: &odsearch_core::config::EmbeddingSettings) -> Result<Self> {
        let backend = backend_from_settings(settings)?;
        Ok(Self::new(backend, settings.configured_dim()))
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    fn caps(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Dimension if already known, without probing.
    pub fn cached_dim(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    pub fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vecs = self.raw_documents(texts)?;
        self.check_batch(texts.len(), &vecs, "embed_documents")?;
        Ok(vecs)
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vec = self.raw_query(text)?;
        self.record_dim(vec.len(), "embed_query");
        Ok(vec)
    }

    pub async fn aembed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vecs = self.raw_adocuments(texts).await?;
        self.check_batch(texts.len(), &vecs, "aembed_documents")?;
        Ok(vecs)
    }

    pub async fn aembed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vec = self.raw_aquery(text).await?;
        self.record_dim(vec.len(), "aembed_query");
        Ok(vec)
    }

    /// Embedding dimension, probing the backend at most once.
    pub fn dim(&self) -> Result<usize> {
        if let Some(d) = self.dim.get() {
            return Ok(*d);
        }
        let _guard = self.probe_lock.lock();
        if let Some(d) = self.dim.get() {
            return Ok(*d);
        }
        let caps = self.caps();
        let probe = if caps.sync_batch || caps.async_batch {
            self.raw_documents(&[PROBE_TEXT.to_string()])?.into_iter().next().unwrap_or_default()
        } else {
            self.raw_query(PROBE_TEXT)?
        };
        let d = self.accept_probe(&probe)?;
        let _ = self.dim.set(d);
        Ok(self.dim.get().copied().unwrap_or(d))
    }

    /// Async counterpart of [`Embedder::dim`]; concurrent callers share one probe.
    pub async fn adim(&self) -> Result<usize> {
        self.dim
            .get_or_try_init(|| async {
                let caps = self.caps();
                let probe = if caps.sync_batch || caps.async_batch {
                    self.raw_adocuments(&[PROBE_TEXT.to_string()]).await?.into_iter().next().unwrap_or_default()
                } else {
                    self.raw_aquery(PROBE_TEXT).await?
                };
                self.accept_probe(&probe)
            })
            .await
            .copied()
    }

    fn accept_probe(&self, probe: &[f32]) -> Result<usize> {
        if probe.is_empty() {
            return Err(Error::provider(
                "probe_dimension",
                self.name(),
                "embedding model returned an empty vector",
            ));
        }
        tracing::info!(dim = probe.len(), backend = self.name(), "probed embedding dimension");
        Ok(probe.len())
    }

    fn raw_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let caps = self.caps();
        if caps.sync_batch {
            self.backend.embed_documents(texts)
        } else if caps.async_batch {
            tracing::debug!(backend = self.name(), "driving async batch embedding from sync caller");
            blocking::block_on(self.backend.aembed_documents(texts))?
        } else {
            Err(self.no_batch())
        }
    }

    fn raw_query(&self, text: &str) -> Result<Vec<f32>> {
        if self.caps().sync_query {
            return self.backend.embed_query(text);
        }
        let mut vecs = self.raw_documents(&[text.to_string()])?;
        self.check_count(1, vecs.len(), "embed_query")?;
        Ok(vecs.swap_remove(0))
    }

    async fn raw_adocuments(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let caps = self.caps();
        if caps.async_batch {
            self.backend.aembed_documents(texts).await
        } else if caps.sync_batch {
            tracing::debug!(backend = self.name(), "using sync embed_documents on a blocking worker");
            let backend = Arc::clone(&self.backend);
            let owned = texts.to_vec();
            tokio::task::spawn_blocking(move || backend.embed_documents(&owned))
                .await
                .map_err(|e| Error::provider("aembed_documents", self.name(), e))?
        } else {
            Err(self.no_batch())
        }
    }

    async fn raw_aquery(&self, text: &str) -> Result<Vec<f32>> {
        let caps = self.caps();
        if caps.async_query {
            return self.backend.aembed_query(text).await;
        }
        if caps.sync_query {
            tracing::debug!(backend = self.name(), "using sync embed_query on a blocking worker");
            let backend = Arc::clone(&self.backend);
            let owned = text.to_string();
            return tokio::task::spawn_blocking(move || backend.embed_query(&owned))
                .await
                .map_err(|e| Error::provider("aembed_query", self.name(), e))?;
        }
        let mut vecs = self.raw_adocuments(&[text.to_string()]).await?;
        self.check_count(1, vecs.len(), "aembed_query")?;
        Ok(vecs.swap_remove(0))
    }

    fn check_batch(&self, expected: usize, vecs: &[Vec<f32>], source: &str) -> Result<()> {
        self.check_count(expected, vecs.len(), source)?;
        for v in vecs {
            self.record_dim(v.len(), source);
        }
        Ok(())
    }

    fn check_count(&self, expected: usize, got: usize, source: &str) -> Result<()> {
        if expected == got {
            return Ok(());
        }
        Err(Error::provider(
            source,
            self.name(),
            format!("expected {expected} vectors, provider returned {got}"),
        ))
    }

    fn record_dim(&self, len: usize, source: &str) {
        if len == 0 {
            return;
        }
        match self.dim.get() {
            Some(cached) if *cached != len => {
                tracing::warn!(cached = *cached, new = len, source, "embedding dimension mismatch detected");
            }
            Some(_) => {}
            None => {
                if self.dim.set(len).is_ok() {
                    tracing::info!(dim = len, source, "cached embedding dimension");
                }
            }
        }
    }

    fn no_batch(&self) -> Error {
        Error::UnsupportedOperation(format!(
            "embedding backend '{}' implements neither embed_documents nor aembed_documents",
            self.name()
        ))
    }
}
