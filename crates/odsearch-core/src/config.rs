//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env
//! vars (`__` separates nesting, e.g. `APP_INDEX__URI`). The historical
//! `MILVUS_URI`, `MILVUS_TOKEN` and `RETRIEVER_BATCH_SIZE` variables are
//! honored on top of that.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::RankerWeights;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Loads config files from `dir` for the environment named by `RUST_ENV`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(dir, &env_name)
    }

    pub fn load_for_env(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment
            .merge(Env::prefixed("APP_").split("__"))
            .merge(legacy_env());
        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Configuration(format!("Failed to get '{key}': {e}")))
    }

    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn legacy_env() -> Env {
    Env::raw().filter_map(|key| match key.as_str().to_ascii_uppercase().as_str() {
        "MILVUS_URI" => Some("index.uri".into()),
        "MILVUS_TOKEN" => Some("index.token".into()),
        "RETRIEVER_BATCH_SIZE" => Some("retrieval.batch_size".into()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub server: ServerSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.batch_size == 0 {
            return Err(Error::Configuration("retrieval.batch_size must be positive".into()));
        }
        if self.retrieval.default_limit == 0 {
            return Err(Error::Configuration("retrieval.default_limit must be positive".into()));
        }
        if self.index.collection.trim().is_empty() {
            return Err(Error::Configuration("index.collection must not be empty".into()));
        }
        self.retrieval.weights().map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(())
    }

    /// Stricter check for processes whose writes must outlive them: the
    /// local backend needs `index.data_dir`.
    pub fn require_durable_index(&self) -> Result<()> {
        if self.index.backend == IndexBackendKind::Local && self.index.local_dir().is_none() {
            return Err(Error::Configuration(
                "index.backend = \"local\" needs index.data_dir (or APP_INDEX__DATA_DIR)".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hashing`, `openai` or `local`.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Used as-is when positive; otherwise the dimension is probed.
    pub dim: Option<usize>,
    pub api_base: Option<String>,
    pub api_key_env: String,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            dim: None,
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model_dir: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn configured_dim(&self) -> Option<usize> {
        self.dim.filter(|d| *d > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
    Milvus,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackendKind,
    pub uri: String,
    pub token: String,
    pub collection: String,
    pub timeout_ms: u64,
    pub ready_retries: u32,
    pub ready_backoff_ms: u64,
    /// Pause between attempts when an ingest batch fails transiently.
    pub retry_backoff_ms: u64,
    /// Where the `local` backend keeps its snapshot. Without it the local
    /// index lives in memory only.
    pub data_dir: Option<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackendKind::Milvus,
            uri: "http://localhost:19530".to_string(),
            token: "root:Milvus".to_string(),
            collection: "programs".to_string(),
            timeout_ms: 30_000,
            ready_retries: 10,
            ready_backoff_ms: 1_000,
            retry_backoff_ms: 500,
            data_dir: None,
        }
    }
}

impl IndexSettings {
    /// Expanded `data_dir`, if one is set.
    pub fn local_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(str::trim).filter(|d| !d.is_empty()).map(expand_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub batch_size: usize,
    pub default_limit: usize,
    pub request_timeout_ms: Option<u64>,
    pub ranker_weights: Vec<f32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            default_limit: 10,
            request_timeout_ms: Some(30_000),
            ranker_weights: vec![0.5, 0.5],
        }
    }
}

impl RetrievalSettings {
    pub fn weights(&self) -> Result<RankerWeights> {
        RankerWeights::try_from(self.ranker_weights.as_slice())
    }
}

/// Queries per hybrid-search call when nothing is configured.
pub fn default_batch_size() -> usize {
    if cfg!(target_os = "windows") {
        8
    } else {
        32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
