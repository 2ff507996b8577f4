use std::sync::Arc;

use odsearch_core::config::EmbeddingSettings;
use odsearch_core::traits::EmbeddingBackend;
use odsearch_core::{Error, Result};

use crate::hashing::HashingEmbedder;
use crate::openai::OpenAiEmbedder;

/// Dimension of the hashing backend when none is configured.
pub const DEFAULT_HASHING_DIM: usize = 384;

/// Builds the backend named by `embedding.provider`.
pub fn backend_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingBackend>> {
    let provider = settings.provider.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let model = settings.model.as_deref().map(str::trim).filter(|m| !m.is_empty());
    let (Some(provider), Some(model)) = (provider, model) else {
        return Err(Error::Configuration(
            "embedding configuration missing 'provider' and/or 'model'".to_string(),
        ));
    };

    tracing::info!(provider, model, "initializing embedding backend");
    match provider.to_ascii_lowercase().as_str() {
        "hashing" => {
            let dim = settings.configured_dim().unwrap_or(DEFAULT_HASHING_DIM);
            Ok(Arc::new(HashingEmbedder::named(format!("hashing/{model}"), dim)?))
        }
        "openai" => {
            let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                tracing::warn!(var = %settings.api_key_env, "no API key in environment; sending unauthenticated requests");
            }
            let backend = OpenAiEmbedder::new(model, settings.api_base.as_deref(), api_key)?
                .with_dimensions(settings.configured_dim());
            Ok(Arc::new(backend))
        }
        "local" => local_backend(settings, model),
        other => Err(Error::Configuration(format!(
            "unknown embedding provider '{other}' (expected hashing, openai or local)"
        ))),
    }
}

#[cfg(feature = "local-model")]
fn local_backend(settings: &EmbeddingSettings, model: &str) -> Result<Arc<dyn EmbeddingBackend>> {
    let dir = crate::local::resolve_model_dir(settings.model_dir.as_deref())
        .map_err(|e| Error::Configuration(e.to_string()))?;
    let backend = crate::local::LocalModelEmbedder::load(model, &dir)
        .map_err(|e| Error::Configuration(format!("failed to load model from {}: {e}", dir.display())))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "local-model"))]
fn local_backend(_settings: &EmbeddingSettings, model: &str) -> Result<Arc<dyn EmbeddingBackend>> {
    Err(Error::Configuration(format!(
        "embedding model '{model}' needs the local provider, which this build does not include (enable the `local-model` feature)"
    )))
}
