//! In-process BGE-M3 (XLM-RoBERTa) dense embedder on candle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result as AnyResult};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use odsearch_core::traits::{Capabilities, EmbeddingBackend};
use odsearch_core::{Error, Result};
use tokenizers::Tokenizer;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

const MAX_LEN: usize = 256;

pub struct LocalModelEmbedder {
    name: String,
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalModelEmbedder {
    /// Loads `tokenizer.json`, `config.json` and `pytorch_model.bin` from `model_dir`.
    pub fn load(name: &str, model_dir: &Path) -> AnyResult<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading embedding model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;
        let config: XLMRobertaConfig =
            serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        tracing::info!(name, "embedding model loaded");
        Ok(Self { name: name.to_string(), model, tokenizer, device })
    }

    fn embed_one(&self, text: &str) -> AnyResult<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let emb = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        let elapsed = start.elapsed().as_millis();
        if elapsed > 100 {
            tracing::debug!(elapsed_ms = elapsed as u64, "slow embedding");
        }
        Ok(emb)
    }
}

impl EmbeddingBackend for LocalModelEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SYNC
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| self.embed_one(t).map_err(|e| Error::provider("embed_documents", &self.name, e)))
            .collect()
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).map_err(|e| Error::provider("embed_query", &self.name, e))
    }
}

/// Explicit directory first, then `APP_MODEL_DIR`, `MODEL_DIR` and the
/// conventional `models/bge-m3` locations.
pub fn resolve_model_dir(configured: Option<&str>) -> AnyResult<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = configured {
        candidates.push(odsearch_core::config::expand_path(dir));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            candidates.push(PathBuf::from(dir));
        }
    }
    candidates.push(PathBuf::from("../models/bge-m3"));
    candidates.push(PathBuf::from("models/bge-m3"));
    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("could not locate the embedding model directory"))
}
