//! Deterministic feature-hashing embedder.
//!
//! Needs no model files or network, which makes it the default for local
//! development and for tests. Texts sharing words end up close in inner
//! product space; that is all it promises.

use std::hash::{Hash, Hasher};

use odsearch_core::traits::{Capabilities, EmbeddingBackend};
use odsearch_core::{Error, Result};
use twox_hash::XxHash64;

pub struct HashingEmbedder {
    name: String,
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        Self::named("hashing", dim)
    }

    pub fn named(name: impl Into<String>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Configuration("hashing embedder needs a positive dimension".into()));
        }
        Ok(Self { name: name.into(), dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SYNC
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let e = HashingEmbedder::new(64).unwrap();
        let a = e.embed_text("Tram stops, Berlin");
        let b = e.embed_text("tram STOPS berlin");
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn zero_dimension_is_a_configuration_error() {
        assert!(matches!(HashingEmbedder::new(0), Err(Error::Configuration(_))));
    }
}
