//! Feature-hashing embedder.
//!
//! Each lowercased alphanumeric token (and each adjacent token pair) is
//! hashed with SHA-256 to a bucket and a sign; the resulting term-frequency
//! vector is L2-normalized. Texts sharing vocabulary land close together
//! under cosine similarity. SHA-256 keeps bucket assignment stable across
//! builds, so persisted indexes stay valid.

use anyhow::{bail, Result};
use async_trait::async_trait;
use ragline_core::embedding::{l2_normalize, Embedder};
use ragline_core::error::CapabilityError;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;

const DEFAULT_DIMS: usize = 256;
const DEFAULT_MODEL: &str = "feature-hash-v1";

pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config.dims.unwrap_or(DEFAULT_DIMS);
        if dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self { model, dims })
    }

    /// Embed a single text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let mut v = vec![0.0f32; self.dims];
        for token in &tokens {
            self.add_feature(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, feature.as_bytes(), 0.5);
        }
        l2_normalize(&v)
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(word);
        let bucket = (h % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_core::embedding::{cosine_similarity, magnitude};

    fn embedder() -> HashEmbedder {
        HashEmbedder::new(&EmbeddingConfig::default()).unwrap()
    }

    #[test]
    fn test_dimension_and_norm() {
        let v = embedder().embed_text("Rust programming with cargo and crates");
        assert_eq!(v.len(), 256);
        assert!((magnitude(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let e = embedder();
        assert_eq!(e.embed_text("Hello, World"), e.embed_text("hello world"));
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = embedder();
        let query = e.embed_text("kubernetes deployment");
        let related = e.embed_text("Notes about Kubernetes deployment and Docker.");
        let unrelated = e.embed_text("Poetry about autumn leaves and rivers.");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = embedder().embed_text("  ... ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let e = embedder();
        let out = e
            .embed(&["a b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], e.embed_text("c"));
    }
}
