//! Local embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that, embedding runs fully offline. Inference is CPU-bound, so it runs
//! on the blocking pool, and the model is loaded once and reused.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use ragline_core::embedding::Embedder;
use ragline_core::error::{Capability, CapabilityError};

use crate::config::EmbeddingConfig;

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// A fastembed model ragline knows how to run, with its output width.
#[derive(Debug, Clone)]
struct LocalModel {
    name: &'static str,
    model: fastembed::EmbeddingModel,
    dims: usize,
}

/// Look up a local model by its config name.
fn local_model(name: &str) -> Option<LocalModel> {
    use fastembed::EmbeddingModel as M;

    let (name, model, dims) = match name {
        "all-minilm-l6-v2" => ("all-minilm-l6-v2", M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => ("bge-small-en-v1.5", M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => ("bge-base-en-v1.5", M::BGEBaseENV15, 768),
        "nomic-embed-text-v1.5" => ("nomic-embed-text-v1.5", M::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => ("multilingual-e5-small", M::MultilingualE5Small, 384),
        _ => return None,
    };
    Some(LocalModel { name, model, dims })
}

pub struct LocalEmbedder {
    spec: LocalModel,
    batch_size: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    /// # Errors
    ///
    /// Fails for a model name not in the local catalog, or when
    /// `embedding.dims` disagrees with what the model produces.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
        let Some(spec) = local_model(name) else {
            bail!(
                "Unknown local embedding model '{}'. Known: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5, \
                 multilingual-e5-small",
                name
            );
        };
        if let Some(dims) = config.dims {
            if dims != spec.dims {
                bail!(
                    "embedding.dims = {} but local model '{}' produces {}",
                    dims,
                    spec.name,
                    spec.dims
                );
            }
        }
        Ok(Self {
            spec,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        self.spec.name
    }

    fn dims(&self) -> usize {
        self.spec.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let loaded = self.loaded.clone();
        let model = self.spec.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let fail = |msg: String| CapabilityError::permanent(Capability::Embedding, msg);

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| fail("local embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                let init = fastembed::InitOptions::new(model).with_show_download_progress(true);
                let text_model = fastembed::TextEmbedding::try_new(init).map_err(|e| {
                    fail(format!("Failed to initialize local embedding model: {}", e))
                })?;
                *guard = Some(text_model);
            }
            let text_model = guard
                .as_mut()
                .ok_or_else(|| fail("local embedding model not loaded".to_string()))?;
            text_model
                .embed(texts, Some(batch_size))
                .map_err(|e| fail(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| fail(format!("Local embedding task failed: {}", e)))?
    }
}
