//! Cache-backed, batched, retrying front for an [`Embedder`].
//!
//! # Algorithm
//!
//! 1. Look every input text up in the [`EmbeddingCache`].
//! 2. De-duplicate the misses, keeping first-seen order.
//! 3. Split the misses into batches of `batch_size` and dispatch them with
//!    at most `max_parallel_batches` in flight. Each batch call goes through
//!    [`with_retry`], so transient failures back off and retry per batch.
//! 4. Validate each reply (one vector per input, declared dimension).
//! 5. Store the new vectors in the cache and reassemble the output in the
//!    original request order.
//!
//! `buffered` yields batch results in dispatch order regardless of which
//! batch finishes first, which is what keeps step 5 a simple walk.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::{EmbeddingCache, Embedder};
use crate::error::{Capability, RagError, Result};
use crate::models::EmbeddingVector;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_MAX_PARALLEL_BATCHES: usize = 4;

/// Wraps an [`Embedder`] with caching, batching, and retry.
#[derive(Clone)]
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    retry: RetryPolicy,
    batch_size: usize,
    max_parallel_batches: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            inner,
            cache,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_parallel_batches: DEFAULT_MAX_PARALLEL_BATCHES,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set batch size and parallelism.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] if either value is zero.
    pub fn with_batching(mut self, batch_size: usize, max_parallel_batches: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(RagError::config("embedding batch_size must be > 0"));
        }
        if max_parallel_batches == 0 {
            return Err(RagError::config("embedding max_parallel_batches must be > 0"));
        }
        self.batch_size = batch_size;
        self.max_parallel_batches = max_parallel_batches;
        Ok(self)
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub fn dims(&self) -> usize {
        self.inner.dims()
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Embed `texts`, returning one vector per input in the same order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.inner.model_name().to_string();

        let mut resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut pending: Vec<String> = Vec::new();
        let mut pending_pos: HashMap<&str, usize> = HashMap::new();

        for text in texts {
            match self.cache.get(&model, text) {
                Some(v) => resolved.push(Some(v)),
                None => {
                    resolved.push(None);
                    if !pending_pos.contains_key(text.as_str()) {
                        pending_pos.insert(text.as_str(), pending.len());
                        pending.push(text.clone());
                    }
                }
            }
        }

        debug!(
            model = %model,
            requested = texts.len(),
            cached = texts.len() - resolved.iter().filter(|r| r.is_none()).count(),
            to_embed = pending.len(),
            "Embedding request"
        );

        if !pending.is_empty() {
            let fresh = self.embed_uncached(&pending).await?;
            for (text, vector) in pending.iter().zip(fresh.iter()) {
                self.cache.insert(&model, text, vector.clone());
            }
            for (slot, text) in resolved.iter_mut().zip(texts) {
                if slot.is_none() {
                    if let Some(&pos) = pending_pos.get(text.as_str()) {
                        *slot = Some(fresh[pos].clone());
                    }
                }
            }
        }

        fill_slots(&model, resolved)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| RagError::PermanentCapability {
            capability: Capability::Embedding,
            message: "embedder returned no vector".to_string(),
        })
    }

    /// Dispatch batches in parallel and flatten the replies in order.
    async fn embed_uncached(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        let replies: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().enumerate())
            .map(|(i, batch)| async move {
                let (vectors, attempts) = with_retry(&self.retry, Capability::Embedding, |_| {
                    self.inner.embed(batch)
                })
                .await?;
                debug!(batch = i, of = batch_count, attempts, "Embedded batch");
                self.validate(batch.len(), &vectors)?;
                Ok::<_, RagError>(vectors)
            })
            .buffered(self.max_parallel_batches)
            .try_collect()
            .await?;

        Ok(replies.into_iter().flatten().collect())
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(RagError::PermanentCapability {
                capability: Capability::Embedding,
                message: format!(
                    "embedder returned {} vectors for {} inputs",
                    vectors.len(),
                    expected
                ),
            });
        }
        let dims = self.inner.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::PermanentCapability {
                capability: Capability::Embedding,
                message: format!(
                    "embedder declared {} dimensions but returned {}",
                    dims,
                    bad.len()
                ),
            });
        }
        Ok(())
    }
}

/// Turn resolved slots into vectors; an unfilled slot is a bug in the
/// reassembly and is reported instead of padded.
fn fill_slots(model: &str, resolved: Vec<Option<Vec<f32>>>) -> Result<Vec<EmbeddingVector>> {
    resolved
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.map(|values| EmbeddingVector::new(model, values))
                .ok_or_else(|| RagError::PermanentCapability {
                    capability: Capability::Embedding,
                    message: format!("no vector resolved for input {}", i),
                })
        })
        .collect()
}
