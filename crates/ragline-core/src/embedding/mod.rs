//! Embedding capability trait, embedding cache, and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! plus pure helper functions for vector math and serialization.
//!
//! - [`EmbeddingCache`] memoizes vectors by model identity + exact text.
//! - [`CachedEmbedder`] puts the cache, batching, parallel dispatch, and
//!   retry policy in front of an [`Embedder`].
//!
//! Concrete providers (OpenAI, Ollama, local hashing, fastembed) live in
//! the `ragline` application crate.

mod cache;
mod cached;

pub use cache::{cache_key, CacheStats, EmbeddingCache};
pub use cached::CachedEmbedder;

use async_trait::async_trait;

use crate::error::CapabilityError;

/// An embedding backend: text in, fixed-length vectors out.
///
/// Implementations classify failures as transient (network, rate limit,
/// server error) or permanent (malformed request, bad credentials) via
/// [`CapabilityError`]; retrying is the caller's job.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError>;
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use ragline_core::embedding::{vec_to_bytes, bytes_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let bytes = vec_to_bytes(&v);
/// assert_eq!(bytes.len(), 12); // 3 × 4 bytes
/// assert_eq!(bytes_to_vec(&bytes), v);
/// ```
pub fn vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
///
/// Reverses [`vec_to_bytes`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Dot product of two equal-length vectors (0.0 on length mismatch).
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean (L2) norm.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Return a unit-length copy of `v`. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let mag = magnitude(v);
    if mag < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
