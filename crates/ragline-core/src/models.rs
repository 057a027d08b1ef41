//! Core data models shared by the ingestion and query paths.
//!
//! These types represent the documents, chunks, embedding vectors, and
//! index entries that flow through the retrieval engine. Documents and
//! chunks are immutable once created; re-ingesting a document replaces it
//! wholesale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 of a document's source.
const DOCUMENT_ID_LEN: usize = 32;

/// A source document, as handed to the engine by a loader.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier; derived from `source` unless supplied explicitly.
    pub id: String,
    /// Path or URI the text was read from.
    pub source: String,
    /// Full document text.
    pub text: String,
    /// When this version of the document was ingested.
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Create a document whose id is derived from its source, so that
    /// re-ingesting the same source replaces the earlier version.
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: document_id_for(&source),
            source,
            text: text.into(),
            ingested_at: Utc::now(),
        }
    }

    /// Create a document with a caller-chosen identifier.
    pub fn with_id(
        id: impl Into<String>,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            text: text.into(),
            ingested_at: Utc::now(),
        }
    }
}

/// Deterministic document id for a source path/URI.
pub fn document_id_for(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DOCUMENT_ID_LEN);
    hex
}

/// A contiguous span of a document's text.
///
/// `start` and `end` are UTF-8 byte offsets into the document text and
/// always fall on char boundaries. The id is content-addressed, so the
/// same text at the same offset of the same document always hashes to the
/// same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    /// Length in characters.
    pub char_len: usize,
    pub text: String,
}

/// An embedding vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub model: String,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(model: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            model: model.into(),
            values,
        }
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// Chunk metadata stored alongside each vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMeta {
    pub document_id: String,
    pub source: String,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// The unit stored in a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: EmbeddingVector,
    pub meta: ChunkMeta,
}

impl IndexEntry {
    /// Pair a chunk with its embedding.
    pub fn from_chunk(chunk: &Chunk, source: &str, vector: EmbeddingVector) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector,
            meta: ChunkMeta {
                document_id: chunk.document_id.clone(),
                source: source.to_string(),
                chunk_index: chunk.chunk_index,
                start: chunk.start,
                end: chunk.end,
                text: chunk.text.clone(),
            },
        }
    }
}

/// One ranked hit produced by the retrieval pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    /// 1-based position in the final ranking.
    pub rank: usize,
    pub score: f32,
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}
