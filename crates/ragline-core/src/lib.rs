//! # Ragline Core
//!
//! The retrieval engine behind Ragline: data models, chunking, embedding
//! cache, vector index (exact and HNSW), retrieval pipeline, context
//! assembly, and answer orchestration.
//!
//! This crate does no filesystem walking, HTTP, or configuration parsing.
//! Embedding and generation backends plug in through the
//! [`embedding::Embedder`] and [`generation::Generator`] traits; the only
//! file I/O is index persistence ([`index::VectorIndex::save`] /
//! [`index::VectorIndex::load`]).
//!
//! ```text
//! ingest:  Document ─▶ Chunker ─▶ CachedEmbedder ─▶ VectorIndex
//! query:   query ─▶ RetrievalPipeline ─▶ ContextAssembler ─▶ Generator
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod retry;

pub use engine::{EngineConfig, RagEngine};
pub use error::{RagError, Result};
