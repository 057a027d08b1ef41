//! Engine facade: `ingest(document)` and `answer(query)`.
//!
//! [`RagEngine`] wires the chunker, cached embedder, vector index and
//! orchestrator together from one [`EngineConfig`]. It is the only type the
//! application layer needs to drive ingestion and queries.
//!
//! # Ingestion
//!
//! 1. Reject blank documents.
//! 2. Chunk the text; chunk ids are content-addressed.
//! 3. Diff against the chunk ids the index already holds for the document.
//! 4. Embed only the new chunks.
//! 5. Atomically replace the document's entries (drop stale, add new).
//!
//! Re-ingesting an unchanged document therefore embeds nothing and inserts
//! nothing. Because step 5 is the only mutation and happens under a single
//! write lock, cancelling an ingest future before it completes leaves the
//! index exactly as it was.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::Chunker;
use crate::context::{BudgetUnit, ContextAssembler};
use crate::embedding::{CacheStats, CachedEmbedder, EmbeddingCache, Embedder};
use crate::error::{RagError, Result};
use crate::generation::{GenerationOptions, Generator};
use crate::index::{HnswParams, IndexStats, VectorIndex};
use crate::models::{Chunk, Document, IndexEntry, RetrievalResult};
use crate::orchestrator::{GeneratedAnswer, PreparedQuery, RagOrchestrator};
use crate::retrieval::{RetrievalParams, RetrievalPipeline};
use crate::retry::RetryPolicy;

/// Everything tunable about the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chunk_max_chars: usize,
    pub chunk_overlap: usize,
    /// Boundary search window; `None` = 20% of `chunk_max_chars`.
    pub boundary_tolerance: Option<usize>,
    pub retrieval: RetrievalParams,
    pub token_budget: usize,
    pub budget_unit: BudgetUnit,
    pub cache_capacity: Option<usize>,
    pub embed_batch_size: usize,
    pub embed_max_parallel_batches: usize,
    pub embed_retry: RetryPolicy,
    pub generation_retry: RetryPolicy,
    pub generation: GenerationOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1000,
            chunk_overlap: 200,
            boundary_tolerance: None,
            retrieval: RetrievalParams::default(),
            token_budget: 4000,
            budget_unit: BudgetUnit::Chars,
            cache_capacity: None,
            embed_batch_size: 64,
            embed_max_parallel_batches: 4,
            embed_retry: RetryPolicy::default(),
            generation_retry: RetryPolicy::default(),
            generation: GenerationOptions::default(),
        }
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub inserted: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// A document that could not be ingested.
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub document_id: String,
    pub source: String,
    pub error: String,
}

/// Outcome of ingesting a batch of documents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub documents_ingested: usize,
    pub documents_unchanged: usize,
    pub chunks_inserted: usize,
    pub chunks_unchanged: usize,
    pub chunks_removed: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestSummary {
    pub fn record(&mut self, report: &IngestReport) {
        if report.inserted == 0 && report.removed == 0 {
            self.documents_unchanged += 1;
        } else {
            self.documents_ingested += 1;
        }
        self.chunks_inserted += report.inserted;
        self.chunks_unchanged += report.unchanged;
        self.chunks_removed += report.removed;
    }

    pub fn record_failure(&mut self, document: &Document, error: &RagError) {
        self.failures.push(IngestFailure {
            document_id: document.id.clone(),
            source: document.source.clone(),
            error: error.to_string(),
        });
    }
}

/// Index and cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub index: IndexStats,
    pub cache: CacheStats,
}

/// The retrieval engine.
#[derive(Clone)]
pub struct RagEngine {
    chunker: Chunker,
    embedder: Arc<CachedEmbedder>,
    index: Arc<VectorIndex>,
    orchestrator: RagOrchestrator,
}

impl RagEngine {
    /// Build an engine over `index`.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] for invalid chunking, batching, retrieval or
    /// budget parameters.
    pub fn new(
        config: &EngineConfig,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let mut chunker = Chunker::new(config.chunk_max_chars, config.chunk_overlap)?;
        if let Some(tolerance) = config.boundary_tolerance {
            chunker = chunker.with_tolerance(tolerance);
        }

        let cache = Arc::new(EmbeddingCache::with_capacity(config.cache_capacity));
        let embedder = Arc::new(
            CachedEmbedder::new(embedder, cache)
                .with_retry_policy(config.embed_retry.clone())
                .with_batching(config.embed_batch_size, config.embed_max_parallel_batches)?,
        );

        let retrieval =
            RetrievalPipeline::new(embedder.clone(), index.clone(), config.retrieval.clone())?;
        let orchestrator = RagOrchestrator::new(
            retrieval,
            ContextAssembler::new(config.budget_unit),
            generator,
            config.token_budget,
        )?
        .with_retry_policy(config.generation_retry.clone())
        .with_options(config.generation);

        Ok(Self {
            chunker,
            embedder,
            index,
            orchestrator,
        })
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<CachedEmbedder> {
        &self.embedder
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Ingest (or re-ingest) one document.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidDocument`] for blank text.
    /// - Embedding failures, dimension or model mismatches.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        if document.text.trim().is_empty() {
            return Err(RagError::InvalidDocument {
                id: document.id.clone(),
                reason: "document has no text".to_string(),
            });
        }

        let chunks = self.chunker.chunk(&document.id, &document.text);
        let existing: HashSet<String> = self
            .index
            .chunk_ids_for_document(&document.id)
            .into_iter()
            .collect();
        let fresh: Vec<&Chunk> = chunks.iter().filter(|c| !existing.contains(&c.id)).collect();

        let texts: Vec<String> = fresh.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let entries: Vec<IndexEntry> = fresh
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, &document.source, vector))
            .collect();

        let all_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let replaced = self
            .index
            .replace_document(&document.id, &all_ids, entries)?;

        let report = IngestReport {
            document_id: document.id.clone(),
            chunks: chunks.len(),
            inserted: replaced.inserted,
            unchanged: replaced.unchanged,
            removed: replaced.removed,
        };
        info!(
            source = %document.source,
            document_id = %document.id,
            chunks = report.chunks,
            inserted = report.inserted,
            unchanged = report.unchanged,
            removed = report.removed,
            "Ingested document"
        );
        Ok(report)
    }

    /// Ingest documents one after another. A failing document is logged,
    /// recorded in the summary and skipped; the rest continue.
    pub async fn ingest_all<I>(&self, documents: I) -> IngestSummary
    where
        I: IntoIterator<Item = Document>,
    {
        let mut summary = IngestSummary::default();
        for document in documents {
            match self.ingest(&document).await {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    warn!(source = %document.source, error = %e, "Skipping document");
                    summary.record_failure(&document, &e);
                }
            }
        }
        summary
    }

    /// Retrieval only.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let retrieval = self.orchestrator.retrieval();
        let k = k.unwrap_or(retrieval.params().top_k);
        let threshold = score_threshold.or(retrieval.params().score_threshold);
        retrieval.retrieve(query, k, threshold).await
    }

    /// Retrieve, assemble and build the prompt without generating.
    pub async fn prepare(&self, query: &str) -> Result<PreparedQuery> {
        self.orchestrator.prepare(query).await
    }

    /// Full query → answer.
    pub async fn answer(&self, query: &str) -> Result<GeneratedAnswer> {
        self.orchestrator.answer(query).await
    }

    pub fn orchestrator(&self) -> &RagOrchestrator {
        &self.orchestrator
    }

    /// Drop every entry of `document_id`. Returns the number removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let removed = self.index.remove_document(document_id);
        info!(document_id, removed, "Removed document");
        removed
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.index.save(path)
    }

    /// Build an engine over an index previously written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// [`RagError::IndexCorrupt`] or [`RagError::Io`] from loading, then
    /// the same errors as [`new`](Self::new).
    pub fn load(
        config: &EngineConfig,
        path: &Path,
        hnsw: HnswParams,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let index = Arc::new(VectorIndex::load(path, hnsw)?);
        Self::new(config, index, embedder, generator)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            index: self.index.stats(),
            cache: self.embedder.cache().stats(),
        }
    }
}
