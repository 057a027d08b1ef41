//! Query-time retrieval: embed, search, filter, rank.
//!
//! # Pipeline
//!
//! ```text
//! query ──▶ trim / validate
//!       ──▶ embed (cache-backed)
//!       ──▶ VectorIndex::search(k × oversample)
//!       ──▶ drop score < threshold
//!       ──▶ cap hits per document
//!       ──▶ order (score desc, then tie-break)
//!       ──▶ truncate to k, assign 1-based ranks
//! ```
//!
//! Oversampling leaves headroom for the threshold and per-document filters,
//! so they can remove candidates without starving the final list. When the
//! filters still leave fewer than `k` results, what remains is returned as
//! is; it is never padded.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::CachedEmbedder;
use crate::error::{RagError, Result};
use crate::index::{SearchHit, VectorIndex};
use crate::models::RetrievalResult;

/// How to order results with equal scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Earlier-inserted entries first.
    #[default]
    Insertion,
    /// Document id, then start offset.
    Document,
}

/// Tunables for [`RetrievalPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    /// Candidates requested from the index = `k × oversample_factor`.
    pub oversample_factor: usize,
    /// At most this many chunks per document (`None` = unbounded).
    pub max_per_document: Option<usize>,
    pub tie_break: TieBreak,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: None,
            oversample_factor: 3,
            max_per_document: None,
            tie_break: TieBreak::Insertion,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::config("retrieval top_k must be > 0"));
        }
        if self.oversample_factor == 0 {
            return Err(RagError::config("retrieval oversample_factor must be >= 1"));
        }
        if self.max_per_document == Some(0) {
            return Err(RagError::config("retrieval max_per_document must be > 0"));
        }
        if let Some(t) = self.score_threshold {
            if !t.is_finite() {
                return Err(RagError::config("retrieval score_threshold must be finite"));
            }
        }
        Ok(())
    }
}

/// Embeds queries and turns index hits into ranked [`RetrievalResult`]s.
#[derive(Clone)]
pub struct RetrievalPipeline {
    embedder: Arc<CachedEmbedder>,
    index: Arc<VectorIndex>,
    params: RetrievalParams,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<CachedEmbedder>,
        index: Arc<VectorIndex>,
        params: RetrievalParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            embedder,
            index,
            params,
        })
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Retrieve with the configured `top_k` and threshold.
    pub async fn retrieve_default(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        self.retrieve(query, self.params.top_k, self.params.score_threshold)
            .await
    }

    /// Retrieve up to `k` chunks scoring at least `score_threshold`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] for a blank query.
    /// - [`RagError::Config`] for `k == 0`.
    /// - Embedding failures after retries.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery("query is empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::config("k must be > 0"));
        }

        if self.index.is_empty() {
            debug!("Index is empty, skipping query embedding");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(query).await?;
        let candidates = k.saturating_mul(self.params.oversample_factor);
        let hits = self.index.search(&vector.values, candidates)?;
        let found = hits.len();

        let ranked = rank(hits, k, score_threshold, &self.params);
        debug!(
            k,
            candidates,
            found,
            returned = ranked.len(),
            "Retrieval complete"
        );
        Ok(ranked)
    }
}

/// Filter, cap, order and truncate index hits.
fn rank(
    hits: Vec<SearchHit>,
    k: usize,
    score_threshold: Option<f32>,
    params: &RetrievalParams,
) -> Vec<RetrievalResult> {
    let mut per_doc: HashMap<String, usize> = HashMap::new();

    let mut kept: Vec<SearchHit> = hits
        .into_iter()
        .filter(|h| score_threshold.map_or(true, |t| h.score >= t))
        .filter(|h| match params.max_per_document {
            None => true,
            Some(cap) => {
                let n = per_doc
                    .entry(h.entry.meta.document_id.clone())
                    .or_insert(0);
                *n += 1;
                *n <= cap
            }
        })
        .collect();

    kept.sort_by(|a, b| compare(a, b, params.tie_break));
    kept.truncate(k);

    kept.into_iter()
        .enumerate()
        .map(|(i, h)| RetrievalResult {
            rank: i + 1,
            score: h.score,
            chunk_id: h.entry.chunk_id.clone(),
            document_id: h.entry.meta.document_id.clone(),
            source: h.entry.meta.source.clone(),
            chunk_index: h.entry.meta.chunk_index,
            start: h.entry.meta.start,
            end: h.entry.meta.end,
            text: h.entry.meta.text.clone(),
        })
        .collect()
}

fn compare(a: &SearchHit, b: &SearchHit, tie_break: TieBreak) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| match tie_break {
        TieBreak::Insertion => a.insertion_seq.cmp(&b.insertion_seq),
        TieBreak::Document => a
            .entry
            .meta
            .document_id
            .cmp(&b.entry.meta.document_id)
            .then(a.entry.meta.start.cmp(&b.entry.meta.start)),
    })
}
