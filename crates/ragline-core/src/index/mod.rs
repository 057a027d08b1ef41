//! In-memory vector index with exact and HNSW search.
//!
//! [`VectorIndex`] owns every [`IndexEntry`] and answers k-nearest-neighbor
//! queries. Two search strategies sit behind the same contract:
//!
//! | Kind | Search | Notes |
//! |------|--------|-------|
//! | [`IndexKind::Flat`] | exact linear scan | reference results |
//! | [`IndexKind::Hnsw`] | approximate graph walk | falls back to the exact scan when the walk returns fewer than `min(k, len)` live hits |
//!
//! # Invariants
//!
//! - All stored vectors share one dimension and one model identity. The
//!   first insertion into an empty index establishes both; emptying the
//!   index resets them.
//! - Chunk ids are unique; inserting an existing id is a no-op.
//! - A failing `insert` leaves the index untouched (the whole batch is
//!   validated before any mutation).
//! - Results are ordered by score descending, ties broken by insertion
//!   order.
//!
//! # Concurrency
//!
//! State lives behind a single `RwLock`. Searches run synchronously under
//! the read guard; each mutation (insert, remove, replace) is applied inside
//! one write-guard section, so readers observe either none or all of it.

mod flat;
mod hnsw;
mod persist;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedding::{dot, euclidean_distance, magnitude};
use crate::error::{RagError, Result};
use crate::models::IndexEntry;

use hnsw::HnswGraph;

/// Similarity metric used to rank entries. Higher scores are closer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw dot product.
    Dot,
    /// Negative Euclidean distance.
    Euclidean,
}

impl Metric {
    /// Score `a` against `b`.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        self.score_with_norms(a, magnitude(a), b, magnitude(b))
    }

    pub(crate) fn score_with_norms(&self, a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
        match self {
            Metric::Cosine => {
                let denom = a_norm * b_norm;
                if denom < f32::EPSILON {
                    0.0
                } else {
                    dot(a, b) / denom
                }
            }
            Metric::Dot => dot(a, b),
            Metric::Euclidean => -euclidean_distance(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Dot => "dot",
            Metric::Euclidean => "euclidean",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::Dot => 1,
            Metric::Euclidean => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::Dot),
            2 => Some(Metric::Euclidean),
            _ => None,
        }
    }
}

/// Which search strategy the index uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Flat,
    Hnsw,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Hnsw => "hnsw",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            IndexKind::Flat => 0,
            IndexKind::Hnsw => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IndexKind::Flat),
            1 => Some(IndexKind::Hnsw),
            _ => None,
        }
    }
}

/// HNSW graph tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max neighbors per node on levels above 0 (level 0 keeps `2m`).
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Beam width while searching (raised to `k` when smaller).
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Construction options for a [`VectorIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub kind: IndexKind,
    pub metric: Metric,
    pub hnsw: HnswParams,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub entry: Arc<IndexEntry>,
    /// Position in insertion order (lower = inserted earlier).
    pub insertion_seq: u64,
}

/// Outcome of an [`VectorIndex::insert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    /// Entries whose chunk id was already present.
    pub skipped: usize,
}

/// Outcome of a [`VectorIndex::replace_document`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceReport {
    pub inserted: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Point-in-time index summary.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub metric: Metric,
    pub dimension: Option<usize>,
    pub model: Option<String>,
    pub entries: usize,
    pub documents: usize,
    pub tombstones: usize,
}

/// A stored entry plus the bookkeeping the search paths need.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub entry: Arc<IndexEntry>,
    pub norm: f32,
    pub seq: u64,
    pub live: bool,
}

#[derive(Debug)]
struct IndexState {
    dimension: Option<usize>,
    model: Option<String>,
    slots: Vec<Slot>,
    by_id: HashMap<String, usize>,
    live: usize,
    next_seq: u64,
    graph: Option<HnswGraph>,
}

impl IndexState {
    fn new(options: &IndexOptions) -> Self {
        Self {
            dimension: None,
            model: None,
            slots: Vec::new(),
            by_id: HashMap::new(),
            live: 0,
            next_seq: 0,
            graph: new_graph(options),
        }
    }

    fn tombstones(&self) -> usize {
        self.slots.len() - self.live
    }

    fn live_entries(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.live)
    }

    /// Check a batch against the established (or about-to-be-established)
    /// dimension and model. `empty` means the index will hold nothing else.
    fn validate(&self, entries: &[IndexEntry], empty: bool) -> Result<()> {
        let (mut dim, mut model) = if empty {
            (None, None)
        } else {
            (self.dimension, self.model.clone())
        };

        for entry in entries {
            let got = entry.vector.dims();
            if got == 0 {
                return Err(RagError::InvalidDocument {
                    id: entry.meta.document_id.clone(),
                    reason: format!("chunk {} has an empty vector", entry.chunk_id),
                });
            }
            match dim {
                Some(expected) if expected != got => {
                    return Err(RagError::DimensionMismatch { expected, got })
                }
                Some(_) => {}
                None => dim = Some(got),
            }
            match &model {
                Some(expected) if *expected != entry.vector.model => {
                    return Err(RagError::ModelMismatch {
                        expected: expected.clone(),
                        got: entry.vector.model.clone(),
                    })
                }
                Some(_) => {}
                None => model = Some(entry.vector.model.clone()),
            }
        }
        Ok(())
    }

    /// Append already-validated entries; returns the number actually added.
    fn push_all(&mut self, entries: Vec<IndexEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if self.by_id.contains_key(&entry.chunk_id) {
                continue;
            }
            if self.dimension.is_none() {
                self.dimension = Some(entry.vector.dims());
                self.model = Some(entry.vector.model.clone());
            }
            let idx = self.slots.len();
            self.by_id.insert(entry.chunk_id.clone(), idx);
            self.slots.push(Slot {
                norm: magnitude(&entry.vector.values),
                entry: Arc::new(entry),
                seq: self.next_seq,
                live: true,
            });
            self.next_seq += 1;
            self.live += 1;
            if let Some(graph) = self.graph.as_mut() {
                graph.insert(idx, &self.slots);
            }
            added += 1;
        }
        added
    }

    fn remove_ids<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(idx) = self.by_id.remove(id) {
                self.slots[idx].live = false;
                self.live -= 1;
                if let Some(graph) = self.graph.as_mut() {
                    graph.mark_deleted(idx);
                }
                removed += 1;
            }
        }
        removed
    }

    /// Reset when empty; rebuild without tombstones when they dominate.
    fn after_removal(&mut self, options: &IndexOptions) {
        if self.live == 0 {
            self.slots.clear();
            self.by_id.clear();
            self.dimension = None;
            self.model = None;
            self.graph = new_graph(options);
        } else if self.tombstones() > self.live {
            self.compact(options);
        }
    }

    /// Drop tombstones and rebuild the graph from the live slots, in
    /// insertion order.
    fn compact(&mut self, options: &IndexOptions) {
        if self.tombstones() == 0 {
            return;
        }
        let before = self.slots.len();
        let live: Vec<Slot> = self.slots.drain(..).filter(|s| s.live).collect();
        self.by_id.clear();
        self.graph = new_graph(options);
        for slot in live {
            let idx = self.slots.len();
            self.by_id.insert(slot.entry.chunk_id.clone(), idx);
            self.slots.push(slot);
            if let Some(graph) = self.graph.as_mut() {
                graph.insert(idx, &self.slots);
            }
        }
        debug!(before, after = self.slots.len(), "Compacted vector index");
    }

    fn document_chunk_ids(&self, document_id: &str) -> Vec<String> {
        self.live_entries()
            .filter(|s| s.entry.meta.document_id == document_id)
            .map(|s| s.entry.chunk_id.clone())
            .collect()
    }
}

fn new_graph(options: &IndexOptions) -> Option<HnswGraph> {
    match options.kind {
        IndexKind::Flat => None,
        IndexKind::Hnsw => Some(HnswGraph::new(options.hnsw, options.metric)),
    }
}

/// Thread-safe vector store with k-NN search and persistence.
pub struct VectorIndex {
    options: IndexOptions,
    state: RwLock<IndexState>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new(IndexOptions::default())
    }
}

impl VectorIndex {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            state: RwLock::new(IndexState::new(&options)),
            options,
        }
    }

    /// An exact-scan index.
    pub fn flat(metric: Metric) -> Self {
        Self::new(IndexOptions {
            kind: IndexKind::Flat,
            metric,
            hnsw: HnswParams::default(),
        })
    }

    /// An HNSW-backed index.
    pub fn hnsw(metric: Metric, params: HnswParams) -> Self {
        Self::new(IndexOptions {
            kind: IndexKind::Hnsw,
            metric,
            hnsw: params,
        })
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    pub fn metric(&self) -> Metric {
        self.options.metric
    }

    pub fn kind(&self) -> IndexKind {
        self.options.kind
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().dimension
    }

    pub fn model(&self) -> Option<String> {
        self.state.read().model.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.state.read().by_id.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<Arc<IndexEntry>> {
        let state = self.state.read();
        state
            .by_id
            .get(chunk_id)
            .map(|&idx| state.slots[idx].entry.clone())
    }

    /// Live chunk ids belonging to `document_id`, in insertion order.
    pub fn chunk_ids_for_document(&self, document_id: &str) -> Vec<String> {
        self.state.read().document_chunk_ids(document_id)
    }

    /// Distinct document ids with at least one live entry.
    pub fn document_ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        state
            .live_entries()
            .filter(|s| seen.insert(s.entry.meta.document_id.as_str()))
            .map(|s| s.entry.meta.document_id.clone())
            .collect()
    }

    /// Add entries. Existing chunk ids are skipped.
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`] if any vector's length disagrees
    ///   with the index (or with the batch's first vector on an empty index).
    /// - [`RagError::ModelMismatch`] if any vector's model identity disagrees.
    ///
    /// On error the index is unchanged.
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<InsertReport> {
        let mut state = self.state.write();
        let empty = state.live == 0;
        state.validate(&entries, empty)?;

        let total = entries.len();
        let inserted = state.push_all(entries);
        debug!(inserted, skipped = total - inserted, "Inserted index entries");
        Ok(InsertReport {
            inserted,
            skipped: total - inserted,
        })
    }

    /// Remove entries by chunk id; unknown ids are ignored. Returns the
    /// number removed.
    pub fn remove(&self, chunk_ids: &[String]) -> usize {
        let mut state = self.state.write();
        let removed = state.remove_ids(chunk_ids.iter().map(String::as_str));
        if removed > 0 {
            state.after_removal(&self.options);
        }
        removed
    }

    /// Remove every entry belonging to `document_id`.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write();
        let ids = state.document_chunk_ids(document_id);
        let removed = state.remove_ids(ids.iter().map(String::as_str));
        if removed > 0 {
            state.after_removal(&self.options);
        }
        removed
    }

    /// Make `document_id`'s entries exactly `keep_ids` plus `new_entries`,
    /// in one atomic step.
    ///
    /// Entries of the document whose ids are not in `keep_ids` are removed;
    /// `new_entries` are inserted (existing ids skipped). Validation runs
    /// against the index as it will be after the removal, so re-ingesting
    /// the only document with a different model is allowed.
    pub fn replace_document(
        &self,
        document_id: &str,
        keep_ids: &[String],
        new_entries: Vec<IndexEntry>,
    ) -> Result<ReplaceReport> {
        if let Some(stray) = new_entries
            .iter()
            .find(|e| e.meta.document_id != document_id)
        {
            return Err(RagError::InvalidDocument {
                id: document_id.to_string(),
                reason: format!(
                    "entry {} belongs to document {}",
                    stray.chunk_id, stray.meta.document_id
                ),
            });
        }

        let mut state = self.state.write();
        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let existing = state.document_chunk_ids(document_id);
        let stale: Vec<&str> = existing
            .iter()
            .map(String::as_str)
            .filter(|id| !keep.contains(id))
            .collect();
        let unchanged = existing.len() - stale.len();

        let empty_after = state.live == stale.len();
        state.validate(&new_entries, empty_after)?;

        let removed = state.remove_ids(stale);
        if removed > 0 {
            state.after_removal(&self.options);
        }
        let inserted = state.push_all(new_entries);

        debug!(document_id, inserted, unchanged, removed, "Replaced document entries");
        Ok(ReplaceReport {
            inserted,
            unchanged,
            removed,
        })
    }

    /// Top-`k` entries for `query` under the index's own metric.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_with_metric(query, k, self.options.metric)
    }

    /// Top-`k` entries for `query` under `metric`.
    ///
    /// `k` is clamped to the index size. An empty index yields an empty
    /// result. The HNSW graph serves only its own metric; other metrics use
    /// the exact scan.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if `query` disagrees with the index.
    pub fn search_with_metric(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        let Some(dim) = state.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                got: query.len(),
            });
        }

        let k = k.min(state.live);
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = magnitude(query);

        let found = match state.graph.as_ref() {
            Some(graph) if graph.metric() == metric => {
                let approx = graph.search(query, query_norm, k, &state.slots);
                if approx.len() < k {
                    debug!(
                        wanted = k,
                        got = approx.len(),
                        nodes = graph.len(),
                        "HNSW walk came back short, falling back to exact scan"
                    );
                    flat::scan(&state.slots, query, query_norm, k, metric)
                } else {
                    approx
                }
            }
            _ => flat::scan(&state.slots, query, query_norm, k, metric),
        };

        let mut ranked: Vec<(usize, f32, u64)> = found
            .into_iter()
            .map(|(idx, score)| (idx, score, state.slots[idx].seq))
            .collect();
        ranked.sort_by(flat::rank_order);

        Ok(ranked
            .into_iter()
            .map(|(idx, score, seq)| SearchHit {
                score,
                entry: state.slots[idx].entry.clone(),
                insertion_seq: seq,
            })
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let documents: HashSet<&str> = state
            .live_entries()
            .map(|s| s.entry.meta.document_id.as_str())
            .collect();
        IndexStats {
            kind: self.options.kind,
            metric: self.options.metric,
            dimension: state.dimension,
            model: state.model.clone(),
            entries: state.live,
            documents: documents.len(),
            tombstones: state.tombstones(),
        }
    }

    /// Write the index to `path` (temp file + rename).
    ///
    /// Tombstones are compacted first, so a reloaded index rebuilds the
    /// exact same graph.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = {
            let mut state = self.state.write();
            state.compact(&self.options);
            persist::encode(
                self.options.metric,
                self.options.kind,
                state.dimension.unwrap_or(0),
                state.model.as_deref().unwrap_or(""),
                state.slots.iter().map(|s| s.entry.as_ref()),
            )?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);
        fs::write(tmp, &bytes)?;
        fs::rename(tmp, path)?;

        info!(path = %path.display(), bytes = bytes.len(), "Saved vector index");
        Ok(())
    }

    /// Read an index written by [`save`](Self::save).
    ///
    /// Metric, kind, dimension and model come from the file; `hnsw` supplies
    /// the graph tunables (they are not persisted).
    ///
    /// # Errors
    ///
    /// [`RagError::IndexCorrupt`] if the file fails validation,
    /// [`RagError::Io`] if it cannot be read.
    pub fn load(path: &Path, hnsw: HnswParams) -> Result<Self> {
        let bytes = fs::read(path)?;
        let snapshot = persist::decode(&bytes)?;

        if let Some(bad) = snapshot
            .entries
            .iter()
            .find(|e| e.vector.dims() != snapshot.dimension)
        {
            return Err(RagError::corrupt(format!(
                "record {} has {} dimensions, header says {}",
                bad.chunk_id,
                bad.vector.dims(),
                snapshot.dimension
            )));
        }

        let index = Self::new(IndexOptions {
            kind: snapshot.kind,
            metric: snapshot.metric,
            hnsw,
        });
        let count = snapshot.entries.len();
        {
            let mut state = index.state.write();
            let added = state.push_all(snapshot.entries);
            if added != count {
                return Err(RagError::corrupt(format!(
                    "{} duplicate chunk ids in file",
                    count - added
                )));
            }
        }

        info!(path = %path.display(), entries = count, kind = index.kind().as_str(), "Loaded vector index");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMeta, EmbeddingVector};

    fn entry(id: &str, doc: &str, values: Vec<f32>) -> IndexEntry {
        entry_with_model(id, doc, values, "test-model")
    }

    fn entry_with_model(id: &str, doc: &str, values: Vec<f32>, model: &str) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            vector: EmbeddingVector::new(model, values),
            meta: ChunkMeta {
                document_id: doc.to_string(),
                source: format!("{}.txt", doc),
                chunk_index: 0,
                start: 0,
                end: 4,
                text: format!("text of {}", id),
            },
        }
    }

    /// Deterministic pseudo-random unit-ish vectors.
    fn synthetic(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
                    })
                    .collect()
            })
            .collect()
    }

    fn ids(hits: &[SearchHit]) -> Vec<String> {
        hits.iter().map(|h| h.entry.chunk_id.clone()).collect()
    }

    #[test]
    fn test_insert_and_search_cosine() {
        let index = VectorIndex::flat(Metric::Cosine);
        index
            .insert(vec![
                entry("a", "d1", vec![1.0, 0.0]),
                entry("b", "d1", vec![0.0, 1.0]),
                entry("c", "d2", vec![0.7, 0.7]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 3).unwrap();
        assert_eq!(ids(&hits), vec!["a", "c", "b"]);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_k_clamped_and_empty_index() {
        let index = VectorIndex::default();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());

        index.insert(vec![entry("a", "d1", vec![1.0, 0.0])]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 1);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_unchanged() {
        let index = VectorIndex::default();
        index
            .insert(vec![entry("a", "d1", vec![0.5; 768])])
            .unwrap();

        let err = index
            .insert(vec![
                entry("b", "d1", vec![0.5; 768]),
                entry("c", "d1", vec![0.5; 384]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 768,
                got: 384
            }
        ));
        assert_eq!(index.len(), 1);
        assert!(!index.contains("b"));
        assert_eq!(index.dimension(), Some(768));
    }

    #[test]
    fn test_mismatch_within_first_batch() {
        let index = VectorIndex::default();
        let err = index
            .insert(vec![
                entry("a", "d1", vec![1.0, 0.0]),
                entry("b", "d1", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn test_model_mismatch() {
        let index = VectorIndex::default();
        index
            .insert(vec![entry_with_model("a", "d1", vec![1.0, 0.0], "m1")])
            .unwrap();
        let err = index
            .insert(vec![entry_with_model("b", "d1", vec![1.0, 0.0], "m2")])
            .unwrap_err();
        assert!(matches!(err, RagError::ModelMismatch { .. }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = VectorIndex::default();
        index.insert(vec![entry("a", "d1", vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_skipped() {
        let index = VectorIndex::default();
        let report = index
            .insert(vec![
                entry("a", "d1", vec![1.0, 0.0]),
                entry("a", "d1", vec![0.0, 1.0]),
            ])
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        let again = index.insert(vec![entry("a", "d1", vec![1.0, 0.0])]).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let index = VectorIndex::default();
        index
            .insert(vec![
                entry("first", "d1", vec![1.0, 0.0]),
                entry("second", "d2", vec![2.0, 0.0]),
                entry("third", "d3", vec![3.0, 0.0]),
            ])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_and_reset() {
        let index = VectorIndex::default();
        index
            .insert(vec![
                entry("a", "d1", vec![1.0, 0.0]),
                entry("b", "d2", vec![0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(index.remove(&["a".to_string(), "zzz".to_string()]), 1);
        assert_eq!(ids(&index.search(&[1.0, 0.0], 5).unwrap()), vec!["b"]);

        assert_eq!(index.remove_document("d2"), 1);
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);

        // Empty again: a new dimension may be established.
        index.insert(vec![entry("c", "d3", vec![1.0, 0.0, 0.0])]).unwrap();
        assert_eq!(index.dimension(), Some(3));
    }

    #[test]
    fn test_replace_document() {
        let index = VectorIndex::default();
        index
            .insert(vec![
                entry("a1", "a", vec![1.0, 0.0]),
                entry("a2", "a", vec![0.9, 0.1]),
                entry("b1", "b", vec![0.0, 1.0]),
            ])
            .unwrap();

        let report = index
            .replace_document(
                "a",
                &["a1".to_string(), "a3".to_string()],
                vec![entry("a3", "a", vec![0.5, 0.5])],
            )
            .unwrap();
        assert_eq!(
            report,
            ReplaceReport {
                inserted: 1,
                unchanged: 1,
                removed: 1
            }
        );
        assert_eq!(index.chunk_ids_for_document("a"), vec!["a1", "a3"]);
        assert!(index.contains("b1"));
    }

    #[test]
    fn test_replace_only_document_with_new_model() {
        let index = VectorIndex::default();
        index
            .insert(vec![entry_with_model("a1", "a", vec![1.0, 0.0], "old")])
            .unwrap();
        index
            .replace_document(
                "a",
                &["a9".to_string()],
                vec![entry_with_model("a9", "a", vec![1.0, 0.0, 0.0], "new")],
            )
            .unwrap();
        assert_eq!(index.model().as_deref(), Some("new"));
        assert_eq!(index.dimension(), Some(3));
    }

    #[test]
    fn test_dot_and_euclidean_metrics() {
        let index = VectorIndex::flat(Metric::Euclidean);
        index
            .insert(vec![
                entry("near", "d", vec![1.0, 1.0]),
                entry("far", "d", vec![5.0, 5.0]),
            ])
            .unwrap();
        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec!["near", "far"]);
        assert!((hits[0].score + 2f32.sqrt()).abs() < 1e-5);

        let hits = index.search_with_metric(&[1.0, 1.0], 2, Metric::Dot).unwrap();
        assert_eq!(ids(&hits), vec!["far", "near"]);
        assert!((hits[0].score - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_hnsw_agrees_with_exact_top1() {
        let vectors = synthetic(600, 32, 7);
        let entries: Vec<IndexEntry> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| entry(&format!("c{}", i), "d", v.clone()))
            .collect();

        let exact = VectorIndex::flat(Metric::Cosine);
        let approx = VectorIndex::hnsw(Metric::Cosine, HnswParams::default());
        exact.insert(entries.clone()).unwrap();
        approx.insert(entries).unwrap();

        let queries = synthetic(100, 32, 99);
        let agree = queries
            .iter()
            .filter(|q| {
                let a = exact.search(q, 1).unwrap();
                let b = approx.search(q, 1).unwrap();
                a[0].entry.chunk_id == b[0].entry.chunk_id
            })
            .count();
        assert!(agree >= 95, "top-1 agreement {}/100", agree);
    }

    #[test]
    fn test_hnsw_never_returns_short() {
        let index = VectorIndex::hnsw(
            Metric::Cosine,
            HnswParams {
                m: 2,
                ef_construction: 4,
                ef_search: 1,
            },
        );
        let entries: Vec<IndexEntry> = synthetic(200, 8, 3)
            .into_iter()
            .enumerate()
            .map(|(i, v)| entry(&format!("c{}", i), &format!("d{}", i % 7), v))
            .collect();
        index.insert(entries).unwrap();
        index.remove_document("d0");
        index.remove_document("d1");

        let live = index.len();
        let hits = index.search(&[0.1; 8], live).unwrap();
        assert_eq!(hits.len(), live);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for options in [
            IndexOptions::default(),
            IndexOptions {
                kind: IndexKind::Hnsw,
                metric: Metric::Dot,
                hnsw: HnswParams::default(),
            },
        ] {
            let path = dir.path().join(format!("{}.rglx", options.kind.as_str()));
            let index = VectorIndex::new(options);
            let entries: Vec<IndexEntry> = synthetic(300, 16, 11)
                .into_iter()
                .enumerate()
                .map(|(i, v)| entry(&format!("c{}", i), &format!("d{}", i % 5), v))
                .collect();
            index.insert(entries).unwrap();
            index.remove_document("d3");
            index.save(&path).unwrap();

            let loaded = VectorIndex::load(&path, HnswParams::default()).unwrap();
            assert_eq!(loaded.len(), index.len());
            assert_eq!(loaded.kind(), options.kind);
            assert_eq!(loaded.metric(), options.metric);
            assert_eq!(loaded.model().as_deref(), Some("test-model"));

            for q in synthetic(20, 16, 5) {
                let a = index.search(&q, 10).unwrap();
                let b = loaded.search(&q, 10).unwrap();
                assert_eq!(ids(&a), ids(&b));
                for (x, y) in a.iter().zip(b.iter()) {
                    assert!((x.score - y.score).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_save_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.rglx");
        VectorIndex::default().save(&path).unwrap();
        let loaded = VectorIndex::load(&path, HnswParams::default()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.rglx");
        let index = VectorIndex::default();
        index.insert(vec![entry("a", "d1", vec![1.0, 0.0])]).unwrap();
        index.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path, HnswParams::default()),
            Err(RagError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_stats() {
        let index = VectorIndex::default();
        index
            .insert(vec![
                entry("a", "d1", vec![1.0, 0.0]),
                entry("b", "d1", vec![0.0, 1.0]),
                entry("c", "d2", vec![0.5, 0.5]),
            ])
            .unwrap();
        let stats = index.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(index.document_ids(), vec!["d1", "d2"]);
    }
}
