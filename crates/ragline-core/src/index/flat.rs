//! Exact linear-scan search.
//!
//! Scores every live slot against the query and keeps the best `k`. This is
//! the reference the HNSW graph is measured against and the fallback when
//! the graph walk comes back short.

use std::cmp::Ordering;

use super::{Metric, Slot};

/// Best-first order: score descending, then insertion order.
pub(crate) fn rank_order(a: &(usize, f32, u64), b: &(usize, f32, u64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.2.cmp(&b.2))
}

/// Exact top-`k` live slots as `(slot, score)`, best first.
pub(crate) fn scan(
    slots: &[Slot],
    query: &[f32],
    query_norm: f32,
    k: usize,
    metric: Metric,
) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32, u64)> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.live)
        .map(|(i, s)| {
            let score = metric.score_with_norms(&s.entry.vector.values, s.norm, query, query_norm);
            (i, score, s.seq)
        })
        .collect();

    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_by(rank_order);
    scored.into_iter().map(|(i, score, _)| (i, score)).collect()
}
