//! HNSW (Hierarchical Navigable Small World) graph over index slots.
//!
//! The graph stores topology only. Node `i` is slot `i` of the owning
//! [`VectorIndex`](super::VectorIndex); vectors are read from the slot
//! table passed into each call, so nothing is duplicated.
//!
//! # Algorithm
//!
//! - Each node gets a level drawn from an exponential distribution
//!   (`floor(-ln(u) / ln(m))`) using a fixed-seed LCG, so the same insertion
//!   sequence always produces the same graph.
//! - Insert: greedy descent from the entry point down to the node's level,
//!   then a beam search of width `ef_construction` per level, linking up to
//!   `m` neighbors (`2m` on level 0) in both directions and pruning
//!   overfull lists back to the closest ones.
//! - Search: greedy descent to level 1, then a beam search of width
//!   `max(k, ef_search)` on level 0.
//! - Removal is a soft delete. Deleted nodes still route searches but are
//!   never returned.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::{HnswParams, Metric, Slot};

const LCG_SEED: u64 = 42;
const MAX_LEVEL: u8 = 16;

/// Max-heap item ordered by score only.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    slot: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            // Prefer the earlier slot on equal score.
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

#[derive(Debug, Clone)]
struct GraphNode {
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct HnswGraph {
    params: HnswParams,
    metric: Metric,
    level_mult: f64,
    nodes: Vec<GraphNode>,
    entry_point: Option<usize>,
    level_max: u8,
    rng_state: u64,
}

impl HnswGraph {
    pub(crate) fn new(params: HnswParams, metric: Metric) -> Self {
        let m = params.m.max(2);
        Self {
            params: HnswParams { m, ..params },
            metric,
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry_point: None,
            level_max: 0,
            rng_state: LCG_SEED,
        }
    }

    pub(crate) fn metric(&self) -> Metric {
        self.metric
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Link slot `slot` (which must equal the current node count) into the graph.
    pub(crate) fn insert(&mut self, slot: usize, slots: &[Slot]) {
        debug_assert_eq!(slot, self.nodes.len());
        let level = self.select_level();
        self.nodes.push(GraphNode {
            neighbors: vec![Vec::new(); level as usize + 1],
            deleted: false,
        });

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(slot);
            self.level_max = level;
            return;
        };

        let target = &slots[slot];
        let query = target.entry.vector.values.as_slice();
        let norm = target.norm;

        let mut lc = self.level_max;
        while lc > level {
            ep = self.greedy_closest(ep, query, norm, lc, slots, false);
            lc -= 1;
        }

        for lc in (0..=level.min(self.level_max)).rev() {
            let found = self.search_layer(ep, query, norm, self.params.ef_construction, lc, slots);
            let limit = self.max_neighbors(lc);
            let selected: Vec<usize> = found
                .iter()
                .filter(|s| s.slot != slot)
                .take(limit)
                .map(|s| s.slot)
                .collect();

            for &n in &selected {
                self.link(slot, n, lc);
                self.link(n, slot, lc);
                self.prune(n, lc, limit, slots);
            }

            if let Some(best) = found.first() {
                ep = best.slot;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(slot);
            self.level_max = level;
        }
    }

    pub(crate) fn mark_deleted(&mut self, slot: usize) {
        if let Some(node) = self.nodes.get_mut(slot) {
            node.deleted = true;
        }
    }

    /// Approximate top-`k` live slots, best first.
    pub(crate) fn search(
        &self,
        query: &[f32],
        query_norm: f32,
        k: usize,
        slots: &[Slot],
    ) -> Vec<(usize, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };

        for lc in (1..=self.level_max).rev() {
            ep = self.greedy_closest(ep, query, query_norm, lc, slots, true);
        }

        let ef = k.max(self.params.ef_search);
        self.search_layer(ep, query, query_norm, ef, 0, slots)
            .into_iter()
            .filter(|s| !self.nodes[s.slot].deleted)
            .take(k)
            .map(|s| (s.slot, s.score))
            .collect()
    }

    fn max_neighbors(&self, level: u8) -> usize {
        if level == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    /// Draw a level from the fixed-seed LCG.
    fn select_level(&mut self) -> u8 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let r = ((self.rng_state >> 11) as f64 / (1u64 << 53) as f64).max(1e-12);
        let level = (-r.ln() * self.level_mult).floor();
        (level as u8).min(MAX_LEVEL)
    }

    fn similarity(&self, slot: usize, query: &[f32], query_norm: f32, slots: &[Slot]) -> f32 {
        let s = &slots[slot];
        self.metric
            .score_with_norms(&s.entry.vector.values, s.norm, query, query_norm)
    }

    fn greedy_closest(
        &self,
        entry: usize,
        query: &[f32],
        query_norm: f32,
        level: u8,
        slots: &[Slot],
        skip_deleted: bool,
    ) -> usize {
        let mut current = entry;
        let mut best = self.similarity(current, query, query_norm, slots);

        loop {
            let mut changed = false;
            if let Some(list) = self.nodes[current].neighbors.get(level as usize) {
                for &n in list {
                    if skip_deleted && self.nodes[n].deleted {
                        continue;
                    }
                    let sim = self.similarity(n, query, query_norm, slots);
                    if sim > best {
                        best = sim;
                        current = n;
                        changed = true;
                    }
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one level; returns up to `ef` slots sorted best first.
    fn search_layer(
        &self,
        entry: usize,
        query: &[f32],
        query_norm: f32,
        ef: usize,
        level: u8,
        slots: &[Slot],
    ) -> Vec<Scored> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

        let first = Scored {
            score: self.similarity(entry, query, query_norm, slots),
            slot: entry,
        };
        visited.insert(entry);
        candidates.push(first);
        results.push(Reverse(first));

        while let Some(current) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if current.score < worst && results.len() >= ef {
                break;
            }

            let Some(list) = self.nodes[current.slot].neighbors.get(level as usize) else {
                continue;
            };
            for &n in list {
                if !visited.insert(n) {
                    continue;
                }
                let score = self.similarity(n, query, query_norm, slots);
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if results.len() < ef || score > worst {
                    let item = Scored { score, slot: n };
                    candidates.push(item);
                    results.push(Reverse(item));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    fn link(&mut self, from: usize, to: usize, level: u8) {
        let node = &mut self.nodes[from];
        while node.neighbors.len() <= level as usize {
            node.neighbors.push(Vec::new());
        }
        let list = &mut node.neighbors[level as usize];
        if !list.contains(&to) {
            list.push(to);
        }
    }

    /// Keep only the `max` closest neighbors of `slot` on `level`.
    fn prune(&mut self, slot: usize, level: u8, max: usize, slots: &[Slot]) {
        let list = match self.nodes[slot].neighbors.get(level as usize) {
            Some(list) if list.len() > max => list.clone(),
            _ => return,
        };

        let base = &slots[slot];
        let mut scored: Vec<Scored> = list
            .into_iter()
            .map(|n| Scored {
                score: self.similarity(n, &base.entry.vector.values, base.norm, slots),
                slot: n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(max);

        self.nodes[slot].neighbors[level as usize] = scored.into_iter().map(|s| s.slot).collect();
    }
}
