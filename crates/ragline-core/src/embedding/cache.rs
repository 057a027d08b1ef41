//! Content-addressed embedding cache with optional LRU bound.
//!
//! Keys are the SHA-256 of `model ‖ 0x00 ‖ text`, so the same text embedded
//! by two different models never collides. With no capacity the cache grows
//! without bound; with a capacity, inserting past it evicts the least
//! recently used entry (a `get` hit counts as a use).
//!
//! Recency is tracked with a monotonically increasing tick per entry and a
//! `BTreeMap<tick, key>` ordered index, so both touch and evict are
//! `O(log n)`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Cache key for `text` embedded by `model`.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Slot {
    vector: Vec<f32>,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Slot>,
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Thread-safe memo of embedding vectors.
pub struct EmbeddingCache {
    capacity: Option<usize>,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl EmbeddingCache {
    /// A cache that never evicts.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// A cache holding at most `capacity` vectors (`None` = unbounded).
    /// A capacity of zero disables caching entirely.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Look up the vector for `text` under `model`, marking it recently used.
    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(model, text);
        let mut state = self.state.lock();
        let tick = state.next_tick();

        let found = match state.entries.get_mut(&key) {
            Some(slot) => {
                let old = slot.tick;
                slot.tick = tick;
                Some((old, slot.vector.clone()))
            }
            None => None,
        };

        match found {
            Some((old, vector)) => {
                state.recency.remove(&old);
                state.recency.insert(tick, key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(vector)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `vector` for `text` under `model`, evicting the least recently
    /// used entry if the cache is full.
    pub fn insert(&self, model: &str, text: &str, vector: Vec<f32>) {
        if self.capacity == Some(0) {
            return;
        }
        let key = cache_key(model, text);
        let mut state = self.state.lock();
        let tick = state.next_tick();

        if let Some(old) = state.entries.insert(key.clone(), Slot { vector, tick }) {
            state.recency.remove(&old.tick);
        }
        state.recency.insert(tick, key);

        if let Some(cap) = self.capacity {
            while state.entries.len() > cap {
                let Some((_, victim)) = state.recency.pop_first() else {
                    break;
                };
                state.entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, "Evicted embedding from cache");
            }
        }
    }

    pub fn contains(&self, model: &str, text: &str) -> bool {
        self.state
            .lock()
            .entries
            .contains_key(&cache_key(model, text))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = EmbeddingCache::unbounded();
        assert!(cache.get("m", "hello").is_none());
        cache.insert("m", "hello", vec![1.0, 2.0]);
        assert_eq!(cache.get("m", "hello"), Some(vec![1.0, 2.0]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_model_identity_is_part_of_key() {
        let cache = EmbeddingCache::unbounded();
        cache.insert("model-a", "hello", vec![1.0]);
        assert!(cache.get("model-b", "hello").is_none());
        assert_ne!(cache_key("model-a", "hello"), cache_key("model-b", "hello"));
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = EmbeddingCache::with_capacity(Some(2));
        cache.insert("m", "a", vec![1.0]);
        cache.insert("m", "b", vec![2.0]);
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("m", "a").is_some());
        cache.insert("m", "c", vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("m", "a"));
        assert!(!cache.contains("m", "b"));
        assert!(cache.contains("m", "c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let cache = EmbeddingCache::with_capacity(Some(10));
        for i in 0..100 {
            cache.insert("m", &format!("text {}", i), vec![i as f32]);
            assert!(cache.len() <= 10);
        }
        assert_eq!(cache.stats().evictions, 90);
        assert!(cache.contains("m", "text 99"));
        assert!(!cache.contains("m", "text 0"));
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let cache = EmbeddingCache::with_capacity(Some(3));
        cache.insert("m", "a", vec![1.0]);
        cache.insert("m", "a", vec![1.5]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("m", "a"), Some(vec![1.5]));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = EmbeddingCache::with_capacity(Some(0));
        cache.insert("m", "a", vec![1.0]);
        assert!(cache.is_empty());
    }
}
