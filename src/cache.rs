//! Bounded LRU cache from text to embedding vector.
//!
//! The cache is the only mutable state shared between the indexing and
//! search paths: the indexer fills it while embedding chunks, and the search
//! engine consults it so repeated query text is never re-embedded.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; the config layer rejects that before
    /// construction.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a vector by its text. A hit refreshes the entry's recency;
    /// a miss is not an error.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.inner.lock().get(text).cloned()
    }

    /// Insert a vector, evicting the least-recently-used entry at capacity.
    pub fn put(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.inner.lock().put(text.into(), vector);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
