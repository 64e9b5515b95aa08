//! Byte-bounded LRU cache for resource content.
//!
//! Entries live in an [`IndexMap`] whose order is the recency order: the
//! front is the least recently used entry, the back the most recent. A
//! single mutex guards the map and the byte total together, so concurrent
//! reads can neither reorder the list inconsistently nor double-count.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug)]
struct CacheEntry {
    bytes: Arc<[u8]>,
    modified: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn remove(&mut self, id: &str) -> bool {
        self.entries.shift_remove(id).map_or(false, |old| {
            self.total_bytes -= old.bytes.len();
            true
        })
    }
}

/// Counters reported by [`ContentCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of cached resources.
    pub entries: usize,
    /// Bytes currently held.
    pub total_bytes: usize,
    /// Configured bound.
    pub max_bytes: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the backing store.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

/// Shared content cache. Total size never exceeds `max_bytes`.
#[derive(Debug)]
pub struct ContentCache {
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl ContentCache {
    /// Creates an empty cache holding at most `max_bytes` of content.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached bytes for `id` if they were stored for the same
    /// modification time, marking the entry most recently used.
    ///
    /// A stale entry is dropped.
    pub fn get(&self, id: &str, modified: Option<SystemTime>) -> Option<Arc<[u8]>> {
        let mut state = self.lock();
        let Some(index) = state.entries.get_index_of(id) else {
            state.misses += 1;
            return None;
        };

        let fresh = state.entries[index].modified == modified;
        if !fresh {
            state.remove(id);
            state.misses += 1;
            tracing::debug!(id, "Dropped stale cache entry");
            return None;
        }

        let last = state.entries.len() - 1;
        state.entries.move_index(index, last);
        state.hits += 1;
        Some(Arc::clone(&state.entries[last].bytes))
    }

    /// Stores `bytes` for `id`, evicting least recently used entries until
    /// it fits. Content larger than the whole cache is not stored.
    ///
    /// Returns `true` if the content was cached.
    pub fn insert(&self, id: &str, bytes: Arc<[u8]>, modified: Option<SystemTime>) -> bool {
        let size = bytes.len();
        let mut state = self.lock();
        state.remove(id);

        if size > self.max_bytes {
            tracing::debug!(id, size, max = self.max_bytes, "Content exceeds cache bound");
            return false;
        }

        while state.total_bytes + size > self.max_bytes {
            let Some((evicted, entry)) = state.entries.shift_remove_index(0) else {
                break;
            };
            state.total_bytes -= entry.bytes.len();
            state.evictions += 1;
            tracing::debug!(id = %evicted, "Evicted cache entry");
        }

        state.total_bytes += size;
        state.entries.insert(id.to_string(), CacheEntry { bytes, modified });
        true
    }

    /// Drops the entry for `id`. Returns `true` if one existed.
    pub fn invalidate(&self, id: &str) -> bool {
        self.lock().remove(id)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
