/*!
 * Bounded LRU Cache
 *
 * Fixed-capacity map evicting the least recently used entry, safe to share
 * between threads. The recency list sits behind a `HybridLock`:
 *
 * - `get`, `put`, `remove`, `clear` take the write lock. A hit reorders the
 *   recency list, so reading the value and touching its recency happen in
 *   one critical section and no lookup ever observes a half-moved list.
 * - `peek`, `contains_key`, `keys_by_recency` take the shared read lock.
 * - `len` is an optimistic read of a mirrored counter, validated against
 *   the lock version, and falls back to a read lock when a writer
 *   interferes.
 */

use super::list::LruCore;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{HybridLock, HybridLockStats};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
}

/// Thread-safe LRU cache with a hard capacity
///
/// # Performance
///
/// - **get / put**: O(1) under the exclusive lock
/// - **len**: lock-free unless a write is in flight
///
/// # Example
///
/// ```
/// use coord_kit::cache::BoundedLruCache;
///
/// let cache = BoundedLruCache::new(3).unwrap();
/// cache.put("key1", 1);
/// cache.put("key2", 2);
/// cache.put("key3", 3);
/// cache.get(&"key1");
/// cache.put("key4", 4);
///
/// assert_eq!(cache.get(&"key2"), None);
/// assert_eq!(cache.keys_by_recency(), vec!["key3", "key1", "key4"]);
/// ```
#[repr(C, align(64))]
pub struct BoundedLruCache<K, V> {
    core: HybridLock<LruCore<K, V>>,
    len: AtomicUsize,
    capacity: usize,
    counters: CacheCounters,
}

impl<K: Hash + Eq + Clone, V> BoundedLruCache<K, V> {
    /// Create an empty cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::config("cache capacity must be greater than zero"));
        }

        Ok(Self {
            core: HybridLock::new(LruCore::new(capacity)),
            len: AtomicUsize::new(0),
            capacity,
            counters: CacheCounters::default(),
        })
    }

    /// Value for `key`, marking it most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let mut core = self.core.write();
        match core.get_touch(key) {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace `key` as most recently used
    ///
    /// A new key arriving at a full cache evicts the least recently used
    /// entry first. Returns the value previously stored under `key`.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let mut core = self.core.write();
        let outcome = core.insert(key, value);
        self.len.store(core.len(), Ordering::Release);

        if outcome.previous.is_none() {
            self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.evicted.is_some() {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(capacity = self.capacity, "evicted least recently used entry");
        }
        drop(core);

        outcome.previous
    }

    /// Value for `key` without touching recency
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.core.read().peek(key).cloned()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.read().contains(key)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut core = self.core.write();
        let removed = core.remove(key);
        self.len.store(core.len(), Ordering::Release);
        removed
    }

    pub fn clear(&self) {
        let mut core = self.core.write();
        core.clear();
        self.len.store(0, Ordering::Release);
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.core.read().keys_lru_first()
    }
}

impl<K, V> BoundedLruCache<K, V> {
    /// Number of entries
    pub fn len(&self) -> usize {
        let stamp = self.core.try_optimistic_read();
        let len = self.len.load(Ordering::Acquire);
        if self.core.validate(stamp) {
            return len;
        }

        let _read = self.core.read();
        self.len.load(Ordering::Acquire)
    }

    /// Alias for [`len`](Self::len)
    #[inline]
    pub fn size(&self) -> usize {
        self.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            len: self.len(),
            capacity: self.capacity,
            hits,
            misses,
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            hit_rate,
        }
    }

    /// Counters of the underlying hybrid lock
    #[inline]
    pub fn lock_stats(&self) -> HybridLockStats {
        self.core.stats()
    }
}

impl<K, V> std::fmt::Debug for BoundedLruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedLruCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
