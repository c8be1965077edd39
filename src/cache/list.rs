/*!
 * LRU Recency List
 *
 * Single-threaded recency list: a hash index into a dense slab of entries
 * threaded by a doubly linked list. `head` is the least recently used
 * entry, `tail` the most recent. Removal swaps the last slab entry into
 * the hole and patches its links, so the slab never has gaps.
 *
 * All synchronization lives in `BoundedLruCache`; nothing here is shared.
 */

use ahash::RandomState;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::mem;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// What an insert displaced
pub(crate) struct Insertion<K, V> {
    /// Old value when the key was already present
    pub previous: Option<V>,
    /// Entry pushed out to make room
    pub evicted: Option<(K, V)>,
}

/// Recency-ordered map with a fixed capacity
///
/// Capacity must be non-zero; the owning cache checks this.
pub(crate) struct LruCore<K, V> {
    index: HashMap<K, usize, RandomState>,
    slots: Vec<Entry<K, V>>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCore<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_hasher(RandomState::new()),
            slots: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Look up `key` and mark it most recently used
    pub(crate) fn get_touch<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.move_to_tail(idx);
        Some(&self.slots[idx].value)
    }

    /// Look up `key` without touching recency
    pub(crate) fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&idx| &self.slots[idx].value)
    }

    #[inline]
    pub(crate) fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Insert or update `key` as most recently used, evicting the LRU entry
    /// if a new key would overflow capacity
    pub(crate) fn insert(&mut self, key: K, value: V) -> Insertion<K, V> {
        if let Some(&idx) = self.index.get(&key) {
            let previous = mem::replace(&mut self.slots[idx].value, value);
            self.move_to_tail(idx);
            return Insertion {
                previous: Some(previous),
                evicted: None,
            };
        }

        let evicted = if self.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let idx = self.slots.len();
        self.slots.push(Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, idx);
        self.push_tail(idx);

        Insertion {
            previous: None,
            evicted,
        }
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(self.remove_at(idx).value)
    }

    /// Remove and return the least recently used entry
    pub(crate) fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.head == NIL {
            return None;
        }
        let entry = self.remove_at(self.head);
        Some((entry.key, entry.value))
    }

    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from least to most recently used
    pub(crate) fn keys_lru_first(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            let entry = &self.slots[cursor];
            keys.push(entry.key.clone());
            cursor = entry.next;
        }
        keys
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.unlink(idx);
        self.push_tail(idx);
    }

    fn push_tail(&mut self, idx: usize) {
        self.slots[idx].prev = self.tail;
        self.slots[idx].next = NIL;
        if self.tail == NIL {
            self.head = idx;
        } else {
            self.slots[self.tail].next = idx;
        }
        self.tail = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
    }

    fn remove_at(&mut self, idx: usize) -> Entry<K, V> {
        self.unlink(idx);
        let entry = self.slots.swap_remove(idx);
        self.index.remove(&entry.key);

        // The former last slot now lives at `idx`; repoint its neighbours
        if idx < self.slots.len() {
            let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
            if prev == NIL {
                self.head = idx;
            } else {
                self.slots[prev].next = idx;
            }
            if next == NIL {
                self.tail = idx;
            } else {
                self.slots[next].prev = idx;
            }
            if let Some(pos) = self.index.get_mut(&self.slots[idx].key) {
                *pos = idx;
            }
        }
        entry
    }
}
