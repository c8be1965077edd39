/*!
 * Versioned Reference
 *
 * Compare-and-swap slot that pairs a value with a monotonically advancing
 * stamp. A CAS must match both halves, so a value that went A -> B -> A in
 * the meantime is still rejected because its stamp moved on (the ABA hazard).
 *
 * # Design: Immutable Pairs Behind ArcSwap
 *
 * The current `(value, stamp)` pair lives in an immutable heap cell and the
 * slot swaps whole cells by pointer. Comparing the caller's expectation
 * against a loaded cell and then swapping that exact cell makes the check
 * and the update one atomic step: if anyone else swapped in between, the
 * pointer no longer matches and the CAS fails. Holding the loaded `Arc`
 * keeps its address from being reused, so the pointer compare itself cannot
 * suffer ABA.
 */

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Immutable value/stamp pair
#[derive(Debug)]
struct Stamped<T> {
    value: T,
    stamp: u64,
}

/// Atomically updatable `(value, stamp)` slot
///
/// # Performance
///
/// - **Reads**: lock-free, never block
/// - **CAS**: one allocation for the new pair plus an atomic pointer swap
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::VersionedRef;
///
/// let slot = VersionedRef::new(100, 1);
/// let (value, stamp) = slot.read();
///
/// assert!(slot.compare_and_set(&value, 101, stamp, stamp + 1));
/// // A stale snapshot loses even if the value comes back around
/// assert!(!slot.compare_and_set(&value, 101, stamp, stamp + 1));
/// ```
pub struct VersionedRef<T> {
    slot: ArcSwap<Stamped<T>>,
}

impl<T> VersionedRef<T> {
    /// Create a slot holding `value` at `stamp`
    pub fn new(value: T, stamp: u64) -> Self {
        Self {
            slot: ArcSwap::from_pointee(Stamped { value, stamp }),
        }
    }

    /// Current stamp
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.slot.load().stamp
    }

    /// Snapshot of the current pair
    #[inline]
    pub fn read(&self) -> (T, u64)
    where
        T: Clone,
    {
        let current = self.slot.load();
        (current.value.clone(), current.stamp)
    }

    /// Current value
    #[inline]
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        self.slot.load().value.clone()
    }

    /// Replace the pair iff it currently equals `(expected_value, expected_stamp)`
    ///
    /// `new_stamp` must be strictly greater than `expected_stamp`; a
    /// non-advancing stamp is refused without touching the slot. Returns
    /// whether the swap happened. A `false` is a normal outcome: re-read and
    /// retry, or give up.
    pub fn compare_and_set(
        &self,
        expected_value: &T,
        new_value: T,
        expected_stamp: u64,
        new_stamp: u64,
    ) -> bool
    where
        T: PartialEq,
    {
        if new_stamp <= expected_stamp {
            return false;
        }

        let current = self.slot.load_full();
        if current.stamp != expected_stamp || current.value != *expected_value {
            return false;
        }

        self.swap_if_current(&current, Stamped {
            value: new_value,
            stamp: new_stamp,
        })
    }

    /// Advance only the stamp, provided the value still matches
    ///
    /// Fails if the value differs or `new_stamp` would not move the stamp
    /// forward.
    pub fn attempt_stamp(&self, expected_value: &T, new_stamp: u64) -> bool
    where
        T: PartialEq + Clone,
    {
        loop {
            let current = self.slot.load_full();
            if current.value != *expected_value || new_stamp <= current.stamp {
                return false;
            }

            let next = Stamped {
                value: current.value.clone(),
                stamp: new_stamp,
            };
            if self.swap_if_current(&current, next) {
                return true;
            }
        }
    }

    /// Apply `f` in a read/CAS retry loop, advancing the stamp by one
    ///
    /// `f` may run more than once under contention. Returns the installed
    /// pair.
    pub fn update<F>(&self, mut f: F) -> (T, u64)
    where
        T: Clone,
        F: FnMut(&T) -> T,
    {
        loop {
            let current = self.slot.load_full();
            let next = Stamped {
                value: f(&current.value),
                stamp: current.stamp + 1,
            };
            let installed = (next.value.clone(), next.stamp);
            if self.swap_if_current(&current, next) {
                return installed;
            }
        }
    }

    fn swap_if_current(&self, current: &Arc<Stamped<T>>, next: Stamped<T>) -> bool {
        let previous = self.slot.compare_and_swap(current, Arc::new(next));
        Arc::ptr_eq(&*previous, current)
    }
}

impl<T: fmt::Debug> fmt::Debug for VersionedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.slot.load();
        f.debug_struct("VersionedRef")
            .field("value", &current.value)
            .field("stamp", &current.stamp)
            .finish()
    }
}
