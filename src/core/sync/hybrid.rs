/*!
 * Hybrid Optimistic/Pessimistic Read-Write Lock
 *
 * Three access modes over one piece of shared state:
 *
 * **Optimistic read** (never blocks, never writes shared memory):
 * 1. `try_optimistic_read` records the version (odd = writer inside)
 * 2. Caller reads
 * 3. `validate` re-reads the version; any change means a writer interleaved
 *    and the caller must retry or fall back
 *
 * **Pessimistic read**: shared hold that blocks while a writer is inside or
 * waiting. Any number of pessimistic readers may hold at once.
 *
 * **Write**: exclusive hold. Waits for readers and other writers to leave,
 * then bumps the version on entry (odd) and again on exit (even), so every
 * optimistic read that overlapped any part of the write fails validation.
 *
 * Waiting writers block new pessimistic readers, so a steady read load
 * cannot starve writers. A thread that already holds a read guard must not
 * take another while a writer may be queued.
 *
 * # Soundness of optimistic reads
 *
 * Only `HybridCell<T: Copy>` reads data optimistically. It copies the bytes
 * out as `MaybeUninit<T>` with a volatile read and only assumes them
 * initialised after validation succeeds, so a torn copy is discarded
 * without ever being observed as a `T`.
 */

use super::cancel::CancellationToken;
use super::wait::{deadline_after, Monitor};
use crate::core::errors::SyncResult;
use crate::core::guard::{Guard, GuardDrop, GuardMetadata};
use crate::core::limits::OPTIMISTIC_READ_RETRIES;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Version snapshot handed out by [`HybridLock::try_optimistic_read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticStamp(u64);

impl OptimisticStamp {
    /// Whether the stamp was taken while no writer was inside
    ///
    /// A stamp taken mid-write can never validate.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.0 & 1 == 0
    }
}

/// Snapshot of lock activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HybridLockStats {
    pub failed_validations: u64,
    pub pessimistic_reads: u64,
    pub writes: u64,
}

#[derive(Default)]
struct LockCounters {
    failed_validations: AtomicU64,
    pessimistic_reads: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

impl RwState {
    #[inline]
    fn read_blocked(&self) -> bool {
        self.writer || self.waiting_writers > 0
    }

    #[inline]
    fn write_blocked(&self) -> bool {
        self.writer || self.readers > 0
    }
}

/// Reader/writer lock with an optimistic read mode
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::HybridLock;
///
/// let lock = HybridLock::new(0u32);
///
/// let stamp = lock.try_optimistic_read();
/// assert!(lock.validate(stamp));
///
/// *lock.write() += 1;
/// assert!(!lock.validate(stamp));
/// assert_eq!(*lock.read(), 1);
/// ```
pub struct HybridLock<T = ()> {
    version: AtomicU64,
    monitor: Arc<Monitor<RwState>>,
    counters: LockCounters,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is mediated by the reader/writer protocol:
// shared refs only under a read hold, `&mut` only under the single write hold.
unsafe impl<T: Send> Send for HybridLock<T> {}
unsafe impl<T: Send + Sync> Sync for HybridLock<T> {}

impl<T> HybridLock<T> {
    /// Create an unlocked lock guarding `data`
    pub fn new(data: T) -> Self {
        Self {
            version: AtomicU64::new(0),
            monitor: Monitor::new(RwState::default()),
            counters: LockCounters::default(),
            data: UnsafeCell::new(data),
        }
    }

    /// Consume the lock and return the data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Mutable access without locking; the borrow checker proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    // -------------------------------------------------------------------------
    // Optimistic mode
    // -------------------------------------------------------------------------

    /// Record the current write epoch; never blocks
    #[inline]
    pub fn try_optimistic_read(&self) -> OptimisticStamp {
        OptimisticStamp(self.version.load(Ordering::Acquire))
    }

    /// True iff no write began or committed since `stamp` was issued
    #[inline]
    pub fn validate(&self, stamp: OptimisticStamp) -> bool {
        fence(Ordering::Acquire);
        let valid = stamp.is_clean() && self.version.load(Ordering::Relaxed) == stamp.0;
        if !valid {
            self.counters
                .failed_validations
                .fetch_add(1, Ordering::Relaxed);
        }
        valid
    }

    // -------------------------------------------------------------------------
    // Pessimistic reads
    // -------------------------------------------------------------------------

    /// Shared hold; blocks while a writer holds or waits
    pub fn read(&self) -> HybridReadGuard<'_, T> {
        let state = self.monitor.lock();
        let mut state = self.monitor.block_while(state, 0, |s| s.read_blocked());
        state.readers += 1;
        drop(state);
        self.read_guard()
    }

    /// Shared hold that gives up when `token` is cancelled
    pub fn read_interruptibly(
        &self,
        token: &CancellationToken,
    ) -> SyncResult<HybridReadGuard<'_, T>> {
        self.acquire_read(Some(token), None)
    }

    /// Shared hold bounded by `timeout`, cancellable through `token`
    pub fn read_timeout(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> SyncResult<HybridReadGuard<'_, T>> {
        self.acquire_read(Some(token), Some(timeout))
    }

    /// Shared hold only if available right now
    pub fn try_read(&self) -> Option<HybridReadGuard<'_, T>> {
        let mut state = self.monitor.try_lock()?;
        if state.read_blocked() {
            return None;
        }
        state.readers += 1;
        drop(state);
        Some(self.read_guard())
    }

    fn acquire_read(
        &self,
        token: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> SyncResult<HybridReadGuard<'_, T>> {
        let state = self.monitor.lock();
        match self.monitor.wait_while(
            state,
            0,
            token,
            deadline_after(timeout),
            |s| s.read_blocked(),
        ) {
            Ok(mut state) => {
                state.readers += 1;
                drop(state);
                Ok(self.read_guard())
            }
            Err((_, err)) => {
                trace!(error = %err, "hybrid read acquisition abandoned");
                Err(err.into_sync(timeout))
            }
        }
    }

    fn read_guard(&self) -> HybridReadGuard<'_, T> {
        self.counters
            .pessimistic_reads
            .fetch_add(1, Ordering::Relaxed);
        HybridReadGuard {
            lock: self,
            metadata: GuardMetadata::new("hybrid_read"),
            active: true,
        }
    }

    fn release_read(&self) {
        let mut state = self.monitor.lock();
        state.readers -= 1;
        let last = state.readers == 0;
        drop(state);
        if last {
            self.monitor.notify_all(0);
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Exclusive hold; blocks until readers and other writers have left
    pub fn write(&self) -> HybridWriteGuard<'_, T> {
        let mut state = self.monitor.lock();
        state.waiting_writers += 1;
        let mut state = self.monitor.block_while(state, 0, |s| s.write_blocked());
        state.waiting_writers -= 1;
        state.writer = true;
        drop(state);
        self.write_guard()
    }

    /// Exclusive hold that gives up when `token` is cancelled
    pub fn write_interruptibly(
        &self,
        token: &CancellationToken,
    ) -> SyncResult<HybridWriteGuard<'_, T>> {
        self.acquire_write(Some(token), None)
    }

    /// Exclusive hold bounded by `timeout`, cancellable through `token`
    pub fn write_timeout(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> SyncResult<HybridWriteGuard<'_, T>> {
        self.acquire_write(Some(token), Some(timeout))
    }

    /// Exclusive hold only if available right now
    pub fn try_write(&self) -> Option<HybridWriteGuard<'_, T>> {
        let mut state = self.monitor.try_lock()?;
        if state.write_blocked() {
            return None;
        }
        state.writer = true;
        drop(state);
        Some(self.write_guard())
    }

    fn acquire_write(
        &self,
        token: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> SyncResult<HybridWriteGuard<'_, T>> {
        let mut state = self.monitor.lock();
        state.waiting_writers += 1;
        match self.monitor.wait_while(
            state,
            0,
            token,
            deadline_after(timeout),
            |s| s.write_blocked(),
        ) {
            Ok(mut state) => {
                state.waiting_writers -= 1;
                state.writer = true;
                drop(state);
                Ok(self.write_guard())
            }
            Err((mut state, err)) => {
                // Readers parked behind this writer may proceed now
                state.waiting_writers -= 1;
                drop(state);
                self.monitor.notify_all(0);
                trace!(error = %err, "hybrid write acquisition abandoned");
                Err(err.into_sync(timeout))
            }
        }
    }

    fn write_guard(&self) -> HybridWriteGuard<'_, T> {
        self.version.fetch_add(1, Ordering::Acquire);
        fence(Ordering::Release);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        HybridWriteGuard {
            lock: self,
            metadata: GuardMetadata::new("hybrid_write"),
            active: true,
        }
    }

    fn release_write(&self) {
        self.version.fetch_add(1, Ordering::Release);
        let mut state = self.monitor.lock();
        state.writer = false;
        drop(state);
        self.monitor.notify_all(0);
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Whether a writer currently holds the lock
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.version.load(Ordering::Acquire) & 1 == 1
    }

    /// Number of pessimistic readers currently holding
    pub fn reader_count(&self) -> usize {
        self.monitor.lock().readers
    }

    pub fn stats(&self) -> HybridLockStats {
        HybridLockStats {
            failed_validations: self.counters.failed_validations.load(Ordering::Relaxed),
            pessimistic_reads: self.counters.pessimistic_reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}

impl<T: Default> Default for HybridLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for HybridLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLock")
            .field("version", &self.version.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// GUARDS
// =============================================================================

/// Shared hold on a [`HybridLock`]; released on drop
pub struct HybridReadGuard<'a, T> {
    lock: &'a HybridLock<T>,
    metadata: GuardMetadata,
    active: bool,
}

impl<T> HybridReadGuard<'_, T> {
    /// Release the hold now rather than at end of scope
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for HybridReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a read hold excludes writers
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Guard for HybridReadGuard<'_, T> {
    fn resource_type(&self) -> &'static str {
        "hybrid_read"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl<T> GuardDrop for HybridReadGuard<'_, T> {
    fn on_drop(&mut self) {
        if std::mem::take(&mut self.active) {
            self.lock.release_read();
        }
    }
}

impl<T> Drop for HybridReadGuard<'_, T> {
    fn drop(&mut self) {
        self.on_drop();
    }
}

/// Exclusive hold on a [`HybridLock`]; released on drop
pub struct HybridWriteGuard<'a, T> {
    lock: &'a HybridLock<T>,
    metadata: GuardMetadata,
    active: bool,
}

impl<T> HybridWriteGuard<'_, T> {
    /// Release the hold now rather than at end of scope
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for HybridWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write hold is exclusive
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for HybridWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write hold is exclusive
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Guard for HybridWriteGuard<'_, T> {
    fn resource_type(&self) -> &'static str {
        "hybrid_write"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl<T> GuardDrop for HybridWriteGuard<'_, T> {
    fn on_drop(&mut self) {
        if std::mem::take(&mut self.active) {
            self.lock.release_write();
            trace!(held_us = self.metadata.lifetime_micros(), "hybrid write released");
        }
    }
}

impl<T> Drop for HybridWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.on_drop();
    }
}

// =============================================================================
// OPTIMISTIC VALUE CELL
// =============================================================================

/// `Copy` value whose loads are optimistic reads validated against the lock
///
/// Loads retry a few times when they race a writer, then fall back to a
/// pessimistic read. A load always returns one complete, committed value.
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::HybridCell;
///
/// let cell = HybridCell::new((1u64, 1u64));
/// cell.update(|pair| *pair = (2, 2));
/// assert_eq!(cell.load(), (2, 2));
/// ```
pub struct HybridCell<T: Copy> {
    lock: HybridLock<T>,
}

impl<T: Copy> HybridCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: HybridLock::new(value),
        }
    }

    /// Read the current value without blocking in the common case
    pub fn load(&self) -> T {
        for _ in 0..OPTIMISTIC_READ_RETRIES {
            let stamp = self.lock.try_optimistic_read();
            if !stamp.is_clean() {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: the copy may be torn; it stays `MaybeUninit` until
            // validation proves no writer touched the data meanwhile
            let copy = unsafe {
                std::ptr::read_volatile(self.lock.data.get() as *const MaybeUninit<T>)
            };
            if self.lock.validate(stamp) {
                // SAFETY: validated, so the bytes form a committed value
                return unsafe { copy.assume_init() };
            }
        }

        *self.lock.read()
    }

    /// Replace the value
    pub fn store(&self, value: T) {
        *self.lock.write() = value;
    }

    /// Modify the value in place under the write lock
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.lock.write();
        f(&mut guard)
    }

    /// The lock backing this cell
    pub fn lock(&self) -> &HybridLock<T> {
        &self.lock
    }
}

impl<T: Copy + Default> Default for HybridCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SyncError;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_optimistic_stamp_validates_without_writes() {
        let lock = HybridLock::new(5);
        let stamp = lock.try_optimistic_read();

        assert!(stamp.is_clean());
        assert!(lock.validate(stamp));
        let _reader = lock.read();
        assert!(lock.validate(stamp));
    }

    #[test]
    fn test_write_invalidates_stamp() {
        let lock = HybridLock::new(5);
        let stamp = lock.try_optimistic_read();

        let guard = lock.write();
        assert!(lock.is_write_locked());
        let during = lock.try_optimistic_read();
        assert!(!during.is_clean());
        drop(guard);

        assert!(!lock.validate(stamp));
        assert!(!lock.validate(during));
        assert_eq!(lock.stats().failed_validations, 2);
    }

    #[test]
    fn test_readers_share() {
        let lock = HybridLock::new(1);
        let a = lock.read();
        let b = lock.try_read().expect("second reader should share");

        assert_eq!(lock.reader_count(), 2);
        assert!(lock.try_write().is_none());

        drop(a);
        b.release();
        assert_eq!(lock.reader_count(), 0);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = Arc::new(HybridLock::new(0));
        let guard = lock.write();
        assert!(lock.try_read().is_none());

        let reader = {
            let lock = lock.clone();
            thread::spawn(move || *lock.read())
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_write_interruptibly_cancelled() {
        let lock = Arc::new(HybridLock::new(()));
        let reader = lock.read();
        let token = CancellationToken::new();

        let writer = {
            let lock = lock.clone();
            let token = token.clone();
            thread::spawn(move || lock.write_interruptibly(&token).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(writer.join().unwrap(), Err(SyncError::Cancelled));

        // The abandoned writer must not keep blocking new readers
        assert!(lock.try_read().is_some());
        drop(reader);
    }

    #[test]
    fn test_read_interruptibly_cancelled_under_writer() {
        let lock = Arc::new(HybridLock::new(7));
        let writer = lock.write();
        let token = CancellationToken::new();

        let reader = {
            let lock = lock.clone();
            let token = token.clone();
            thread::spawn(move || lock.read_interruptibly(&token).map(|guard| *guard))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(reader.join().unwrap(), Err(SyncError::Cancelled));
        assert_eq!(lock.reader_count(), 0);

        drop(writer);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn test_read_timeout_under_writer() {
        let lock = Arc::new(HybridLock::new(()));
        let _writer = lock.write();

        let reader = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.read_timeout(Duration::from_millis(20), &CancellationToken::new())
                    .map(|_| ())
            })
        };

        assert_eq!(
            reader.join().unwrap(),
            Err(SyncError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn test_write_timeout() {
        let lock = HybridLock::new(());
        let _reader = lock.read();

        let result = lock
            .write_timeout(Duration::from_millis(20), &CancellationToken::new())
            .map(|_| ());
        assert_eq!(result, Err(SyncError::Timeout(Duration::from_millis(20))));
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Pair {
        left: u64,
        right: u64,
    }

    #[test]
    fn test_cell_never_tears() {
        let cell = Arc::new(HybridCell::new(Pair { left: 0, right: 0 }));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let cell = cell.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut flip = false;
                while !done.load(Ordering::Relaxed) {
                    let next = if flip { u64::MAX } else { 0 };
                    cell.update(|pair| {
                        pair.left = next;
                        pair.right = next;
                    });
                    flip = !flip;
                }
            })
        };

        for _ in 0..50_000 {
            let pair = cell.load();
            assert_eq!(pair.left, pair.right, "torn read: {:?}", pair);
        }

        done.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}
