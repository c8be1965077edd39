/*!
 * Interruptible Lock
 *
 * Exclusive lock with explicit owner tracking whose waits can be abandoned
 * through a `CancellationToken`. A waiter that gives up leaves the wait
 * queue and wakes the rest, so a cancelled acquisition never strands the
 * lock or the threads queued behind it.
 *
 * # Fairness
 *
 * - **Barging** (default): any waiter may take a free lock. Higher
 *   throughput, no ordering promise.
 * - **Fair**: the lock goes to waiters in arrival order.
 *
 * # Re-entrancy
 *
 * Guards hand out `&mut T`, so a second acquisition by the owner cannot be
 * granted. It fails with `SyncError::AlreadyHeld` instead of deadlocking.
 */

use super::cancel::CancellationToken;
use super::wait::{deadline_after, Monitor};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::guard::{Guard, GuardDrop, GuardMetadata};
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace};

/// Grant order for contended acquisitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockFairness {
    /// Strict arrival order
    Fair,
    /// First thread to observe the lock free wins
    #[default]
    Barging,
}

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// Exclusive, cancellable, owner-tracking lock
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::{CancellationToken, InterruptibleLock};
///
/// let lock = InterruptibleLock::new(Vec::new());
/// let token = CancellationToken::new();
///
/// let mut guard = lock.lock_interruptibly(&token).unwrap();
/// guard.push(1);
/// assert!(lock.is_held_by_current_thread());
/// drop(guard);
/// assert!(!lock.is_locked());
/// ```
pub struct InterruptibleLock<T = ()> {
    name: &'static str,
    fairness: LockFairness,
    monitor: Arc<Monitor<OwnerState>>,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through the single outstanding guard
unsafe impl<T: Send> Send for InterruptibleLock<T> {}
unsafe impl<T: Send> Sync for InterruptibleLock<T> {}

impl<T> InterruptibleLock<T> {
    /// Create a barging lock
    pub fn new(data: T) -> Self {
        Self::with_fairness(data, LockFairness::Barging)
    }

    /// Create a lock granting in arrival order
    pub fn fair(data: T) -> Self {
        Self::with_fairness(data, LockFairness::Fair)
    }

    pub fn with_fairness(data: T, fairness: LockFairness) -> Self {
        Self {
            name: "lock",
            fairness,
            monitor: Monitor::new(OwnerState::default()),
            data: UnsafeCell::new(data),
        }
    }

    /// Attach a name used in log events
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn fairness(&self) -> LockFairness {
        self.fairness
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Acquire, giving up if `token` is cancelled while waiting
    ///
    /// A token that is already cancelled fails immediately, even when the
    /// lock is free.
    pub fn lock_interruptibly(
        &self,
        token: &CancellationToken,
    ) -> SyncResult<InterruptibleGuard<'_, T>> {
        self.acquire(Some(token), None)
    }

    /// Acquire with a bound on the wait, still honouring `token`
    pub fn lock_timeout(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> SyncResult<InterruptibleGuard<'_, T>> {
        self.acquire(Some(token), Some(timeout))
    }

    /// Acquire without cancellation
    ///
    /// Only fails when the calling thread already owns the lock.
    pub fn lock(&self) -> SyncResult<InterruptibleGuard<'_, T>> {
        self.acquire(None, None)
    }

    /// Acquire only if the lock is free and nobody is queued ahead (fair mode)
    pub fn try_lock(&self) -> Option<InterruptibleGuard<'_, T>> {
        let mut state = self.monitor.lock();
        let queue_ahead = self.fairness == LockFairness::Fair && !state.waiters.is_empty();
        if state.owner.is_some() || queue_ahead {
            return None;
        }
        state.owner = Some(thread::current().id());
        drop(state);
        Some(self.guard())
    }

    fn acquire(
        &self,
        token: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> SyncResult<InterruptibleGuard<'_, T>> {
        let me = thread::current().id();
        let mut state = self.monitor.lock();
        if state.owner == Some(me) {
            return Err(SyncError::AlreadyHeld);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        let fair = self.fairness == LockFairness::Fair;
        let outcome = self.monitor.wait_while(
            state,
            0,
            token,
            deadline_after(timeout),
            |s| s.owner.is_some() || (fair && s.waiters.front() != Some(&ticket)),
        );

        match outcome {
            Ok(mut state) => {
                state.waiters.retain(|t| *t != ticket);
                state.owner = Some(me);
                drop(state);
                Ok(self.guard())
            }
            Err((mut state, err)) => {
                state.waiters.retain(|t| *t != ticket);
                drop(state);
                // The queue head may have changed; let the others re-check
                self.monitor.notify_all(0);
                debug!(lock = self.name, error = %err, "lock acquisition abandoned");
                Err(err.into_sync(timeout))
            }
        }
    }

    fn guard(&self) -> InterruptibleGuard<'_, T> {
        trace!(lock = self.name, "lock acquired");
        InterruptibleGuard {
            lock: self,
            metadata: GuardMetadata::new("interruptible_lock"),
            active: true,
            _not_send: PhantomData,
        }
    }

    fn release(&self) {
        let mut state = self.monitor.lock();
        state.owner = None;
        drop(state);
        self.monitor.notify_all(0);
    }

    /// Whether any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.monitor.lock().owner.is_some()
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.monitor.lock().owner == Some(thread::current().id())
    }

    /// Number of threads currently waiting
    pub fn queue_length(&self) -> usize {
        self.monitor.lock().waiters.len()
    }
}

impl<T: Default> Default for InterruptibleLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for InterruptibleLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptibleLock")
            .field("name", &self.name)
            .field("fairness", &self.fairness)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on an [`InterruptibleLock`]
///
/// Tied to the acquiring thread (not `Send`) because ownership is tracked
/// per thread.
pub struct InterruptibleGuard<'a, T> {
    lock: &'a InterruptibleLock<T>,
    metadata: GuardMetadata,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> InterruptibleGuard<'a, T> {
    /// The lock this guard holds
    pub fn lock(&self) -> &'a InterruptibleLock<T> {
        self.lock
    }

    /// Release now rather than at end of scope
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for InterruptibleGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard is the only holder
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for InterruptibleGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this guard is the only holder
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Guard for InterruptibleGuard<'_, T> {
    fn resource_type(&self) -> &'static str {
        "interruptible_lock"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl<T> GuardDrop for InterruptibleGuard<'_, T> {
    fn on_drop(&mut self) {
        if std::mem::take(&mut self.active) {
            self.lock.release();
            trace!(
                lock = self.lock.name,
                held_us = self.metadata.lifetime_micros(),
                "lock released"
            );
        }
    }
}

impl<T> Drop for InterruptibleGuard<'_, T> {
    fn drop(&mut self) {
        self.on_drop();
    }
}
