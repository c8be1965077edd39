/*!
 * Monitor Wait Primitive
 *
 * A `parking_lot` mutex paired with one or more condition variables. Every
 * blocking primitive in the toolkit (locks, latch, queue) keeps its state in
 * a monitor and blocks through `wait_while`, which folds three exit
 * conditions into one loop:
 *
 * - the predicate clears (success, guard returned)
 * - the cancellation token fires (`WaitError::Cancelled`)
 * - the deadline passes (`WaitError::Timeout`)
 *
 * Failure paths hand the guard back so callers can restore their invariants
 * (drop a wait ticket, pass on a wakeup) under the same critical section.
 */

use super::cancel::{CancellationToken, Wake};
use crate::core::errors::SyncError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Wait operation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait operation timed out")]
    Timeout,

    #[error("Wait was cancelled")]
    Cancelled,
}

impl WaitError {
    /// Lift into the public error type, attaching the bound that expired
    pub fn into_sync(self, timeout: Option<Duration>) -> SyncError {
        match self {
            Self::Timeout => SyncError::Timeout(timeout.unwrap_or_default()),
            Self::Cancelled => SyncError::Cancelled,
        }
    }
}

/// Outcome of a fallible monitor wait; the guard comes back either way
pub(crate) type WaitOutcome<'a, S> =
    Result<MutexGuard<'a, S>, (MutexGuard<'a, S>, WaitError)>;

/// Convert an optional relative timeout into an absolute deadline
///
/// Durations too large to represent are treated as "no deadline".
#[inline]
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

/// State guarded by a mutex with `N` condition variables
pub(crate) struct Monitor<S, const N: usize = 1> {
    state: Mutex<S>,
    conds: [Condvar; N],
}

impl<S, const N: usize> Monitor<S, N> {
    pub(crate) fn new(state: S) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            conds: std::array::from_fn(|_| Condvar::new()),
        })
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, S>> {
        self.state.try_lock()
    }

    /// Wake one thread waiting on condition `cond`
    #[inline]
    pub(crate) fn notify_one(&self, cond: usize) -> bool {
        self.conds[cond].notify_one()
    }

    /// Wake every thread waiting on condition `cond`
    #[inline]
    pub(crate) fn notify_all(&self, cond: usize) -> usize {
        self.conds[cond].notify_all()
    }

    /// Block until `blocked` returns false; never times out, never cancels
    pub(crate) fn block_while<'a, F>(
        &self,
        mut guard: MutexGuard<'a, S>,
        cond: usize,
        mut blocked: F,
    ) -> MutexGuard<'a, S>
    where
        F: FnMut(&mut S) -> bool,
    {
        while blocked(&mut guard) {
            self.conds[cond].wait(&mut guard);
        }
        guard
    }
}

impl<S: Send + 'static, const N: usize> Monitor<S, N> {
    /// Block until `blocked` returns false, the token fires or the deadline passes
    ///
    /// Cancellation is checked before the predicate, so a cancelled token
    /// fails fast even when the resource happens to be free.
    pub(crate) fn wait_while<'a, F>(
        self: &'a Arc<Self>,
        mut guard: MutexGuard<'a, S>,
        cond: usize,
        token: Option<&CancellationToken>,
        deadline: Option<Instant>,
        mut blocked: F,
    ) -> WaitOutcome<'a, S>
    where
        F: FnMut(&mut S) -> bool,
    {
        let _registration = token.map(|t| {
            let waker: Weak<dyn Wake> = Arc::downgrade(self) as Weak<dyn Wake>;
            t.register(waker)
        });

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err((guard, WaitError::Cancelled));
            }
            if !blocked(&mut guard) {
                return Ok(guard);
            }

            match deadline {
                Some(deadline) => {
                    if self.conds[cond].wait_until(&mut guard, deadline).timed_out() {
                        if token.is_some_and(CancellationToken::is_cancelled) {
                            return Err((guard, WaitError::Cancelled));
                        }
                        if !blocked(&mut guard) {
                            return Ok(guard);
                        }
                        return Err((guard, WaitError::Timeout));
                    }
                }
                None => self.conds[cond].wait(&mut guard),
            }
        }
    }
}

impl<S: Send, const N: usize> Wake for Monitor<S, N> {
    fn wake(&self) {
        let _guard = self.state.lock();
        for cond in &self.conds {
            cond.notify_all();
        }
    }
}
