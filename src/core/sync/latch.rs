/*!
 * Completion Latch
 *
 * One-shot countdown barrier: a coordinator blocks until a fixed set of
 * parallel tasks have each signalled completion. Waits are bounded; running
 * out of time is an expected outcome and is reported, not raised.
 */

use super::cancel::CancellationToken;
use super::wait::{deadline_after, Monitor, WaitError};
use crate::core::errors::SyncResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How a latch wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchOutcome {
    /// The count reached zero
    Completed,
    /// The bound expired first; `remaining` tasks had not checked in
    TimedOut { remaining: usize },
}

impl LatchOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Countdown latch with bounded, cancellable waits
///
/// The count reaches zero exactly once; extra `count_down` calls after that
/// are no-ops.
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::{CompletionLatch, LatchOutcome};
/// use std::time::Duration;
///
/// let latch = CompletionLatch::new(2);
/// latch.count_down();
/// assert_eq!(
///     latch.wait_timeout(Some(Duration::from_millis(10))),
///     LatchOutcome::TimedOut { remaining: 1 }
/// );
/// latch.count_down();
/// assert!(latch.is_complete());
/// ```
pub struct CompletionLatch {
    initial: usize,
    monitor: Arc<Monitor<usize>>,
}

impl CompletionLatch {
    /// Create a latch expecting `count` completions
    pub fn new(count: usize) -> Self {
        Self {
            initial: count,
            monitor: Monitor::new(count),
        }
    }

    /// Signal one completion
    ///
    /// Returns `true` only for the call that brings the count to zero.
    pub fn count_down(&self) -> bool {
        let mut remaining = self.monitor.lock();
        if *remaining == 0 {
            return false;
        }

        *remaining -= 1;
        let reached_zero = *remaining == 0;
        drop(remaining);

        if reached_zero {
            debug!(initial = self.initial, "completion latch released");
            self.monitor.notify_all(0);
        }
        reached_zero
    }

    /// Completions still outstanding
    #[inline]
    pub fn count(&self) -> usize {
        *self.monitor.lock()
    }

    /// Completions the latch was created with
    #[inline]
    pub fn initial(&self) -> usize {
        self.initial
    }

    /// Completions already signalled
    #[inline]
    pub fn completed(&self) -> usize {
        self.initial - self.count()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.count() == 0
    }

    /// Wait for the count to reach zero, optionally bounded
    ///
    /// Not cancellable; use [`CompletionLatch::wait`] when the waiting
    /// thread itself may need to be stopped.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> LatchOutcome {
        let guard = self.monitor.lock();
        match self
            .monitor
            .wait_while(guard, 0, None, deadline_after(timeout), |remaining| *remaining > 0)
        {
            Ok(_) => LatchOutcome::Completed,
            Err((remaining, _)) => LatchOutcome::TimedOut {
                remaining: *remaining,
            },
        }
    }

    /// Wait for the count to reach zero, bounded and cancellable
    ///
    /// A timeout is reported as `LatchOutcome::TimedOut`; cancellation is an
    /// error.
    pub fn wait(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> SyncResult<LatchOutcome> {
        let guard = self.monitor.lock();
        match self.monitor.wait_while(
            guard,
            0,
            Some(token),
            deadline_after(timeout),
            |remaining| *remaining > 0,
        ) {
            Ok(_) => Ok(LatchOutcome::Completed),
            Err((remaining, WaitError::Timeout)) => Ok(LatchOutcome::TimedOut {
                remaining: *remaining,
            }),
            Err((_, err @ WaitError::Cancelled)) => Err(err.into_sync(timeout)),
        }
    }
}

impl std::fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionLatch")
            .field("initial", &self.initial)
            .field("remaining", &self.count())
            .finish()
    }
}
