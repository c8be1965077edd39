/*!
 * Ordered Two-Lock Acquisition
 *
 * Runs a body while holding two `InterruptibleLock`s, acquired in the order
 * the caller names them and released in reverse.
 *
 * Ordering alone does not prevent deadlock when two threads name the same
 * pair in opposite orders. What this protocol guarantees is an escape: both
 * acquisitions wait on a `CancellationToken`, so a supervisor that suspects
 * a deadlock cancels one participant. That participant's pending wait fails
 * fast, its already-held first lock is released by guard drop, and the other
 * participant proceeds. No lock outlives the thread that took it, whether
 * the body returns, the wait is cancelled or the body panics.
 */

use super::cancel::CancellationToken;
use super::interruptible::InterruptibleLock;
use crate::core::errors::SyncResult;
use tracing::debug;

/// A pair of locks with a fixed acquisition order
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::{CancellationToken, InterruptibleLock, OrderedLockPair};
///
/// let accounts = InterruptibleLock::new(100);
/// let ledger = InterruptibleLock::new(Vec::new());
/// let token = CancellationToken::new();
///
/// let pair = OrderedLockPair::new(&accounts, &ledger);
/// pair.run_with_both(&token, |balance, entries| {
///     *balance -= 10;
///     entries.push(-10);
/// }).unwrap();
/// ```
pub struct OrderedLockPair<'a, A, B> {
    first: &'a InterruptibleLock<A>,
    second: &'a InterruptibleLock<B>,
}

impl<A, B> Clone for OrderedLockPair<'_, A, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, B> Copy for OrderedLockPair<'_, A, B> {}

impl<'a, A, B> OrderedLockPair<'a, A, B> {
    pub fn new(first: &'a InterruptibleLock<A>, second: &'a InterruptibleLock<B>) -> Self {
        Self { first, second }
    }

    /// The same pair acquired in the opposite order
    pub fn reversed(&self) -> OrderedLockPair<'a, B, A> {
        OrderedLockPair {
            first: self.second,
            second: self.first,
        }
    }

    pub fn first(&self) -> &'a InterruptibleLock<A> {
        self.first
    }

    pub fn second(&self) -> &'a InterruptibleLock<B> {
        self.second
    }

    /// Acquire `first` then `second`, run `body`, release in reverse order
    ///
    /// Fails with `Cancelled` if `token` fires during either wait; any lock
    /// already taken is released before the error reaches the caller.
    pub fn run_with_both<R, F>(&self, token: &CancellationToken, body: F) -> SyncResult<R>
    where
        F: FnOnce(&mut A, &mut B) -> R,
    {
        self.run_staged(token, |_| {}, body)
    }

    /// Like [`run_with_both`](Self::run_with_both), with a step that runs
    /// while only `first` is held
    pub fn run_staged<R, S, F>(
        &self,
        token: &CancellationToken,
        after_first: S,
        body: F,
    ) -> SyncResult<R>
    where
        S: FnOnce(&mut A),
        F: FnOnce(&mut A, &mut B) -> R,
    {
        let mut first = self.first.lock_interruptibly(token)?;
        after_first(&mut *first);

        let mut second = match self.second.lock_interruptibly(token) {
            Ok(guard) => guard,
            Err(err) => {
                debug!(
                    held = self.first.name(),
                    wanted = self.second.name(),
                    error = %err,
                    "releasing first lock after failed second acquisition"
                );
                return Err(err);
            }
        };

        let result = body(&mut *first, &mut *second);

        drop(second);
        drop(first);
        Ok(result)
    }
}

/// Acquire `first` then `second` under `token`, run `body`, release both
pub fn run_with_both<A, B, R, F>(
    first: &InterruptibleLock<A>,
    second: &InterruptibleLock<B>,
    token: &CancellationToken,
    body: F,
) -> SyncResult<R>
where
    F: FnOnce(&mut A, &mut B) -> R,
{
    OrderedLockPair::new(first, second).run_with_both(token, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SyncError;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_body_with_both() {
        let a = InterruptibleLock::new(1);
        let b = InterruptibleLock::new(2);

        let sum = run_with_both(&a, &b, &CancellationToken::new(), |a, b| *a + *b).unwrap();
        assert_eq!(sum, 3);
        assert!(!a.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn test_cancelled_before_start() {
        let a = InterruptibleLock::new(());
        let b = InterruptibleLock::new(());
        let token = CancellationToken::new();
        token.cancel();

        let result = run_with_both(&a, &b, &token, |_, _| ());
        assert_eq!(result, Err(SyncError::Cancelled));
        assert!(!a.is_locked());
    }

    #[test]
    fn test_first_released_when_second_cancelled() {
        let a = Arc::new(InterruptibleLock::new(()));
        let b = Arc::new(InterruptibleLock::new(()));
        let token = CancellationToken::new();
        let _held_b = b.lock().unwrap();

        let worker = {
            let (a, b, token) = (a.clone(), b.clone(), token.clone());
            thread::spawn(move || {
                let result = OrderedLockPair::new(&*a, &*b).run_with_both(&token, |_, _| ());
                (result, a.is_held_by_current_thread(), b.is_held_by_current_thread())
            })
        };

        while b.queue_length() == 0 {
            thread::yield_now();
        }
        assert!(a.is_locked());
        token.cancel();

        let (result, holds_a, holds_b) = worker.join().unwrap();
        assert_eq!(result, Err(SyncError::Cancelled));
        assert!(!holds_a && !holds_b);
        assert!(!a.is_locked());
    }

    #[test]
    fn test_body_panic_releases_both() {
        let a = InterruptibleLock::new(());
        let b = InterruptibleLock::new(());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_with_both(&a, &b, &CancellationToken::new(), |_, _| panic!("body failed"))
        }));

        assert!(outcome.is_err());
        assert!(!a.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn test_staged_step_sees_only_first() {
        let a = Arc::new(InterruptibleLock::new(0));
        let b = Arc::new(InterruptibleLock::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let worker = {
            let (a, b, barrier) = (a.clone(), b.clone(), barrier.clone());
            thread::spawn(move || {
                OrderedLockPair::new(&*a, &*b).run_staged(
                    &CancellationToken::new(),
                    |first| {
                        *first += 1;
                        barrier.wait();
                        thread::sleep(Duration::from_millis(10));
                    },
                    |first, second| {
                        *second = *first * 10;
                    },
                )
            })
        };

        barrier.wait();
        assert!(a.is_locked());
        worker.join().unwrap().unwrap();
        assert_eq!(*b.lock().unwrap(), 10);
    }
}
