/*!
 * Cancellation Tokens
 *
 * Threads cannot be interrupted from the outside, so every blocking wait in
 * the toolkit takes a token instead. Cancelling the token wakes every thread
 * blocked on a toolkit primitive with that token, and their waits fail with
 * `Cancelled` after releasing anything they partially acquired.
 *
 * # Wakeup protocol
 *
 * A waiter registers its monitor with the token while holding the monitor's
 * mutex, then checks the flag before sleeping. `cancel` sets the flag first,
 * snapshots the registered monitors and only then locks each one to notify.
 * Either the snapshot contains the waiter (and the notify lands after it has
 * gone to sleep) or the registration happened after the flag was set (and
 * the waiter sees it). No lock is held across both sides, so the two mutex
 * classes never nest in opposite orders.
 */

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Something blocked threads sleep on and that a cancellation must poke
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<Vec<(u64, Weak<dyn Wake>)>>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn fresh() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            wakers: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        })
    }
}

/// Shared, sticky cancellation flag
///
/// Clones share the same flag. Once cancelled a token stays cancelled, and
/// every later wait made with it fails fast without blocking.
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let supervisor = token.clone();
/// assert!(supervisor.cancel());
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self {
            inner: TokenInner::fresh(),
        }
    }

    /// A token that is cancelled whenever `self` is, but whose own
    /// cancellation does not reach `self`
    pub fn child(&self) -> Self {
        let child = Self {
            inner: TokenInner::fresh(),
        };
        {
            let mut children = self.inner.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Same ordering as waiter registration: push, then check the flag
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Trigger cancellation and wake every registered waiter
    ///
    /// Returns `true` if this call performed the cancellation, `false` if
    /// the token was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let wakers: Vec<Arc<dyn Wake>> = self
            .inner
            .wakers
            .lock()
            .iter()
            .filter_map(|(_, waker)| waker.upgrade())
            .collect();

        let children: Vec<CancellationToken> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| CancellationToken { inner })
            .collect();

        debug!(
            waiters = wakers.len(),
            children = children.len(),
            "cancellation token triggered"
        );
        for waker in wakers {
            waker.wake();
        }
        for child in children {
            child.cancel();
        }
        true
    }

    /// Check whether the token has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a monitor to be woken on cancellation
    ///
    /// The registration is removed when the returned handle is dropped.
    pub(crate) fn register(&self, waker: Weak<dyn Wake>) -> Registration<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.wakers.lock().push((id, waker));
        Registration { token: self, id }
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.wakers.lock().len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Live registration of a waiter with a token
pub(crate) struct Registration<'a> {
    token: &'a CancellationToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token
            .inner
            .wakers
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!token.is_cancelled());
        assert!(clone.cancel());
        assert!(token.is_cancelled());
        assert!(!token.cancel());
    }

    #[test]
    fn test_cancel_wakes_registered() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let weak: Weak<dyn Wake> = Arc::downgrade(&waker) as Weak<dyn Wake>;

        let registration = token.register(weak);
        assert_eq!(token.registered(), 1);

        token.cancel();
        assert_eq!(waker.0.load(Ordering::SeqCst), 1);

        drop(registration);
        assert_eq!(token.registered(), 0);
    }

    #[test]
    fn test_dropped_waker_is_skipped() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let weak: Weak<dyn Wake> = Arc::downgrade(&waker) as Weak<dyn Wake>;
        let _registration = token.register(weak);

        drop(waker);
        assert!(token.cancel());
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child();

        assert!(child.cancel());
        assert!(!parent.is_cancelled());

        let second = parent.child();
        parent.cancel();
        assert!(second.is_cancelled());
        assert!(parent.child().is_cancelled());
    }
}
