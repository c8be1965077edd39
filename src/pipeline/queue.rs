/*!
 * Shutdownable Queue
 *
 * Bounded blocking FIFO for N producers and M consumers with a poison-pill
 * shutdown.
 *
 * # Shutdown protocol
 *
 * 1. After the last real item, one party calls `shutdown`, which enqueues a
 *    single `Message::Shutdown` and refuses further `put`s.
 * 2. A consumer that takes the sentinel calls `acknowledge_shutdown`: it
 *    counts itself out of the completion latch, then puts the sentinel back
 *    for the next consumer. One sentinel therefore reaches all M consumers.
 * 3. A coordinator bounds its wait on the latch with `await_shutdown`; if
 *    time runs out it gets a partial report instead of hanging.
 *
 * The sentinel is a distinct enum variant, so it can never collide with a
 * payload value.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{
    deadline_after, CancellationToken, CompletionLatch, LatchOutcome, Monitor, WaitError,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Condition producers wait on
const NOT_FULL: usize = 0;
/// Condition consumers wait on
const NOT_EMPTY: usize = 1;

/// Queue element: a payload or the shutdown sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Item(T),
    Shutdown,
}

impl<T> Message<T> {
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// The payload, if this is not the sentinel
    #[inline]
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Shutdown => None,
        }
    }
}

/// Outcome of waiting for consumers to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Consumers the queue was created for
    pub expected: usize,
    /// Consumers that had acknowledged the sentinel when the wait ended
    pub completed: usize,
    /// Whether the wait gave up before every consumer finished
    pub timed_out: bool,
}

impl ShutdownReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.completed == self.expected
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.expected - self.completed
    }

    fn from_outcome(expected: usize, outcome: LatchOutcome) -> Self {
        match outcome {
            LatchOutcome::Completed => Self {
                expected,
                completed: expected,
                timed_out: false,
            },
            LatchOutcome::TimedOut { remaining } => Self {
                expected,
                completed: expected - remaining,
                timed_out: true,
            },
        }
    }
}

struct QueueState<T> {
    buffer: VecDeque<Message<T>>,
    capacity: usize,
    shutdown_sent: bool,
}

impl<T> QueueState<T> {
    #[inline]
    fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }
}

/// Bounded MPMC queue with cooperative shutdown
///
/// # Example
///
/// ```
/// use coord_kit::core::sync::CancellationToken;
/// use coord_kit::pipeline::{Message, ShutdownableQueue};
///
/// let queue = ShutdownableQueue::new(4, 1).unwrap();
/// let token = CancellationToken::new();
///
/// queue.put("job", &token).unwrap();
/// queue.shutdown(&token).unwrap();
///
/// let handled = queue.consume(&token, |_job| {}).unwrap();
/// assert_eq!(handled, 1);
/// assert!(queue.await_shutdown(None).is_complete());
/// ```
pub struct ShutdownableQueue<T> {
    monitor: Arc<Monitor<QueueState<T>, 2>>,
    capacity: usize,
    consumers: CompletionLatch,
}

impl<T> ShutdownableQueue<T> {
    /// Create a queue holding at most `capacity` messages, drained by
    /// `consumers` consumers
    pub fn new(capacity: usize, consumers: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::config("queue capacity must be greater than zero"));
        }
        if consumers == 0 {
            return Err(SyncError::config("consumer count must be greater than zero"));
        }

        Ok(Self {
            monitor: Monitor::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                shutdown_sent: false,
            }),
            capacity,
            consumers: CompletionLatch::new(consumers),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently buffered, sentinel included
    pub fn len(&self) -> usize {
        self.monitor.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitor.lock().buffer.is_empty()
    }

    /// Whether the sentinel has been sent
    pub fn is_shutdown(&self) -> bool {
        self.monitor.lock().shutdown_sent
    }

    /// Consumers that have not yet acknowledged shutdown
    #[inline]
    pub fn consumers_remaining(&self) -> usize {
        self.consumers.count()
    }

    #[inline]
    pub fn expected_consumers(&self) -> usize {
        self.consumers.initial()
    }

    /// Enqueue without blocking
    ///
    /// Hands the item back if the queue is full or already shut down.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut state = self.monitor.lock();
        if state.shutdown_sent || state.is_full() {
            return Err(item);
        }
        state.buffer.push_back(Message::Item(item));
        drop(state);

        self.monitor.notify_one(NOT_EMPTY);
        Ok(())
    }

    /// Dequeue without blocking
    pub fn try_take(&self) -> Option<Message<T>> {
        let message = self.monitor.lock().buffer.pop_front()?;
        self.monitor.notify_one(NOT_FULL);
        Some(message)
    }
}

impl<T: Send + 'static> ShutdownableQueue<T> {
    /// Enqueue `item`, blocking while the queue is full
    ///
    /// Fails with `ShutDown` once the sentinel has been sent, including for
    /// producers that were already blocked when it was.
    pub fn put(&self, item: T, token: &CancellationToken) -> SyncResult<()> {
        let guard = self.monitor.lock();
        let mut state = self.wait_for_space(guard, token)?;
        if state.shutdown_sent {
            return Err(SyncError::ShutDown);
        }

        state.buffer.push_back(Message::Item(item));
        drop(state);

        self.monitor.notify_one(NOT_EMPTY);
        Ok(())
    }

    /// Dequeue the oldest message, blocking while the queue is empty
    pub fn take(&self, token: &CancellationToken) -> SyncResult<Message<T>> {
        let mut state = self.monitor.lock();
        loop {
            state = match self.monitor.wait_while(state, NOT_EMPTY, Some(token), None, |s| {
                s.buffer.is_empty()
            }) {
                Ok(state) => state,
                Err((state, err)) => {
                    let pass_on = !state.buffer.is_empty();
                    drop(state);
                    if pass_on {
                        self.monitor.notify_one(NOT_EMPTY);
                    }
                    return Err(err.into_sync(None));
                }
            };

            if let Some(message) = state.buffer.pop_front() {
                drop(state);
                self.monitor.notify_one(NOT_FULL);
                return Ok(message);
            }
        }
    }

    /// Enqueue the shutdown sentinel
    ///
    /// Returns `false` if shutdown had already been requested; only one
    /// sentinel is ever created. Producers blocked on a full queue are
    /// released with `ShutDown`.
    pub fn shutdown(&self, token: &CancellationToken) -> SyncResult<bool> {
        let guard = self.monitor.lock();
        let mut state = self.wait_for_space(guard, token)?;
        if state.shutdown_sent {
            return Ok(false);
        }

        state.shutdown_sent = true;
        state.buffer.push_back(Message::Shutdown);
        let buffered = state.buffer.len();
        drop(state);

        debug!(buffered, "shutdown sentinel enqueued");
        self.monitor.notify_one(NOT_EMPTY);
        self.monitor.notify_all(NOT_FULL);
        Ok(true)
    }

    /// Consumer step after taking the sentinel
    ///
    /// Counts the calling consumer out, then re-enqueues the sentinel for
    /// the next one. Returns `true` for the consumer that completed the
    /// shutdown.
    pub fn acknowledge_shutdown(&self, token: &CancellationToken) -> SyncResult<bool> {
        let last = self.consumers.count_down();

        // One sentinel circulates and puts are refused after shutdown, so the
        // slot freed by taking it is normally still free
        let mut state = self.monitor.lock();
        if state.is_full() {
            state = match self.monitor.wait_while(state, NOT_FULL, Some(token), None, |s| {
                s.is_full()
            }) {
                Ok(state) => state,
                Err((_, err)) => return Err(err.into_sync(None)),
            };
        }
        state.buffer.push_back(Message::Shutdown);
        drop(state);
        self.monitor.notify_one(NOT_EMPTY);

        trace!(
            remaining = self.consumers.count(),
            last,
            "shutdown sentinel passed on"
        );
        Ok(last)
    }

    /// Run the consumer loop until the sentinel arrives
    ///
    /// Every payload goes to `handler`; on the sentinel the consumer
    /// acknowledges shutdown and returns how many items it handled.
    pub fn consume<F>(&self, token: &CancellationToken, mut handler: F) -> SyncResult<usize>
    where
        F: FnMut(T),
    {
        let mut handled = 0;
        loop {
            match self.take(token)? {
                Message::Item(item) => {
                    handler(item);
                    handled += 1;
                }
                Message::Shutdown => {
                    self.acknowledge_shutdown(token)?;
                    return Ok(handled);
                }
            }
        }
    }

    /// Wait for every consumer to acknowledge shutdown, bounded by `timeout`
    ///
    /// Running out of time is reported, not raised: the coordinator gets
    /// the number of consumers that did finish and carries on.
    pub fn await_shutdown(&self, timeout: Option<Duration>) -> ShutdownReport {
        let outcome = self.consumers.wait_timeout(timeout);
        ShutdownReport::from_outcome(self.expected_consumers(), outcome)
    }

    /// Like [`await_shutdown`](Self::await_shutdown), but the coordinator's
    /// own wait can be cancelled
    pub fn await_shutdown_interruptibly(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> SyncResult<ShutdownReport> {
        let outcome = self.consumers.wait(timeout, token)?;
        Ok(ShutdownReport::from_outcome(self.expected_consumers(), outcome))
    }

    /// Block until there is room or shutdown was sent
    fn wait_for_space<'a>(
        &'a self,
        guard: parking_lot::MutexGuard<'a, QueueState<T>>,
        token: &CancellationToken,
    ) -> SyncResult<parking_lot::MutexGuard<'a, QueueState<T>>> {
        match self.monitor.wait_while(guard, NOT_FULL, Some(token), None, |s| {
            !s.shutdown_sent && s.is_full()
        }) {
            Ok(state) => Ok(state),
            Err((state, err)) => {
                let pass_on = !state.is_full();
                drop(state);
                if pass_on && err == WaitError::Cancelled {
                    self.monitor.notify_one(NOT_FULL);
                }
                Err(err.into_sync(None))
            }
        }
    }
}

impl<T> std::fmt::Debug for ShutdownableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.monitor.lock();
        f.debug_struct("ShutdownableQueue")
            .field("len", &state.buffer.len())
            .field("capacity", &self.capacity)
            .field("shutdown_sent", &state.shutdown_sent)
            .field("consumers_remaining", &self.consumers.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            ShutdownableQueue::<u8>::new(0, 1),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            ShutdownableQueue::<u8>::new(1, 0),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_fifo_order() {
        let queue = ShutdownableQueue::new(3, 1).unwrap();
        let token = CancellationToken::new();
        for i in 0..3 {
            queue.put(i, &token).unwrap();
        }

        for i in 0..3 {
            assert_eq!(queue.take(&token).unwrap(), Message::Item(i));
        }
    }

    #[test]
    fn test_try_put_when_full() {
        let queue = ShutdownableQueue::new(1, 1).unwrap();
        assert_eq!(queue.try_put(1), Ok(()));
        assert_eq!(queue.try_put(2), Err(2));
        assert_eq!(queue.try_take(), Some(Message::Item(1)));
        assert_eq!(queue.try_take(), None);
    }

    #[test]
    fn test_put_blocks_until_space() {
        let queue = Arc::new(ShutdownableQueue::new(1, 1).unwrap());
        let token = CancellationToken::new();
        queue.put(1, &token).unwrap();

        let producer = {
            let queue = queue.clone();
            let token = token.clone();
            thread::spawn(move || queue.put(2, &token))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(&token).unwrap(), Message::Item(1));

        producer.join().unwrap().unwrap();
        assert_eq!(queue.take(&token).unwrap(), Message::Item(2));
    }

    #[test]
    fn test_second_shutdown_is_noop() {
        let queue = ShutdownableQueue::<u8>::new(2, 1).unwrap();
        let token = CancellationToken::new();

        assert_eq!(queue.shutdown(&token), Ok(true));
        assert_eq!(queue.shutdown(&token), Ok(false));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.put(7, &token), Err(SyncError::ShutDown));
        assert_eq!(queue.try_put(7), Err(7));
    }

    #[test]
    fn test_blocked_producer_released_by_shutdown() {
        let queue = Arc::new(ShutdownableQueue::new(1, 1).unwrap());
        let token = CancellationToken::new();
        queue.put(1, &token).unwrap();

        let producer = {
            let queue = queue.clone();
            let token = token.clone();
            thread::spawn(move || queue.put(2, &token))
        };
        let shutdown = {
            let queue = queue.clone();
            let token = token.clone();
            thread::spawn(move || queue.shutdown(&token))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.take(&token).unwrap(), Message::Item(1));

        // Whoever wins the freed slot, the sentinel is sent exactly once
        match producer.join().unwrap() {
            Ok(()) => assert_eq!(queue.take(&token).unwrap(), Message::Item(2)),
            Err(err) => assert_eq!(err, SyncError::ShutDown),
        }
        assert_eq!(shutdown.join().unwrap(), Ok(true));
        assert!(queue.take(&token).unwrap().is_shutdown());
    }

    #[test]
    fn test_take_cancelled() {
        let queue = Arc::new(ShutdownableQueue::<u8>::new(1, 1).unwrap());
        let token = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let token = token.clone();
            thread::spawn(move || queue.take(&token))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(consumer.join().unwrap(), Err(SyncError::Cancelled));
    }

    #[test]
    fn test_sentinel_reaches_every_consumer() {
        let queue = Arc::new(ShutdownableQueue::new(2, 3).unwrap());
        let token = CancellationToken::new();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let token = token.clone();
                thread::spawn(move || queue.consume(&token, |_: u32| {}))
            })
            .collect();

        for i in 0..20 {
            queue.put(i, &token).unwrap();
        }
        queue.shutdown(&token).unwrap();

        let report = queue.await_shutdown(Some(Duration::from_secs(5)));
        assert!(report.is_complete());
        assert_eq!(queue.consumers_remaining(), 0);

        let handled: usize = consumers
            .into_iter()
            .map(|c| c.join().unwrap().unwrap())
            .sum();
        assert_eq!(handled, 20);
    }

    #[test]
    fn test_await_shutdown_reports_partial_progress() {
        let queue = ShutdownableQueue::<u8>::new(2, 3).unwrap();
        let token = CancellationToken::new();
        queue.shutdown(&token).unwrap();

        assert!(queue.take(&token).unwrap().is_shutdown());
        assert_eq!(queue.acknowledge_shutdown(&token), Ok(false));

        let report = queue.await_shutdown(Some(Duration::from_millis(20)));
        assert_eq!(
            report,
            ShutdownReport {
                expected: 3,
                completed: 1,
                timed_out: true,
            }
        );
        assert_eq!(report.remaining(), 2);
    }
}
