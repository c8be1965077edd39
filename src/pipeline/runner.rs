/*!
 * Pipeline Runner
 *
 * Drives a `ShutdownableQueue` end to end: N producer threads, M consumer
 * threads, one sentinel after the last producer finishes and a bounded wait
 * for the consumers. Threads are scoped, so closures may borrow from the
 * caller and every thread is joined before `run` returns.
 *
 * Workers wait on a child of the caller's token. If the completion wait
 * times out, only that child is cancelled so consumers blocked on an empty
 * queue give up; the report still carries the partial counts. A worker that
 * panics cancels the child as it unwinds, which releases producers blocked
 * on a full queue.
 */

use super::queue::{ShutdownReport, ShutdownableQueue};
use crate::core::config::ToolkitConfig;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::CancellationToken;
use crate::monitoring::span_scenario;
use serde::Serialize;
use std::panic;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Sizing for one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    pub shutdown_timeout: Duration,
}

impl From<&ToolkitConfig> for PipelineConfig {
    fn from(config: &ToolkitConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            producers: config.producers,
            consumers: config.consumers,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// What a pipeline run moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Items accepted by the queue
    pub produced: usize,
    /// Items handed to consumer handlers
    pub consumed: usize,
    /// Items handled by each consumer, by consumer index
    pub per_consumer: Vec<usize>,
    pub shutdown: ShutdownReport,
}

impl PipelineReport {
    /// Every produced item was consumed and every consumer finished
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.produced == self.consumed && self.shutdown.is_complete()
    }
}

/// Multi-producer, multi-consumer run over a shutdownable queue
///
/// # Example
///
/// ```
/// use coord_kit::pipeline::{Pipeline, PipelineConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// let pipeline = Pipeline::new(PipelineConfig {
///     queue_capacity: 4,
///     producers: 2,
///     consumers: 2,
///     shutdown_timeout: Duration::from_secs(5),
/// })
/// .unwrap();
///
/// let sum = AtomicUsize::new(0);
/// let report = pipeline
///     .run(|producer| (0..5).map(move |i| producer * 10 + i), |_, item| {
///         sum.fetch_add(item, Ordering::Relaxed);
///     })
///     .unwrap();
///
/// assert!(report.is_complete());
/// assert_eq!(sum.into_inner(), 10 + 60);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> SyncResult<Self> {
        let sizes = [
            ("queue capacity", config.queue_capacity),
            ("producer count", config.producers),
            ("consumer count", config.consumers),
        ];
        for (what, value) in sizes {
            if value == 0 {
                return Err(SyncError::config(format!("{} must be greater than zero", what)));
            }
        }
        Ok(Self { config })
    }

    /// Build from the toolkit configuration
    pub fn from_config(config: &ToolkitConfig) -> SyncResult<Self> {
        Self::new(PipelineConfig::from(config))
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with a private cancellation token
    pub fn run<T, I, P, H>(&self, produce: P, handle: H) -> SyncResult<PipelineReport>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        P: Fn(usize) -> I + Sync,
        H: Fn(usize, T) + Sync,
    {
        self.run_with_token(&CancellationToken::new(), produce, handle)
    }

    /// Run under `token`
    ///
    /// `produce(i)` yields the items of producer `i`; `handle(j, item)`
    /// processes one item on consumer `j`. Cancelling `token` stops every
    /// blocked participant, including the coordinator's completion wait; the
    /// run then fails with `Cancelled` once all threads have been joined.
    ///
    /// The run never cancels `token` itself. Internal aborts (timeouts,
    /// worker panics, spawn failures) go through a child token.
    pub fn run_with_token<T, I, P, H>(
        &self,
        token: &CancellationToken,
        produce: P,
        handle: H,
    ) -> SyncResult<PipelineReport>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        P: Fn(usize) -> I + Sync,
        H: Fn(usize, T) + Sync,
    {
        let config = self.config;
        let run_token = token.child();
        let token = &run_token;
        let queue = ShutdownableQueue::new(config.queue_capacity, config.consumers)?;
        let scenario = span_scenario("pipeline");
        let _entered = scenario.enter();

        info!(
            producers = config.producers,
            consumers = config.consumers,
            capacity = config.queue_capacity,
            "pipeline starting"
        );

        let (queue, produce, handle) = (&queue, &produce, &handle);
        let report = thread::scope(|scope| -> SyncResult<PipelineReport> {
            let mut consumers = Vec::with_capacity(config.consumers);
            for id in 0..config.consumers {
                let worker = spawn_named(scope, format!("consumer-{}", id), token, move || {
                    let _unwind = CancelOnUnwind(token);
                    let mut handled = 0;
                    let outcome = queue.consume(token, |item| {
                        handle(id, item);
                        handled += 1;
                    });
                    (handled, outcome)
                })?;
                consumers.push(worker);
            }

            let mut producers = Vec::with_capacity(config.producers);
            for id in 0..config.producers {
                let worker = spawn_named(scope, format!("producer-{}", id), token, move || {
                    let _unwind = CancelOnUnwind(token);
                    let mut sent = 0;
                    for item in produce(id) {
                        queue.put(item, token)?;
                        sent += 1;
                    }
                    Ok::<usize, SyncError>(sent)
                })?;
                producers.push(worker);
            }

            let mut produced = 0;
            let mut failure = None;
            for worker in producers {
                match join_or_cancel(worker, token) {
                    Ok(sent) => produced += sent,
                    Err(err) => {
                        token.cancel();
                        failure.get_or_insert(err);
                    }
                }
            }

            let shutdown = match failure {
                Some(_) => None,
                None => match queue.shutdown(token).and_then(|_| {
                    queue.await_shutdown_interruptibly(Some(config.shutdown_timeout), token)
                }) {
                    Ok(report) => Some(report),
                    Err(err) => {
                        token.cancel();
                        failure.get_or_insert(err);
                        None
                    }
                },
            };

            if shutdown.is_some_and(|report| report.timed_out) {
                warn!(
                    remaining = queue.consumers_remaining(),
                    timeout_ms = config.shutdown_timeout.as_millis() as u64,
                    "consumers did not finish in time, cancelling"
                );
                token.cancel();
            }

            let mut per_consumer = Vec::with_capacity(config.consumers);
            for worker in consumers {
                let (handled, _outcome) = join_or_cancel(worker, token);
                per_consumer.push(handled);
            }

            match (failure, shutdown) {
                (Some(err), _) => Err(err),
                (None, Some(shutdown)) => Ok(PipelineReport {
                    produced,
                    consumed: per_consumer.iter().sum(),
                    per_consumer,
                    shutdown,
                }),
                (None, None) => Err(SyncError::Cancelled),
            }
        });

        match &report {
            Ok(report) => {
                scenario.record_items(report.consumed);
                scenario.record_outcome(report.is_complete());
                info!(
                    produced = report.produced,
                    consumed = report.consumed,
                    completed = report.shutdown.completed,
                    timed_out = report.shutdown.timed_out,
                    "pipeline finished"
                );
            }
            Err(err) => {
                scenario.record_outcome(false);
                warn!(error = %err, "pipeline aborted");
            }
        }
        report
    }
}

/// Spawn a named scoped thread; on failure cancel `token` so threads
/// already running can be joined
fn spawn_named<'scope, 'env, R, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: String,
    token: &CancellationToken,
    body: F,
) -> SyncResult<ScopedJoinHandle<'scope, R>>
where
    R: Send + 'scope,
    F: FnOnce() -> R + Send + 'scope,
{
    thread::Builder::new()
        .name(name)
        .spawn_scoped(scope, body)
        .map_err(|e| {
            token.cancel();
            SyncError::ThreadSpawn(e.to_string())
        })
}

/// Cancels the run when the owning worker unwinds
struct CancelOnUnwind<'a>(&'a CancellationToken);

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let current = thread::current();
            warn!(
                worker = current.name().unwrap_or("unnamed"),
                "worker panicked, cancelling run"
            );
            self.0.cancel();
        }
    }
}

/// Join a worker; if it panicked, cancel `token` so the remaining workers
/// unblock, then resume the panic
fn join_or_cancel<R>(worker: ScopedJoinHandle<'_, R>, token: &CancellationToken) -> R {
    match worker.join() {
        Ok(result) => result,
        Err(payload) => {
            token.cancel();
            panic::resume_unwind(payload)
        }
    }
}
