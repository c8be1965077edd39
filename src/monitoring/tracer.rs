/*!
 * Structured Tracing
 * Subscriber setup and timed spans for coordination scenarios
 *
 * Primitives emit `debug`/`trace` events (cancellations, evictions,
 * shutdown propagation); runners and the demo binary emit `info`. This
 * module decides where those events go.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment switch for JSON output
pub const TRACE_JSON_ENV: &str = "COORD_TRACE_JSON";

/// Scenarios slower than this are reported at `warn`
const SLOW_SCENARIO: Duration = Duration::from_secs(1);

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - COORD_TRACE_JSON: Enable JSON output (default: false)
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that may happen.
pub fn init_tracing() {
    if !try_init_tracing() {
        panic!("a global tracing subscriber is already installed");
    }
}

/// Like [`init_tracing`], returning `false` instead of panicking when a
/// subscriber is already installed
pub fn try_init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json_output_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!("Structured tracing initialized");
    }
    installed
}

fn json_output_requested() -> bool {
    std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Timed span around one coordination scenario
///
/// Logs start and completion with the elapsed time; completion is logged
/// at `warn` when the scenario ran unusually long.
pub struct ScenarioSpan {
    span: tracing::Span,
    start: Instant,
    name: &'static str,
    run_id: u64,
}

impl ScenarioSpan {
    pub fn new(name: &'static str) -> Self {
        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let span = span!(
            Level::INFO,
            "scenario",
            name = name,
            run_id = run_id,
            outcome = tracing::field::Empty,
            items = tracing::field::Empty,
        );

        span.in_scope(|| debug!(scenario = name, run_id, "scenario started"));

        Self {
            span,
            start: Instant::now(),
            name,
            run_id,
        }
    }

    #[inline]
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Record how the scenario ended
    pub fn record_outcome(&self, success: bool) {
        self.span
            .record("outcome", if success { "success" } else { "failure" });
    }

    /// Record how many items the scenario moved
    pub fn record_items(&self, count: usize) {
        self.span.record("items", count);
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Handle for entering the span from worker threads
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for ScenarioSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();

        if elapsed > SLOW_SCENARIO {
            warn!(
                scenario = self.name,
                run_id = self.run_id,
                elapsed_ms = elapsed.as_millis() as u64,
                slow = true,
                "slow scenario"
            );
        } else {
            debug!(
                scenario = self.name,
                run_id = self.run_id,
                elapsed_us = elapsed.as_micros() as u64,
                "scenario completed"
            );
        }
    }
}

/// Helper to open a scenario span
#[inline]
pub fn span_scenario(name: &'static str) -> ScenarioSpan {
    ScenarioSpan::new(name)
}
