/*!
 * coord-demo - Toolkit Walkthrough
 *
 * Runs each coordination primitive through the scenario it exists for:
 * - LRU eviction order
 * - Optimistic reads racing a writer
 * - ABA rejection on a stamped reference
 * - Escaping a crossed-order deadlock by cancellation
 * - Poison-pill shutdown of a producer/consumer pipeline
 *
 * Usage: `coord-demo [config.json]`. `COORD_*` variables override the file.
 */

use coord_kit::cache::BoundedLruCache;
use coord_kit::core::sync::{
    CancellationToken, HybridCell, InterruptibleLock, OrderedLockPair, VersionedRef,
};
use coord_kit::core::ToolkitConfig;
use coord_kit::monitoring::{init_tracing, span_scenario};
use coord_kit::pipeline::Pipeline;
use miette::{miette, IntoDiagnostic, Result};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => ToolkitConfig::from_file(path)?.with_env_overrides()?,
        None => ToolkitConfig::from_env()?,
    };
    let rendered = serde_json::to_string(&config).into_diagnostic()?;
    info!(config = %rendered, "coord-demo starting");

    lru_eviction(&config)?;
    optimistic_reads()?;
    aba_rejection()?;
    deadlock_escape(&config)?;
    poison_pill_pipeline(&config)?;

    info!("all scenarios finished");
    Ok(())
}

fn lru_eviction(config: &ToolkitConfig) -> Result<()> {
    let _span = span_scenario("lru-eviction");
    let cache = BoundedLruCache::new(config.cache_capacity)?;

    for i in 1..=cache.capacity() {
        cache.put(format!("key{}", i), i);
    }
    cache.get("key1");
    cache.put(format!("key{}", cache.capacity() + 1), cache.capacity() + 1);

    let stats = cache.stats();
    info!(
        order = ?cache.keys_by_recency(),
        size = cache.size(),
        evictions = stats.evictions,
        key2_present = cache.contains_key("key2"),
        "LRU order after touching key1"
    );
    Ok(())
}

/// Readers sample a point while a writer moves it along the diagonal
fn optimistic_reads() -> Result<()> {
    let _span = span_scenario("optimistic-reads");
    let point = HybridCell::new((0i64, 0i64));

    let off_diagonal = thread::scope(|scope| -> Result<usize> {
        let writer = scope.spawn(|| {
            for step in 1..=10_000 {
                point.store((step, step));
            }
        });
        let readers: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    (0..10_000)
                        .map(|_| point.load())
                        .filter(|(x, y)| x != y)
                        .count()
                })
            })
            .collect();

        writer
            .join()
            .map_err(|_| miette!("diagonal writer panicked"))?;
        readers
            .into_iter()
            .map(|reader| reader.join().map_err(|_| miette!("point reader panicked")))
            .sum::<Result<usize>>()
    })?;

    let stats = point.lock().stats();
    info!(
        off_diagonal,
        failed_validations = stats.failed_validations,
        pessimistic_reads = stats.pessimistic_reads,
        "optimistic reads never saw a torn point"
    );
    Ok(())
}

fn aba_rejection() -> Result<()> {
    let _span = span_scenario("aba-rejection");
    let account = VersionedRef::new(100, 1);
    let (stale_value, stale_stamp) = account.read();

    thread::scope(|scope| {
        scope
            .spawn(|| {
                account.compare_and_set(&100, 101, 1, 2);
                account.compare_and_set(&101, 100, 2, 3);
            })
            .join()
    })
    .map_err(|_| miette!("ABA writer panicked"))?;

    let accepted = account.compare_and_set(&stale_value, 101, stale_stamp, stale_stamp + 1);
    let (value, stamp) = account.read();
    info!(accepted, value, stamp, "stale compare-and-set after A -> B -> A");
    Ok(())
}

/// Two workers take the same pair of locks in opposite orders; the
/// supervisor cancels one of them once both are stuck
fn deadlock_escape(config: &ToolkitConfig) -> Result<()> {
    let _span = span_scenario("deadlock-escape");
    let lock_x = InterruptibleLock::with_fairness(0u32, config.lock_fairness).named("lock-x");
    let lock_y = InterruptibleLock::with_fairness(0u32, config.lock_fairness).named("lock-y");
    let pair = OrderedLockPair::new(&lock_x, &lock_y);
    let (token_a, token_b) = (CancellationToken::new(), CancellationToken::new());
    let both_hold_first = Barrier::new(2);

    let (a, b) = thread::scope(|scope| {
        let a = scope.spawn(|| {
            pair.run_staged(
                &token_a,
                |_| {
                    both_hold_first.wait();
                },
                |x, y| {
                    *x += 1;
                    *y += 1;
                },
            )
        });
        let b = scope.spawn(|| {
            let outcome = pair.reversed().run_staged(
                &token_b,
                |_| {
                    both_hold_first.wait();
                },
                |y, x| {
                    *y += 10;
                    *x += 10;
                },
            );
            let holds_any =
                lock_x.is_held_by_current_thread() || lock_y.is_held_by_current_thread();
            (outcome, holds_any)
        });

        thread::sleep(config.deadlock_probe);
        while !(lock_x.is_locked() && lock_y.is_locked()) {
            thread::sleep(Duration::from_millis(1));
        }
        warn!(
            probe_ms = config.deadlock_probe.as_millis() as u64,
            "workers stalled on crossed locks, cancelling worker b"
        );
        token_b.cancel();

        (a.join(), b.join())
    });

    let a = a.map_err(|_| miette!("worker a panicked"))?;
    let (b, b_holds_any) = b.map_err(|_| miette!("worker b panicked"))?;
    debug!(?a, ?b, "deadlock workers joined");

    let x = *lock_x.lock()?;
    let y = *lock_y.lock()?;
    info!(
        a_completed = a.is_ok(),
        b_cancelled = b.as_ref().is_err_and(|e| e.is_cancelled()),
        b_holds_any,
        x,
        y,
        "deadlock escaped by cancellation"
    );
    Ok(())
}

fn poison_pill_pipeline(config: &ToolkitConfig) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let items = config.items_per_producer;

    let report = pipeline.run(
        |producer| (0..items).map(move |i| format!("producer{}-item{}", producer, i)),
        |consumer, item| debug!(consumer, item = %item, "consumed"),
    )?;

    let rendered = serde_json::to_string(&report).into_diagnostic()?;
    info!(report = %rendered, "pipeline report");
    Ok(())
}
