/*!
 * Toolkit Limits and Constants
 *
 * Centralized location for defaults, thresholds, and magic numbers.
 * Grouped by primitive; performance-sensitive values are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// HYBRID LOCK
// =============================================================================

/// Optimistic read attempts before `HybridCell::load` falls back to a
/// pessimistic read lock
/// [PERF] Writers are short; a couple of retries usually succeed
pub const OPTIMISTIC_READ_RETRIES: u32 = 4;

// =============================================================================
// LRU CACHE
// =============================================================================

/// Default cache capacity used by the demo configuration
pub const DEFAULT_CACHE_CAPACITY: usize = 3;

// =============================================================================
// SHUTDOWNABLE QUEUE
// =============================================================================

/// Default bounded queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default number of producer threads in a pipeline
pub const DEFAULT_PRODUCERS: usize = 10;

/// Default number of consumer threads in a pipeline
pub const DEFAULT_CONSUMERS: usize = 3;

/// Default items emitted by each producer
pub const DEFAULT_ITEMS_PER_PRODUCER: usize = 1;

/// Default bound on the completion barrier wait
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// DEADLOCK ESCAPE
// =============================================================================

/// How long the supervisor lets two crossed lock holders stall before
/// cancelling one of them
pub const DEFAULT_DEADLOCK_PROBE: Duration = Duration::from_millis(200);
