/*!
 * coord-kit
 * Thread coordination over shared mutable state
 *
 * - `core::sync`: stamped CAS, hybrid optimistic lock, interruptible locks,
 *   cancellation tokens and completion latches
 * - `cache`: bounded LRU cache over the hybrid lock
 * - `pipeline`: bounded queue with poison-pill shutdown and a runner
 */

pub mod cache;
pub mod core;
pub mod monitoring;
pub mod pipeline;

// Re-exports
pub use cache::{BoundedLruCache, CacheStats};
pub use crate::core::config::ToolkitConfig;
pub use crate::core::errors::{SyncError, SyncResult};
pub use crate::core::sync::{
    run_with_both, CancellationToken, CompletionLatch, HybridCell, HybridLock, InterruptibleLock,
    LatchOutcome, LockFairness, OrderedLockPair, VersionedRef,
};
pub use monitoring::{init_tracing, try_init_tracing};
pub use pipeline::{
    Message, Pipeline, PipelineConfig, PipelineReport, ShutdownReport, ShutdownableQueue,
};
