/*!
 * Core Module
 * Coordination primitives, error handling and configuration
 */

pub mod config;
pub mod errors;
pub mod guard;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use config::ToolkitConfig;
pub use errors::*;
pub use guard::{Guard, GuardDrop, GuardMetadata};
pub use sync::{
    CancellationToken, CompletionLatch, HybridCell, HybridLock, InterruptibleLock, LatchOutcome,
    LockFairness, OrderedLockPair, VersionedRef,
};
