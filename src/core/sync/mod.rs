/*!
 * Synchronization Primitives
 *
 * Blocking and lock-free building blocks for coordinating threads over
 * shared mutable state:
 * - `VersionedRef`: stamped compare-and-swap slot, immune to ABA
 * - `HybridLock` / `HybridCell`: optimistic reads with pessimistic fallback
 * - `InterruptibleLock` / `OrderedLockPair`: exclusive locks whose waits can
 *   be cancelled, and a two-lock protocol built on them
 * - `CompletionLatch`: bounded countdown barrier
 *
 * # Architecture
 *
 * Every blocking primitive keeps its state in a `Monitor` (mutex plus
 * condition variables) and blocks through a single wait loop that honours
 * a `CancellationToken` and an optional deadline. Cancelling a token wakes
 * every waiter registered with it, so no wait in the toolkit is
 * uninterruptible unless the caller opts out.
 *
 * # Performance
 *
 * - Optimistic reads are two atomic loads and never write shared memory
 * - `VersionedRef` reads are lock-free via `arc_swap`
 * - Waiters sleep on `parking_lot` condvars; no spinning
 */

mod cancel;
mod hybrid;
mod interruptible;
mod latch;
mod ordered;
mod versioned;
mod wait;

pub use cancel::CancellationToken;
pub use hybrid::{
    HybridCell, HybridLock, HybridLockStats, HybridReadGuard, HybridWriteGuard, OptimisticStamp,
};
pub use interruptible::{InterruptibleGuard, InterruptibleLock, LockFairness};
pub use latch::{CompletionLatch, LatchOutcome};
pub use ordered::{run_with_both, OrderedLockPair};
pub use versioned::VersionedRef;
pub use wait::{WaitError, WaitResult};

pub(crate) use wait::{deadline_after, Monitor};
