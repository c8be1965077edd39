/*!
 * RAII Lock Guards
 *
 * Every lock or permit in the toolkit is released by dropping a guard, so
 * release happens on all exit paths: normal return, `?` propagation,
 * cancellation and unwinding.
 *
 * ## Guard Types
 *
 * - **HybridReadGuard / HybridWriteGuard**: shared and exclusive `HybridLock` holds
 * - **InterruptibleGuard**: exclusive `InterruptibleLock` hold with owner tracking
 */

mod traits;

pub use traits::{Guard, GuardDrop};

use std::thread::{self, ThreadId};
use std::time::Instant;

/// Guard metadata for observability
#[derive(Debug, Clone)]
pub struct GuardMetadata {
    pub resource_type: &'static str,
    pub creation_time: Instant,
    pub thread: ThreadId,
}

impl GuardMetadata {
    #[inline]
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            creation_time: Instant::now(),
            thread: thread::current().id(),
        }
    }

    #[inline]
    pub fn lifetime_micros(&self) -> u64 {
        self.creation_time.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_records_creator() {
        let meta = GuardMetadata::new("lock");
        assert_eq!(meta.resource_type, "lock");
        assert_eq!(meta.thread, thread::current().id());
        assert!(meta.lifetime_micros() < 1_000_000);
    }
}
