/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Result type for toolkit operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced at the boundary of every coordination primitive
///
/// A lost compare-and-set is reported as `false`, not as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(sync::configuration),
        help("Capacities and participant counts must be greater than zero.")
    )]
    Configuration(String),

    #[error("Wait was cancelled")]
    #[diagnostic(
        code(sync::cancelled),
        help("The cancellation token was triggered while blocked. Held resources were released.")
    )]
    Cancelled,

    #[error("Wait timed out after {0:?}")]
    #[diagnostic(
        code(sync::timeout),
        help("The resource stayed unavailable for the whole bounded wait. Retry or raise it.")
    )]
    Timeout(Duration),

    #[error("Lock is already held by the current thread")]
    #[diagnostic(
        code(sync::already_held),
        help("Release the existing guard before acquiring the lock again.")
    )]
    AlreadyHeld,

    #[error("Queue has been shut down")]
    #[diagnostic(
        code(sync::shut_down),
        help("The shutdown sentinel was already sent; no further items are accepted.")
    )]
    ShutDown,

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(code(sync::thread_spawn))]
    ThreadSpawn(String),
}

impl SyncError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error came from a cancelled wait
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
