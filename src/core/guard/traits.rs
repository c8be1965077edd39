/*!
 * Guard Traits
 *
 * Core abstractions for RAII lock guards
 */

use super::GuardMetadata;

/// Core guard trait
///
/// Every scoped acquisition handed out by the toolkit implements this so
/// callers and logs can identify what is held and for how long.
pub trait Guard {
    /// Resource type name for logging/debugging
    fn resource_type(&self) -> &'static str;

    /// Get guard metadata
    fn metadata(&self) -> &GuardMetadata;

    /// Check if guard still holds its resource
    fn is_active(&self) -> bool;
}

/// Guards that run custom cleanup on drop
///
/// Separates Drop logic for better testability and observability
pub trait GuardDrop: Guard {
    /// Perform cleanup on drop
    ///
    /// # Panics
    ///
    /// Should NOT panic. Log errors instead.
    fn on_drop(&mut self);
}
