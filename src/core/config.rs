/*!
 * Toolkit Configuration
 *
 * Sizing and timing knobs for the cache, the pipeline and the deadlock
 * escape demo. Values come from defaults in `core::limits`, optionally a
 * JSON file, then `COORD_*` environment overrides.
 */

use super::errors::{SyncError, SyncResult};
use super::limits::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CONSUMERS, DEFAULT_DEADLOCK_PROBE, DEFAULT_ITEMS_PER_PRODUCER,
    DEFAULT_PRODUCERS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT,
};
use super::sync::LockFairness;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_CACHE_CAPACITY: &str = "COORD_CACHE_CAPACITY";
pub const ENV_QUEUE_CAPACITY: &str = "COORD_QUEUE_CAPACITY";
pub const ENV_PRODUCERS: &str = "COORD_PRODUCERS";
pub const ENV_CONSUMERS: &str = "COORD_CONSUMERS";
pub const ENV_ITEMS_PER_PRODUCER: &str = "COORD_ITEMS_PER_PRODUCER";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "COORD_SHUTDOWN_TIMEOUT_MS";

/// Toolkit-wide configuration
///
/// Missing fields in a config file fall back to their defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ToolkitConfig {
    /// Maximum entries held by the LRU cache
    pub cache_capacity: usize,
    /// Slots in the pipeline's bounded queue
    pub queue_capacity: usize,
    /// Producer threads in a pipeline run
    pub producers: usize,
    /// Consumer threads in a pipeline run
    pub consumers: usize,
    /// Items each producer emits
    pub items_per_producer: usize,
    /// Bound on the shutdown completion wait
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,
    /// How long crossed lock holders may stall before one is cancelled
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "deadlock_probe_ms")]
    pub deadlock_probe: Duration,
    /// Grant policy for the demo's interruptible locks
    pub lock_fairness: LockFairness,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            producers: DEFAULT_PRODUCERS,
            consumers: DEFAULT_CONSUMERS,
            items_per_producer: DEFAULT_ITEMS_PER_PRODUCER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            deadlock_probe: DEFAULT_DEADLOCK_PROBE,
            lock_fairness: LockFairness::default(),
        }
    }
}

impl ToolkitConfig {
    /// Load a JSON config file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SyncError::config(format!("cannot parse {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "loaded toolkit config");
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> SyncResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `COORD_*` environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> SyncResult<Self> {
        override_from_env(ENV_CACHE_CAPACITY, &mut self.cache_capacity)?;
        override_from_env(ENV_QUEUE_CAPACITY, &mut self.queue_capacity)?;
        override_from_env(ENV_PRODUCERS, &mut self.producers)?;
        override_from_env(ENV_CONSUMERS, &mut self.consumers)?;
        override_from_env(ENV_ITEMS_PER_PRODUCER, &mut self.items_per_producer)?;

        let mut timeout_ms = self.shutdown_timeout.as_millis() as u64;
        if override_from_env(ENV_SHUTDOWN_TIMEOUT_MS, &mut timeout_ms)? {
            self.shutdown_timeout = Duration::from_millis(timeout_ms);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject sizes that would make a primitive unusable
    pub fn validate(&self) -> SyncResult<()> {
        let sizes = [
            ("cache_capacity", self.cache_capacity),
            ("queue_capacity", self.queue_capacity),
            ("producers", self.producers),
            ("consumers", self.consumers),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(SyncError::config(format!("{} must be greater than zero", field)));
            }
        }
        Ok(())
    }

    /// Total items a pipeline run is expected to move
    #[inline]
    pub fn total_items(&self) -> usize {
        self.producers * self.items_per_producer
    }
}

/// Overwrite `slot` from env var `key` if set; returns whether it was
fn override_from_env<T: FromStr>(key: &str, slot: &mut T) -> SyncResult<bool>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            *slot = raw
                .trim()
                .parse()
                .map_err(|e| SyncError::config(format!("{}={:?}: {}", key, raw, e)))?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ToolkitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.total_items(), 10);
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = ToolkitConfig {
            consumers: 0,
            ..ToolkitConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(SyncError::config("consumers must be greater than zero"))
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ToolkitConfig =
            serde_json::from_str(r#"{"queue_capacity": 4, "shutdown_timeout_ms": 250}"#).unwrap();

        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.producers, DEFAULT_PRODUCERS);
        assert_eq!(config.lock_fairness, LockFairness::Barging);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = ToolkitConfig {
            lock_fairness: LockFairness::Fair,
            ..ToolkitConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"lock_fairness\":\"fair\""));
        assert_eq!(serde_json::from_str::<ToolkitConfig>(&json).unwrap(), config);
    }
}
