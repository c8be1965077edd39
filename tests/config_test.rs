/*!
 * Configuration Tests
 * JSON files and COORD_* environment overrides
 */

use coord_kit::core::config::{
    ENV_CACHE_CAPACITY, ENV_CONSUMERS, ENV_SHUTDOWN_TIMEOUT_MS,
};
use coord_kit::{LockFairness, SyncError, ToolkitConfig};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn clear_env() {
    for key in [ENV_CACHE_CAPACITY, ENV_CONSUMERS, ENV_SHUTDOWN_TIMEOUT_MS] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_env_overrides_defaults() {
    clear_env();
    std::env::set_var(ENV_CACHE_CAPACITY, "7");
    std::env::set_var(ENV_SHUTDOWN_TIMEOUT_MS, "1500");

    let config = ToolkitConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.cache_capacity, 7);
    assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
    assert_eq!(config.queue_capacity, ToolkitConfig::default().queue_capacity);
}

#[test]
#[serial]
fn test_unparseable_env_is_configuration_error() {
    clear_env();
    std::env::set_var(ENV_CONSUMERS, "three");

    let result = ToolkitConfig::from_env();
    clear_env();

    assert!(matches!(result, Err(SyncError::Configuration(msg)) if msg.contains(ENV_CONSUMERS)));
}

#[test]
#[serial]
fn test_zero_from_env_rejected() {
    clear_env();
    std::env::set_var(ENV_CONSUMERS, "0");

    let result = ToolkitConfig::from_env();
    clear_env();

    assert!(matches!(result, Err(SyncError::Configuration(_))));
}

#[test]
#[serial]
fn test_file_then_env() {
    clear_env();
    let file = write_config(
        r#"{
            "cache_capacity": 5,
            "producers": 2,
            "lock_fairness": "fair",
            "deadlock_probe_ms": 50
        }"#,
    );
    std::env::set_var(ENV_CACHE_CAPACITY, "9");

    let config = ToolkitConfig::from_file(file.path())
        .and_then(ToolkitConfig::with_env_overrides)
        .unwrap();
    clear_env();

    assert_eq!(config.cache_capacity, 9);
    assert_eq!(config.producers, 2);
    assert_eq!(config.lock_fairness, LockFairness::Fair);
    assert_eq!(config.deadlock_probe, Duration::from_millis(50));
}

#[test]
fn test_invalid_file_contents() {
    let file = write_config(r#"{"queue_capacity": 0}"#);
    assert!(matches!(
        ToolkitConfig::from_file(file.path()),
        Err(SyncError::Configuration(_))
    ));

    let file = write_config("not json");
    assert!(ToolkitConfig::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = ToolkitConfig::from_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(SyncError::Configuration(msg)) if msg.contains("cannot read")));
}
