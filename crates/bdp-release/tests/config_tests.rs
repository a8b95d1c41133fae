//! Environment-driven configuration tests

use std::env;
use std::time::Duration;

use bdp_release::config::{ReleaseConfig, StateBackend};
use bdp_release::storage::StorageBackend;
use serial_test::serial;

const KEYS: &[&str] = &[
    "RELEASE_STORAGE_BACKEND",
    "RELEASE_LOCAL_ROOT",
    "RELEASE_PUBLIC_BASE_URL",
    "RELEASE_REGISTRY_PREFIX",
    "RELEASE_APP_VERSION",
    "RELEASE_FRAMEWORK_VERSION",
    "RELEASE_BACKEND_FLAVOR_VERSION",
    "RELEASE_MAX_STEPS",
    "RELEASE_DOWNLOAD_TIMEOUT_SECS",
    "RELEASE_STATE_BACKEND",
    "RELEASE_STATE_FILE",
    "RELEASE_SCHEDULE",
    "RELEASE_SCHEDULE_ENABLED",
    "RELEASE_SCHEDULE_TARGET",
    "RELEASE_MAX_ATTEMPTS",
    "RELEASE_RETRY_DELAY_SECS",
];

fn clear_env() {
    for key in KEYS {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();

    let config = ReleaseConfig::from_env().expect("Failed to parse config from env");
    assert_eq!(config.storage.backend, StorageBackend::Local);
    assert_eq!(config.registry_prefix, "releases");
    assert_eq!(config.applier.max_steps, 10);
    assert_eq!(config.state.backend, StateBackend::File);
    assert!(!config.scheduler.enabled);
    assert!(config.scheduler.schedules.is_empty());
    assert_eq!(config.compatibility.app_version, None);
    config.validate().unwrap();
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    env::set_var("RELEASE_LOCAL_ROOT", "/tmp/release-store");
    env::set_var("RELEASE_REGISTRY_PREFIX", "hub/releases");
    env::set_var("RELEASE_APP_VERSION", "3.2");
    env::set_var("RELEASE_BACKEND_FLAVOR_VERSION", "es8");
    env::set_var("RELEASE_MAX_STEPS", "4");
    env::set_var("RELEASE_DOWNLOAD_TIMEOUT_SECS", "120");
    env::set_var("RELEASE_STATE_BACKEND", "postgres");
    env::set_var("RELEASE_SCHEDULE", "mygene=0 0 2 * * *; chembl=0 30 3 * * Sun");
    env::set_var("RELEASE_SCHEDULE_ENABLED", "true");
    env::set_var("RELEASE_SCHEDULE_TARGET", "20240201");
    env::set_var("RELEASE_MAX_ATTEMPTS", "5");
    env::set_var("RELEASE_RETRY_DELAY_SECS", "30");

    let config = ReleaseConfig::from_env().expect("Failed to parse config from env");
    assert_eq!(config.storage.local_root.to_str(), Some("/tmp/release-store"));
    assert_eq!(config.registry_prefix, "hub/releases");
    assert_eq!(config.compatibility.app_version.as_deref(), Some("3.2"));
    assert_eq!(config.compatibility.framework_version, None);
    assert_eq!(config.compatibility.backend_flavor_version.as_deref(), Some("es8"));
    assert_eq!(config.applier.max_steps, 4);
    assert_eq!(config.applier.download_timeout, Duration::from_secs(120));
    assert_eq!(config.state.backend, StateBackend::Postgres);

    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.target, "20240201");
    assert_eq!(config.scheduler.max_attempts, 5);
    assert_eq!(config.scheduler.retry_delay, Duration::from_secs(30));
    let sources: Vec<_> = config.scheduler.schedules.iter().map(|s| s.source.as_str()).collect();
    assert_eq!(sources, vec!["mygene", "chembl"]);
    assert_eq!(config.scheduler.schedules[0].expression, "0 0 2 * * *");
    config.validate().unwrap();

    clear_env();
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_env();
    env::set_var("RELEASE_SCHEDULE", "mygene=not a cron");
    assert!(ReleaseConfig::from_env().is_err());

    clear_env();
    env::set_var("RELEASE_STATE_BACKEND", "redis");
    assert!(ReleaseConfig::from_env().is_err());

    clear_env();
    env::set_var("RELEASE_PUBLIC_BASE_URL", "not a url");
    let config = ReleaseConfig::from_env().unwrap();
    assert!(config.validate().is_err());

    clear_env();
    env::set_var("RELEASE_MAX_STEPS", "0");
    let config = ReleaseConfig::from_env().unwrap();
    assert!(config.validate().is_err());

    clear_env();
}
