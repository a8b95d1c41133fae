//! Configuration management
//!
//! Everything is read from the environment (after loading `.env` with
//! dotenvy) with the defaults below.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::apply::ApplierConfig;
use crate::registry::CompatibilityMarkers;
use crate::resolver::LATEST;
use crate::scheduler::SourceSchedule;
use crate::storage::StorageConfig;

// ============================================================================
// Release Configuration Constants
// ============================================================================

/// Key prefix of every source's registry in the object store.
pub const DEFAULT_REGISTRY_PREFIX: &str = "releases";

/// Maximum number of steps one update walk may apply.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Download budget per release step.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

/// Checksum verification budget per release step.
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 600;

/// Apply budget per release step.
pub const DEFAULT_APPLY_TIMEOUT_SECS: u64 = 3600;

/// Scratch directory for downloaded artifacts.
pub const DEFAULT_WORK_DIR: &str = "./release-work";

/// Install root of the filesystem apply backend.
pub const DEFAULT_INSTALL_DIR: &str = "./release-data";

/// Location of the JSON version state file.
pub const DEFAULT_STATE_FILE: &str = "./release-state/versions.json";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/bdp";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Delay between attempts of a failed scheduled update.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;

/// Attempts per scheduled update before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Resolve/apply cycles allowed while catching up to latest.
pub const DEFAULT_MAX_CYCLES: usize = 10;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Postgres,
}

impl FromStr for StateBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" | "json" => Ok(StateBackend::File),
            "postgres" | "postgresql" => Ok(StateBackend::Postgres),
            other => bail!("Unknown state backend '{}', expected file or postgres", other),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub file: PathBuf,
    pub database: DatabaseConfig,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            file: PathBuf::from(DEFAULT_STATE_FILE),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedules: Vec<SourceSchedule>,
    /// Version every scheduled run moves towards
    pub target: String,
    pub retry_delay: Duration,
    pub max_attempts: u32,
    pub max_cycles: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedules: Vec::new(),
            target: LATEST.to_string(),
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

/// Release pipeline configuration
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub storage: StorageConfig,
    pub registry_prefix: String,
    /// Markers of the software consuming and producing releases
    pub compatibility: CompatibilityMarkers,
    pub applier: ApplierConfig,
    pub install_dir: PathBuf,
    pub state: StateConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            registry_prefix: DEFAULT_REGISTRY_PREFIX.to_string(),
            compatibility: CompatibilityMarkers::default(),
            applier: ApplierConfig::default(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            state: StateConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ReleaseConfig {
    /// Load `.env`, read the environment and validate
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let schedules = match env_opt("RELEASE_SCHEDULE") {
            Some(raw) => SourceSchedule::parse_list(&raw)?,
            None => Vec::new(),
        };
        let state_backend = match env_opt("RELEASE_STATE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StateBackend::default(),
        };

        Ok(Self {
            storage: StorageConfig::from_env()?,
            registry_prefix: std::env::var("RELEASE_REGISTRY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_REGISTRY_PREFIX.to_string()),
            compatibility: CompatibilityMarkers {
                app_version: env_opt("RELEASE_APP_VERSION"),
                framework_version: env_opt("RELEASE_FRAMEWORK_VERSION"),
                backend_flavor_version: env_opt("RELEASE_BACKEND_FLAVOR_VERSION"),
            },
            applier: ApplierConfig {
                max_steps: env_or("RELEASE_MAX_STEPS", DEFAULT_MAX_STEPS),
                download_timeout: Duration::from_secs(env_or(
                    "RELEASE_DOWNLOAD_TIMEOUT_SECS",
                    DEFAULT_DOWNLOAD_TIMEOUT_SECS,
                )),
                verify_timeout: Duration::from_secs(env_or(
                    "RELEASE_VERIFY_TIMEOUT_SECS",
                    DEFAULT_VERIFY_TIMEOUT_SECS,
                )),
                apply_timeout: Duration::from_secs(env_or(
                    "RELEASE_APPLY_TIMEOUT_SECS",
                    DEFAULT_APPLY_TIMEOUT_SECS,
                )),
                work_dir: env_opt("RELEASE_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            },
            install_dir: env_opt("RELEASE_INSTALL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_DIR)),
            state: StateConfig {
                backend: state_backend,
                file: env_opt("RELEASE_STATE_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
                database: DatabaseConfig {
                    url: std::env::var("DATABASE_URL")
                        .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                    max_connections: env_or(
                        "DATABASE_MAX_CONNECTIONS",
                        DEFAULT_DATABASE_MAX_CONNECTIONS,
                    ),
                    connect_timeout_secs: env_or(
                        "DATABASE_CONNECT_TIMEOUT",
                        DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                    ),
                },
            },
            scheduler: SchedulerConfig {
                enabled: env_or("RELEASE_SCHEDULE_ENABLED", false),
                schedules,
                target: env_opt("RELEASE_SCHEDULE_TARGET").unwrap_or_else(|| LATEST.to_string()),
                retry_delay: Duration::from_secs(env_or(
                    "RELEASE_RETRY_DELAY_SECS",
                    DEFAULT_RETRY_DELAY_SECS,
                )),
                max_attempts: env_or("RELEASE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
                max_cycles: env_or("RELEASE_MAX_CYCLES", DEFAULT_MAX_CYCLES),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;

        if self.registry_prefix.trim_matches('/').is_empty() {
            bail!("RELEASE_REGISTRY_PREFIX must not be empty");
        }

        if self.applier.max_steps == 0 {
            bail!("RELEASE_MAX_STEPS must be greater than 0");
        }

        for (name, timeout) in [
            ("RELEASE_DOWNLOAD_TIMEOUT_SECS", self.applier.download_timeout),
            ("RELEASE_VERIFY_TIMEOUT_SECS", self.applier.verify_timeout),
            ("RELEASE_APPLY_TIMEOUT_SECS", self.applier.apply_timeout),
        ] {
            if timeout.is_zero() {
                bail!("{} must be greater than 0", name);
            }
        }

        if self.state.backend == StateBackend::Postgres {
            if self.state.database.url.is_empty() {
                bail!("DATABASE_URL cannot be empty with the postgres state backend");
            }
            if self.state.database.max_connections == 0 {
                bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
            }
        }

        if self.scheduler.max_attempts == 0 {
            bail!("RELEASE_MAX_ATTEMPTS must be greater than 0");
        }
        if self.scheduler.max_cycles == 0 {
            bail!("RELEASE_MAX_CYCLES must be greater than 0");
        }
        if self.scheduler.enabled && self.scheduler.schedules.is_empty() {
            tracing::warn!("Scheduler enabled but RELEASE_SCHEDULE lists no sources");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReleaseConfig::default();
        assert_eq!(config.applier.max_steps, 10);
        assert_eq!(config.scheduler.target, "latest");
        assert_eq!(config.state.backend, StateBackend::File);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ReleaseConfig::default();
        config.applier.max_steps = 0;
        assert!(config.validate().is_err());

        let mut config = ReleaseConfig::default();
        config.applier.verify_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ReleaseConfig::default();
        config.registry_prefix = "/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_state_backend_parse() {
        assert_eq!("Postgres".parse::<StateBackend>().unwrap(), StateBackend::Postgres);
        assert_eq!("json".parse::<StateBackend>().unwrap(), StateBackend::File);
        assert!("redis".parse::<StateBackend>().is_err());
    }
}
