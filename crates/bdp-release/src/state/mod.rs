//! Locally installed versions
//!
//! Each source has one version pointer. The applier moves it forward with
//! [`VersionStore::advance`], a compare-and-set on the previous version, only
//! after a release step has been downloaded, verified and applied. Every
//! advance is kept in an append-only history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReleaseResult;

pub mod file;
pub mod postgres;

pub use file::FileVersionStore;
pub use postgres::PgVersionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceRecord {
    pub from: Option<String>,
    pub to: String,
    pub build_version: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub source: String,
    pub version: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<AdvanceRecord>,
}

impl VersionRecord {
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: None,
            updated_at: None,
            history: Vec::new(),
        }
    }
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Installed version of `source`, `None` when nothing is installed
    async fn current(&self, source: &str) -> ReleaseResult<Option<String>>;

    /// Move `source` from `from` to `to`.
    ///
    /// Fails with `ReleaseError::VersionState` when the installed version is
    /// not `from`. The change is durable when this returns.
    async fn advance(
        &self,
        source: &str,
        from: Option<&str>,
        to: &str,
        build_version: &str,
    ) -> ReleaseResult<()>;

    /// Full record including history
    async fn record(&self, source: &str) -> ReleaseResult<VersionRecord>;

    /// Records of every known source
    async fn records(&self) -> ReleaseResult<Vec<VersionRecord>>;
}
