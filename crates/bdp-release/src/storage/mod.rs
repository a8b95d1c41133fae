//! Object storage for registry documents and release artifacts
//!
//! The registry and every published artifact live in an object store.
//! [`ObjectStore`] is the seam; [`S3Store`] targets S3/MinIO and
//! [`LocalStore`] a directory tree (file-backed deployments and tests).
//!
//! Besides plain writes the store offers conditional writes, which the
//! registry uses as a compare-and-swap on `versions.json`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use local::LocalStore;
pub use s3::S3Store;

/// Options applied to a single write
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Serve this object as a redirect to another key's URL
    pub redirect_to: Option<String>,
}

impl PutOptions {
    pub fn json() -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            redirect_to: None,
        }
    }

    pub fn text() -> Self {
        Self {
            content_type: Some("text/plain".to_string()),
            redirect_to: None,
        }
    }

    pub fn with_redirect(mut self, location: impl Into<String>) -> Self {
        self.redirect_to = Some(location.into());
        self
    }
}

/// Precondition for a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// The key must not exist yet
    MustNotExist,
    /// The stored object's ETag must equal this value
    MatchesEtag(String),
}

/// Outcome of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalPut {
    Applied,
    PreconditionFailed,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub key: String,
    /// MD5 of the uploaded bytes
    pub checksum: String,
    pub size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Unconditionally write `data` under `key`
    async fn put(&self, key: &str, data: Vec<u8>, options: PutOptions) -> Result<UploadResult>;

    /// Write `data` only if `condition` holds at write time
    async fn put_if(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: WriteCondition,
        options: PutOptions,
    ) -> Result<ConditionalPut>;

    /// Fetch an object, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Upload a local file
    async fn upload_file(&self, key: &str, path: &Path, options: PutOptions) -> Result<UploadResult>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// URL consumers use to download `key`
    fn url_for(&self, key: &str) -> String;
}

/// Join URL segments with exactly one slash between them
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Reject keys that could escape a store's root
pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') {
        anyhow::bail!("Invalid object key '{}'", key);
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        anyhow::bail!("Invalid object key '{}'", key);
    }
    Ok(())
}
