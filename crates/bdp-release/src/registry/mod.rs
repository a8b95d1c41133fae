//! Release registry
//!
//! The registry is the durable catalog of releases for each source, kept in
//! the object store:
//!
//! ```text
//! {prefix}/{source}/versions.json          VersionRegistry, sorted by build_version
//! {prefix}/{source}/latest                 build_version of the chain head (redirect)
//! {prefix}/{source}/{build_version}.json   ReleaseDescriptor
//! {prefix}/{source}/{build_version}/...    release payload and notes
//! ```
//!
//! A full release's `build_version` is the version it installs. An
//! incremental release is keyed `<target_version>.<require_version>`, so it
//! never shares a key or a payload directory with the full release of the
//! same version.
//!
//! Reads are lock-free snapshot reads. Writes to `versions.json` go through a
//! per-source critical section in this process and a compare-and-swap on the
//! document's ETag, so concurrent publishers in other processes cannot
//! silently overwrite each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::storage::{ConditionalPut, ObjectStore, PutOptions, WriteCondition};

pub mod types;

pub use types::{
    incremental_key, CompatibilityMarkers, ReleaseChanges, ReleaseDescriptor, ReleaseType,
    VersionRegistry, REGISTRY_FORMAT,
};

pub const REGISTRY_FILE: &str = "versions.json";
pub const LATEST_FILE: &str = "latest";

/// Handle to the registry of every source under one key prefix.
///
/// Cheap to clone; clones share the per-source write locks.
#[derive(Clone)]
pub struct RegistryClient {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RegistryClient {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn source_dir(&self, source: &str) -> ReleaseResult<String> {
        bdp_common::types::validate_build_version(source)
            .map_err(|_| ReleaseError::InvalidRelease(format!("invalid source name '{}'", source)))?;
        if self.prefix.is_empty() {
            Ok(source.to_string())
        } else {
            Ok(format!("{}/{}", self.prefix, source))
        }
    }

    pub fn registry_key(&self, source: &str) -> ReleaseResult<String> {
        Ok(format!("{}/{}", self.source_dir(source)?, REGISTRY_FILE))
    }

    pub fn latest_key(&self, source: &str) -> ReleaseResult<String> {
        Ok(format!("{}/{}", self.source_dir(source)?, LATEST_FILE))
    }

    pub fn descriptor_key(&self, source: &str, build_version: &str) -> ReleaseResult<String> {
        Ok(format!("{}/{}.json", self.source_dir(source)?, build_version))
    }

    /// Key of a payload file stored alongside a release
    pub fn release_key(&self, source: &str, build_version: &str, file: &str) -> ReleaseResult<String> {
        Ok(format!("{}/{}/{}", self.source_dir(source)?, build_version, file))
    }

    fn source_lock(&self, source: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the current `versions.json`; an absent document is an empty registry
    #[instrument(skip(self))]
    pub async fn snapshot(&self, source: &str) -> ReleaseResult<VersionRegistry> {
        Ok(self.snapshot_with_etag(source).await?.0)
    }

    async fn snapshot_with_etag(
        &self,
        source: &str,
    ) -> ReleaseResult<(VersionRegistry, Option<String>)> {
        let key = self.registry_key(source)?;
        match self.store.get(&key).await.map_err(ReleaseError::Storage)? {
            Some(object) => {
                let registry = VersionRegistry::from_slice(&object.data)?;
                debug!(source, versions = registry.len(), "Loaded registry snapshot");
                Ok((registry, object.etag))
            },
            None => {
                debug!(source, "No registry yet");
                Ok((VersionRegistry::new(), None))
            },
        }
    }

    /// Read the `latest` pointer
    pub async fn latest(&self, source: &str) -> ReleaseResult<Option<String>> {
        let key = self.latest_key(source)?;
        let object = self.store.get(&key).await.map_err(ReleaseError::Storage)?;
        Ok(object
            .map(|o| String::from_utf8_lossy(&o.data).trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// Fetch the per-release metadata file
    pub async fn fetch_descriptor(
        &self,
        source: &str,
        build_version: &str,
    ) -> ReleaseResult<Option<ReleaseDescriptor>> {
        let key = self.descriptor_key(source, build_version)?;
        match self.store.get(&key).await.map_err(ReleaseError::Storage)? {
            Some(object) => Ok(Some(serde_json::from_slice(&object.data)?)),
            None => Ok(None),
        }
    }

    /// Write `<build_version>.json`
    #[instrument(skip(self, descriptor), fields(build_version = %descriptor.build_version))]
    pub async fn publish_descriptor(
        &self,
        source: &str,
        descriptor: &ReleaseDescriptor,
    ) -> ReleaseResult<String> {
        let key = self.descriptor_key(source, &descriptor.build_version)?;
        let body = serde_json::to_vec_pretty(descriptor)?;
        self.store
            .put(&key, body, PutOptions::json())
            .await
            .map_err(ReleaseError::Storage)?;
        Ok(self.store.url_for(&key))
    }

    /// Append or replace `descriptor` in `versions.json` and move `latest`.
    ///
    /// Returns the registry as written. A concurrent writer that changed the
    /// document since it was read makes this fail with
    /// [`ReleaseError::RegistryWriteConflict`] and leaves the registry as the
    /// other writer left it.
    #[instrument(skip(self, descriptor), fields(build_version = %descriptor.build_version))]
    pub async fn register(
        &self,
        source: &str,
        descriptor: ReleaseDescriptor,
    ) -> ReleaseResult<VersionRegistry> {
        descriptor.validate()?;

        let lock = self.source_lock(source);
        let _guard = lock.lock().await;

        let key = self.registry_key(source)?;
        let (mut registry, etag) = self.snapshot_with_etag(source).await?;
        registry.upsert(descriptor);

        let condition = match etag {
            Some(etag) => WriteCondition::MatchesEtag(etag),
            None => WriteCondition::MustNotExist,
        };

        let outcome = self
            .store
            .put_if(&key, registry.to_vec()?, condition, PutOptions::json())
            .await
            .map_err(ReleaseError::Storage)?;

        if outcome == ConditionalPut::PreconditionFailed {
            warn!(source, "versions.json changed while registering");
            return Err(ReleaseError::RegistryWriteConflict {
                source_name: source.to_string(),
                reason: "versions.json was modified by another publisher".to_string(),
            });
        }

        if let Some(head) = registry.latest() {
            let head_version = head.build_version.clone();
            let target = self.store.url_for(&self.descriptor_key(source, &head_version)?);
            self.store
                .put(
                    &self.latest_key(source)?,
                    head_version.clone().into_bytes(),
                    PutOptions::text().with_redirect(target),
                )
                .await
                .map_err(ReleaseError::Storage)?;
            info!(source, latest = %head_version, versions = registry.len(), "Registry updated");
        }

        Ok(registry)
    }
}
