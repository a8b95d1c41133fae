//! Release publisher
//!
//! Turns a completed build into an immutable, checksummed release and
//! registers it.
//!
//! # Full releases
//!
//! The descriptor points at the build's repository. A queryable repository
//! is referenced directly; a file-backed one is archived (tar.gz), uploaded
//! next to the release and its MD5 recorded on the descriptor.
//!
//! # Incremental releases
//!
//! 1. Validate the descriptor (`require_version != target_version`)
//! 2. Compute or validate the checksum of every diff file
//! 3. Generate and upload the release notes
//! 4. Clear already-applied markers on the manifest
//! 5. Upload diff files and manifest, then `<build_version>.json`, then
//!    register in `versions.json`
//!
//! An incremental release is keyed `<new>.<old>` (see
//! [`incremental_key`]), so publishing both kinds of release for one version
//! keeps both in the registry and in storage.
//!
//! Registration is always last, so a reader that sees a release in the
//! registry finds its payload in place. A failure leaves the registry
//! untouched; uploaded artifacts are overwritten on retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{ReleaseError, ReleaseResult};
use crate::registry::{
    incremental_key, CompatibilityMarkers, RegistryClient, ReleaseChanges, ReleaseDescriptor,
};
use crate::storage::PutOptions;

pub mod archive;
pub mod diff;
pub mod notes;

pub use diff::{BuildRef, DiffEngine, DiffFile, DiffInfo, DiffManifest, DiffSet, DiffStats, MANIFEST_FILE};
pub use notes::{BuildDocument, ReleaseNote, SourceInfo};

/// Where a full build's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryTarget {
    /// Directly queryable (e.g. a registered snapshot); referenced as-is
    Queryable { reference: String },
    /// A directory that is archived and uploaded
    FileBacked { path: PathBuf },
}

#[derive(Debug, Clone)]
pub enum PublishRequest {
    Full {
        build: BuildDocument,
        repository: RepositoryTarget,
        /// Previous build, for release notes
        previous: Option<BuildDocument>,
    },
    Incremental {
        old: BuildDocument,
        new: BuildDocument,
        diff: DiffSet,
    },
}

pub struct Publisher {
    registry: RegistryClient,
    compat: CompatibilityMarkers,
    diff_engine: Option<Arc<dyn DiffEngine>>,
}

impl Publisher {
    pub fn new(registry: RegistryClient, compat: CompatibilityMarkers) -> Self {
        Self {
            registry,
            compat,
            diff_engine: None,
        }
    }

    pub fn with_diff_engine(mut self, engine: Arc<dyn DiffEngine>) -> Self {
        self.diff_engine = Some(engine);
        self
    }

    pub async fn publish(&self, request: PublishRequest) -> ReleaseResult<ReleaseDescriptor> {
        match request {
            PublishRequest::Full {
                build,
                repository,
                previous,
            } => self.publish_full(&build, repository, previous.as_ref()).await,
            PublishRequest::Incremental { old, new, diff } => {
                self.publish_incremental(&old, &new, diff).await
            },
        }
    }

    /// Run the diff engine on two builds and publish the result
    pub async fn diff_and_publish(
        &self,
        old: BuildDocument,
        new: BuildDocument,
        work_dir: &Path,
    ) -> ReleaseResult<ReleaseDescriptor> {
        let engine = self
            .diff_engine
            .as_ref()
            .ok_or_else(|| ReleaseError::Config("no diff engine configured".to_string()))?;

        let out_dir = work_dir.join(format!("{}_{}_{}", new.source, old.version, new.version));
        tokio::fs::create_dir_all(&out_dir).await?;

        let diff = engine
            .compute(&old, &new, &out_dir)
            .await
            .map_err(|e| ReleaseError::Internal(format!("diff engine failed: {:#}", e)))?;

        self.publish(PublishRequest::Incremental { old, new, diff }).await
    }

    #[instrument(skip_all, fields(source = %build.source, version = %build.version))]
    async fn publish_full(
        &self,
        build: &BuildDocument,
        repository: RepositoryTarget,
        previous: Option<&BuildDocument>,
    ) -> ReleaseResult<ReleaseDescriptor> {
        let source = build.source.as_str();
        let mut descriptor = ReleaseDescriptor::full(&build.version, String::new(), self.compat.clone());
        descriptor.validate()?;

        match repository {
            RepositoryTarget::Queryable { reference } => {
                descriptor.artifact_ref = reference;
            },
            RepositoryTarget::FileBacked { path } => {
                let (url, md5) = self.upload_repository(source, &build.version, &path).await?;
                descriptor.artifact_ref = url;
                descriptor.artifact_md5 = Some(md5);
            },
        }

        if let Some(previous) = previous {
            if previous.source != build.source {
                return Err(ReleaseError::InvalidRelease(format!(
                    "previous build belongs to {}, not {}",
                    previous.source, build.source
                )));
            }
            let note = ReleaseNote::between(Some(previous), build, None);
            descriptor.changes = Some(
                self.upload_notes(source, &descriptor.build_version, &build.version, &note)
                    .await?,
            );
        }

        self.registry.publish_descriptor(source, &descriptor).await?;
        self.registry.register(source, descriptor.clone()).await?;

        info!(release = %descriptor, artifact = %descriptor.artifact_ref, "Published full release");
        Ok(descriptor)
    }

    async fn upload_repository(
        &self,
        source: &str,
        version: &str,
        path: &Path,
    ) -> ReleaseResult<(String, String)> {
        let staging = tempfile::tempdir()?;
        let archive_name = format!("{}_{}.tar.gz", source, version);
        let archive_path = staging.path().join(&archive_name);

        let (src, dest) = (path.to_path_buf(), archive_path.clone());
        let md5 = tokio::task::spawn_blocking(move || archive::archive_directory(&src, &dest))
            .await
            .map_err(|e| ReleaseError::Internal(format!("archive task failed: {}", e)))?
            .map_err(|e| ReleaseError::InvalidRelease(format!("{:#}", e)))?;

        let key = self.registry.release_key(source, version, &archive_name)?;
        let uploaded = self
            .registry
            .store()
            .upload_file(&key, &archive_path, PutOptions::default())
            .await
            .map_err(ReleaseError::Storage)?;

        if uploaded.checksum != md5 {
            return Err(ReleaseError::ChecksumMismatch {
                file: archive_name,
                expected: md5,
                actual: Some(uploaded.checksum),
            });
        }

        info!(key = %key, size = uploaded.size, "Uploaded repository archive");
        Ok((self.registry.store().url_for(&key), md5))
    }

    #[instrument(skip_all, fields(source = %new.source, from = %old.version, to = %new.version))]
    async fn publish_incremental(
        &self,
        old: &BuildDocument,
        new: &BuildDocument,
        mut diff: DiffSet,
    ) -> ReleaseResult<ReleaseDescriptor> {
        if old.source != new.source {
            return Err(ReleaseError::InvalidRelease(format!(
                "cannot diff {} against {}",
                new.source, old.source
            )));
        }
        let source = new.source.as_str();

        let build_version = incremental_key(&old.version, &new.version);
        let manifest_key = self.registry.release_key(source, &build_version, MANIFEST_FILE)?;
        let mut descriptor = ReleaseDescriptor::incremental(
            &old.version,
            &new.version,
            self.registry.store().url_for(&manifest_key),
            self.compat.clone(),
        );
        descriptor.validate()?;

        let manifest = &diff.manifest;
        if manifest.old.version != old.version || manifest.new.version != new.version {
            return Err(ReleaseError::InvalidRelease(format!(
                "diff manifest covers {} -> {}, expected {} -> {}",
                manifest.old.version, manifest.new.version, old.version, new.version
            )));
        }

        diff.verify_checksums().await?;

        let note = ReleaseNote::between(Some(old), new, diff.manifest.stats.as_ref());
        descriptor.changes = Some(
            self.upload_notes(source, &descriptor.build_version, &new.version, &note)
                .await?,
        );

        if !diff.manifest.applied.is_empty() {
            warn!(markers = diff.manifest.applied.len(), "Clearing applied markers from diff manifest");
            diff.manifest.applied.clear();
        }

        let store = self.registry.store();
        for file in &diff.manifest.diff.files {
            let key = self.registry.release_key(source, &descriptor.build_version, &file.name)?;
            let uploaded = store
                .upload_file(&key, &diff.dir.join(&file.name), PutOptions::default())
                .await
                .map_err(ReleaseError::Storage)?;
            if !bdp_common::checksum::digests_match(&file.md5sum, &uploaded.checksum) {
                return Err(ReleaseError::ChecksumMismatch {
                    file: file.name.clone(),
                    expected: file.md5sum.clone(),
                    actual: Some(uploaded.checksum),
                });
            }
        }
        store
            .put(&manifest_key, diff.manifest.to_vec()?, PutOptions::json())
            .await
            .map_err(ReleaseError::Storage)?;

        self.registry.publish_descriptor(source, &descriptor).await?;
        self.registry.register(source, descriptor.clone()).await?;

        info!(
            release = %descriptor,
            files = diff.manifest.diff.files.len(),
            "Published incremental release"
        );
        Ok(descriptor)
    }

    async fn upload_notes(
        &self,
        source: &str,
        build_version: &str,
        version: &str,
        note: &ReleaseNote,
    ) -> ReleaseResult<ReleaseChanges> {
        let store = self.registry.store();
        let txt_key = self
            .registry
            .release_key(source, build_version, &format!("release_{}.txt", version))?;
        let json_key = self
            .registry
            .release_key(source, build_version, &format!("release_{}.json", version))?;

        store
            .put(&txt_key, note.render_text().into_bytes(), PutOptions::text())
            .await
            .map_err(ReleaseError::Storage)?;
        store
            .put(&json_key, note.to_json()?, PutOptions::json())
            .await
            .map_err(ReleaseError::Storage)?;

        Ok(ReleaseChanges {
            txt: store.url_for(&txt_key),
            json: store.url_for(&json_key),
        })
    }
}
