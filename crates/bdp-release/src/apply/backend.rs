//! Apply backends
//!
//! The backend receives a verified, locally staged artifact and loads it.
//! [`FilesystemBackend`] keeps one directory per source under an install
//! root:
//!
//! ```text
//! <install_dir>/<source>/
//!     current/          unpacked full archive
//!     snapshot          reference of a queryable full release
//!     diffs/<bv>/       diff files of applied incremental releases
//!     release.json      descriptor of the last applied release
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::publish::archive::extract_archive;
use crate::publish::DiffManifest;
use crate::registry::ReleaseDescriptor;

/// Locally staged payload of one release step
#[derive(Debug, Clone)]
pub enum Payload {
    /// Downloaded and verified tar.gz archive
    Archive(PathBuf),
    /// Directly queryable repository, nothing downloaded
    Reference(String),
    /// Verified diff files in `dir`
    Diff { manifest: DiffManifest, dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct LocalArtifact {
    pub descriptor: ReleaseDescriptor,
    pub payload: Payload,
}

#[async_trait]
pub trait ApplyBackend: Send + Sync {
    async fn apply(&self, source: &str, artifact: &LocalArtifact) -> Result<()>;
}

pub struct FilesystemBackend {
    install_dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
        }
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.install_dir.join(source)
    }

    async fn install_archive(&self, root: &Path, archive: &Path) -> Result<()> {
        let staging = root.join(".staging");
        let current = root.join("current");
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }

        let (src, dest) = (archive.to_path_buf(), staging.clone());
        tokio::task::spawn_blocking(move || extract_archive(&src, &dest)).await??;

        if tokio::fs::try_exists(&current).await? {
            tokio::fs::remove_dir_all(&current)
                .await
                .with_context(|| format!("Failed to remove {}", current.display()))?;
        }
        tokio::fs::rename(&staging, &current)
            .await
            .with_context(|| format!("Failed to install {}", current.display()))?;
        Ok(())
    }

    async fn install_diff(&self, root: &Path, bv: &str, manifest: &DiffManifest, dir: &Path) -> Result<()> {
        let dest = root.join("diffs").join(bv);
        tokio::fs::create_dir_all(&dest).await?;
        for file in manifest.payload_files() {
            tokio::fs::copy(dir.join(&file.name), dest.join(&file.name))
                .await
                .with_context(|| format!("Failed to stage diff file {}", file.name))?;
        }
        tokio::fs::write(dest.join(crate::publish::MANIFEST_FILE), manifest.to_vec()?).await?;
        Ok(())
    }
}

#[async_trait]
impl ApplyBackend for FilesystemBackend {
    #[instrument(skip(self, artifact), fields(build_version = %artifact.descriptor.build_version))]
    async fn apply(&self, source: &str, artifact: &LocalArtifact) -> Result<()> {
        let root = self.source_dir(source);
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;

        let descriptor = &artifact.descriptor;
        match &artifact.payload {
            Payload::Archive(path) => self.install_archive(&root, path).await?,
            Payload::Reference(reference) => {
                tokio::fs::write(root.join("snapshot"), reference).await?;
            },
            Payload::Diff { manifest, dir } => {
                self.install_diff(&root, &descriptor.build_version, manifest, dir)
                    .await?
            },
        }

        tokio::fs::write(root.join("release.json"), serde_json::to_vec_pretty(descriptor)?).await?;
        info!(release = %descriptor, "Applied release");
        Ok(())
    }
}
