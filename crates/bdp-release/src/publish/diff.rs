//! Incremental release payloads
//!
//! A diff set is a directory holding `metadata.json` plus the diff files it
//! lists. The manifest layout:
//!
//! ```json
//! {
//!   "diff": {"version": "20240115", "files": [{"name": "a.pyobj", "md5sum": "..."}], "mapping_file": null},
//!   "old": {"version": "20240101", "backend": "mygene_20240101"},
//!   "new": {"version": "20240115", "backend": "mygene_20240115"}
//! }
//! ```
//!
//! Diff sets are produced by an external [`DiffEngine`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bdp_common::checksum::{compute_file_checksum, digests_match};
use bdp_common::types::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::notes::BuildDocument;
use crate::error::{ReleaseError, ReleaseResult};

pub const MANIFEST_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFile {
    pub name: String,
    pub md5sum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffInfo {
    pub version: String,
    pub files: Vec<DiffFile>,
    #[serde(default)]
    pub mapping_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub version: String,
    pub backend: String,
}

/// Per-document statistics reported by the diff engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    #[serde(default)]
    pub add: u64,
    #[serde(default)]
    pub delete: u64,
    #[serde(default)]
    pub update: u64,
    #[serde(default)]
    pub mapping_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffManifest {
    pub diff: DiffInfo,
    pub old: BuildRef,
    pub new: BuildRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DiffStats>,
    /// Consumer -> already-applied markers left by earlier runs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub applied: BTreeMap<String, bool>,
}

impl DiffManifest {
    pub fn from_slice(data: &[u8]) -> ReleaseResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_vec(&self) -> ReleaseResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Every payload file, the mapping file included
    pub fn payload_files(&self) -> impl Iterator<Item = &DiffFile> {
        self.diff.files.iter()
    }
}

/// A diff manifest and the directory holding its files
#[derive(Debug, Clone)]
pub struct DiffSet {
    pub dir: PathBuf,
    pub manifest: DiffManifest,
}

/// Reject names that would leave the diff directory
pub(crate) fn check_file_name(name: &str) -> ReleaseResult<()> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(ReleaseError::InvalidRelease(format!("invalid diff file name '{}'", name)))
    }
}

impl DiffSet {
    /// Read `metadata.json` from `dir`
    pub fn load(dir: impl Into<PathBuf>) -> ReleaseResult<Self> {
        let dir = dir.into();
        let data = std::fs::read(dir.join(MANIFEST_FILE)).map_err(|e| {
            ReleaseError::InvalidRelease(format!(
                "cannot read {}: {}",
                dir.join(MANIFEST_FILE).display(),
                e
            ))
        })?;
        Ok(Self {
            manifest: DiffManifest::from_slice(&data)?,
            dir,
        })
    }

    /// Compute or validate the MD5 of every payload file.
    ///
    /// Empty `md5sum` entries are filled in. A mapping file named by the
    /// manifest but absent from `files` is added. Any missing file or
    /// mismatching checksum fails the whole set.
    pub async fn verify_checksums(&mut self) -> ReleaseResult<()> {
        if let Some(mapping) = self.manifest.diff.mapping_file.clone() {
            if !self.manifest.diff.files.iter().any(|f| f.name == mapping) {
                self.manifest.diff.files.push(DiffFile {
                    name: mapping,
                    md5sum: String::new(),
                });
            }
        }

        for file in &mut self.manifest.diff.files {
            check_file_name(&file.name)?;
            let path = self.dir.join(&file.name);
            if !path.is_file() {
                return Err(ReleaseError::InvalidRelease(format!(
                    "diff file {} is missing from {}",
                    file.name,
                    self.dir.display()
                )));
            }

            let actual = tokio::task::spawn_blocking(move || {
                compute_file_checksum(&path, ChecksumAlgorithm::Md5)
            })
            .await
            .map_err(|e| ReleaseError::Internal(format!("checksum task failed: {}", e)))??;

            if file.md5sum.is_empty() {
                debug!(file = %file.name, md5 = %actual, "Computed missing checksum");
                file.md5sum = actual;
            } else if !digests_match(&file.md5sum, &actual) {
                return Err(ReleaseError::ChecksumMismatch {
                    file: file.name.clone(),
                    expected: file.md5sum.clone(),
                    actual: Some(actual),
                });
            }
        }

        Ok(())
    }

    /// Write the manifest back into the directory
    pub fn save_manifest(&self) -> ReleaseResult<()> {
        std::fs::write(self.dir.join(MANIFEST_FILE), self.manifest.to_vec()?)?;
        Ok(())
    }
}

/// Produces the structural diff between two builds
#[async_trait]
pub trait DiffEngine: Send + Sync {
    /// Write diff files and `metadata.json` into `out_dir`
    async fn compute(
        &self,
        old: &BuildDocument,
        new: &BuildDocument,
        out_dir: &Path,
    ) -> anyhow::Result<DiffSet>;
}
