//! Shared fixtures for bdp-release integration tests
//!
//! Every fixture works on a temporary directory: a [`LocalStore`] holds the
//! registry and artifacts, a [`FileVersionStore`] the installed versions.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestEnv;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnv::new();
//!     env.registry.register("mygene", common::full("20240101")).await.unwrap();
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bdp_common::checksum::md5_hex;
use bdp_release::apply::{
    ApplierConfig, ApplyBackend, FilesystemBackend, LocalArtifact, Md5Verifier, UpdateApplier,
    UrlDownloader,
};
use bdp_release::publish::{BuildDocument, BuildRef, DiffFile, DiffInfo, DiffManifest, DiffSet, SourceInfo};
use bdp_release::registry::{CompatibilityMarkers, RegistryClient, ReleaseDescriptor};
use bdp_release::state::{FileVersionStore, VersionStore};
use bdp_release::storage::LocalStore;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

pub const SOURCE: &str = "mygene";

pub fn compat() -> CompatibilityMarkers {
    CompatibilityMarkers::new("3.2", "1.1", "es8")
}

pub fn full(build_version: &str) -> ReleaseDescriptor {
    ReleaseDescriptor::full(build_version, format!("snapshot://{}_{}", SOURCE, build_version), compat())
}

pub fn incr(require: &str, target: &str) -> ReleaseDescriptor {
    ReleaseDescriptor::incremental(require, target, format!("file:///diffs/{}/metadata.json", target), compat())
}

pub fn build_doc(version: &str, genes: u64) -> BuildDocument {
    let mut sources = BTreeMap::new();
    sources.insert(
        "ensembl".to_string(),
        SourceInfo {
            version: Some(format!("e{}", version)),
            count: genes,
        },
    );
    BuildDocument {
        source: SOURCE.to_string(),
        version: version.to_string(),
        backend: format!("{}_{}", SOURCE, version),
        build_date: Utc::now(),
        sources,
        mapping: json!({"symbol": {"type": "keyword"}}),
        total_documents: genes,
    }
}

/// Write diff files plus `metadata.json` into `dir`
pub fn write_diff_set(dir: &Path, old: &str, new: &str, files: &[(&str, &[u8])]) -> DiffSet {
    std::fs::create_dir_all(dir).unwrap();
    for (name, body) in files {
        std::fs::write(dir.join(name), body).unwrap();
    }
    let set = DiffSet {
        dir: dir.to_path_buf(),
        manifest: DiffManifest {
            diff: DiffInfo {
                version: new.to_string(),
                files: files
                    .iter()
                    .map(|(name, body)| DiffFile {
                        name: name.to_string(),
                        md5sum: md5_hex(body),
                    })
                    .collect(),
                mapping_file: None,
            },
            old: BuildRef {
                version: old.to_string(),
                backend: format!("{}_{}", SOURCE, old),
            },
            new: BuildRef {
                version: new.to_string(),
                backend: format!("{}_{}", SOURCE, new),
            },
            stats: None,
            applied: BTreeMap::new(),
        },
    };
    set.save_manifest().unwrap();
    set
}

/// Backend that records what it was asked to apply, optionally failing
#[derive(Default)]
pub struct RecordingBackend {
    pub applied: Mutex<Vec<String>>,
    pub fail_on: Option<String>,
}

impl RecordingBackend {
    pub fn failing_on(build_version: &str) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            fail_on: Some(build_version.to_string()),
        }
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplyBackend for RecordingBackend {
    async fn apply(&self, _source: &str, artifact: &LocalArtifact) -> Result<()> {
        let bv = artifact.descriptor.build_version.clone();
        if self.fail_on.as_deref() == Some(bv.as_str()) {
            anyhow::bail!("backend rejected {}", bv);
        }
        self.applied.lock().unwrap().push(bv);
        Ok(())
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<LocalStore>,
    pub registry: RegistryClient,
    pub versions: Arc<FileVersionStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path().join("store")));
        let registry = RegistryClient::new(store.clone(), "releases");
        let versions = Arc::new(FileVersionStore::new(dir.path().join("state/versions.json")));
        Self {
            dir,
            store,
            registry,
            versions,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn applier_config(&self) -> ApplierConfig {
        ApplierConfig {
            max_steps: 10,
            download_timeout: Duration::from_secs(30),
            verify_timeout: Duration::from_secs(30),
            apply_timeout: Duration::from_secs(30),
            work_dir: self.path("work"),
        }
    }

    pub fn applier_with(&self, backend: Arc<dyn ApplyBackend>) -> UpdateApplier {
        UpdateApplier::new(
            Arc::new(UrlDownloader::new()),
            Arc::new(Md5Verifier),
            backend,
            self.versions.clone(),
            self.applier_config(),
        )
    }

    pub fn filesystem_applier(&self) -> UpdateApplier {
        self.applier_with(Arc::new(FilesystemBackend::new(self.path("install"))))
    }

    pub async fn installed(&self) -> Option<String> {
        self.versions.current(SOURCE).await.unwrap()
    }
}
