//! JSON-file version store
//!
//! All sources live in one document, rewritten atomically (temp file plus
//! rename) on every advance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{AdvanceRecord, VersionRecord, VersionStore};
use crate::error::{ReleaseError, ReleaseResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    sources: BTreeMap<String, VersionRecord>,
}

pub struct FileVersionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> ReleaseResult<StateDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &StateDocument) -> ReleaseResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for FileVersionStore {
    async fn current(&self, source: &str) -> ReleaseResult<Option<String>> {
        let doc = self.load().await?;
        Ok(doc.sources.get(source).and_then(|r| r.version.clone()))
    }

    #[instrument(skip(self))]
    async fn advance(
        &self,
        source: &str,
        from: Option<&str>,
        to: &str,
        build_version: &str,
    ) -> ReleaseResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;

        let record = doc
            .sources
            .entry(source.to_string())
            .or_insert_with(|| VersionRecord::empty(source));

        if record.version.as_deref() != from {
            return Err(ReleaseError::VersionState {
                source_name: source.to_string(),
                expected: from.map(str::to_string),
                found: record.version.clone(),
            });
        }

        let now = Utc::now();
        record.history.push(AdvanceRecord {
            from: from.map(str::to_string),
            to: to.to_string(),
            build_version: build_version.to_string(),
            applied_at: now,
        });
        record.version = Some(to.to_string());
        record.updated_at = Some(now);

        self.save(&doc).await?;
        debug!(path = %self.path.display(), "Version state written");
        Ok(())
    }

    async fn record(&self, source: &str) -> ReleaseResult<VersionRecord> {
        let mut doc = self.load().await?;
        Ok(doc
            .sources
            .remove(source)
            .unwrap_or_else(|| VersionRecord::empty(source)))
    }

    async fn records(&self) -> ReleaseResult<Vec<VersionRecord>> {
        Ok(self.load().await?.sources.into_values().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advance_is_compare_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileVersionStore::new(dir.path().join("state/versions.json"));

        assert_eq!(store.current("mygene").await.unwrap(), None);
        store.advance("mygene", None, "20240101", "20240101").await.unwrap();
        store
            .advance("mygene", Some("20240101"), "20240115", "20240115")
            .await
            .unwrap();

        let err = store
            .advance("mygene", Some("20240101"), "20240201", "20240201")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::VersionState { .. }));

        let record = store.record("mygene").await.unwrap();
        assert_eq!(record.version.as_deref(), Some("20240115"));
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[1].from.as_deref(), Some("20240101"));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.json");
        FileVersionStore::new(&path)
            .advance("chembl", None, "34", "34")
            .await
            .unwrap();

        let reopened = FileVersionStore::new(&path);
        assert_eq!(reopened.current("chembl").await.unwrap().as_deref(), Some("34"));
        assert_eq!(reopened.records().await.unwrap().len(), 1);
        assert_eq!(reopened.record("other").await.unwrap().version, None);
    }
}
