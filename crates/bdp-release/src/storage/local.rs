use anyhow::{Context, Result};
use async_trait::async_trait;
use bdp_common::checksum::md5_hex;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{
    check_key, join_url, ConditionalPut, ObjectStore, PutOptions, StoredObject, UploadResult,
    WriteCondition,
};

/// Object store rooted at a local directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partially written object. ETags are the MD5 of the
/// content. Redirect options are not materialized; the pointer object holds
/// the target version as its body.
pub struct LocalStore {
    root: PathBuf,
    base_url: Option<String>,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Serve artifacts from `base_url` instead of `file://` URLs
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredObject>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let last_modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        Ok(Some(StoredObject {
            etag: Some(md5_hex(&data)),
            data,
            last_modified,
        }))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    #[instrument(skip(self, data, _options))]
    async fn put(&self, key: &str, data: Vec<u8>, _options: PutOptions) -> Result<UploadResult> {
        let path = self.path_for(key)?;
        let checksum = md5_hex(&data);
        let size = data.len() as i64;

        let _guard = self.write_lock.lock().await;
        self.write_atomic(&path, &data).await?;
        debug!(size, "Stored object at {}", path.display());

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self, data, _options))]
    async fn put_if(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: WriteCondition,
        _options: PutOptions,
    ) -> Result<ConditionalPut> {
        let path = self.path_for(key)?;

        let _guard = self.write_lock.lock().await;
        let current = self.read(&path).await?;

        let holds = match (&condition, &current) {
            (WriteCondition::MustNotExist, None) => true,
            (WriteCondition::MustNotExist, Some(_)) => false,
            (WriteCondition::MatchesEtag(expected), Some(object)) => {
                object.etag.as_deref() == Some(expected.as_str())
            },
            (WriteCondition::MatchesEtag(_), None) => false,
        };

        if !holds {
            debug!(?condition, "Conditional write rejected");
            return Ok(ConditionalPut::PreconditionFailed);
        }

        self.write_atomic(&path, &data).await?;
        Ok(ConditionalPut::Applied)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.path_for(key)?;
        self.read(&path).await
    }

    #[instrument(skip(self, _options))]
    async fn upload_file(&self, key: &str, path: &Path, _options: PutOptions) -> Result<UploadResult> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = dest.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let size = tokio::fs::copy(path, &tmp)
            .await
            .with_context(|| format!("Failed to copy {} into store", path.display()))?;
        tokio::fs::rename(&tmp, &dest).await?;

        let checksum_path = dest.clone();
        let checksum = tokio::task::spawn_blocking(move || {
            bdp_common::checksum::compute_file_checksum(
                &checksum_path,
                bdp_common::types::ChecksumAlgorithm::Md5,
            )
        })
        .await
        .context("Checksum task panicked")??;

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size: size as i64,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    fn url_for(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) => join_url(base, key),
            None => {
                let path = self.root.join(key);
                let absolute = std::path::absolute(&path).unwrap_or(path);
                url::Url::from_file_path(&absolute)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| format!("file://{}", absolute.display()))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let result = store
            .put("releases/uniprot/latest", b"20240115".to_vec(), PutOptions::text())
            .await
            .unwrap();
        assert_eq!(result.size, 8);

        let object = store.get("releases/uniprot/latest").await.unwrap().unwrap();
        assert_eq!(object.data, b"20240115");
        assert_eq!(object.etag.as_deref(), Some(result.checksum.as_str()));
        assert!(object.last_modified.is_some());

        assert!(store.get("releases/uniprot/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let first = store
            .put_if("doc.json", b"v1".to_vec(), WriteCondition::MustNotExist, PutOptions::json())
            .await
            .unwrap();
        assert_eq!(first, ConditionalPut::Applied);

        let again = store
            .put_if("doc.json", b"v1b".to_vec(), WriteCondition::MustNotExist, PutOptions::json())
            .await
            .unwrap();
        assert_eq!(again, ConditionalPut::PreconditionFailed);

        let etag = store.get("doc.json").await.unwrap().unwrap().etag.unwrap();
        let swap = store
            .put_if("doc.json", b"v2".to_vec(), WriteCondition::MatchesEtag(etag.clone()), PutOptions::json())
            .await
            .unwrap();
        assert_eq!(swap, ConditionalPut::Applied);

        let stale = store
            .put_if("doc.json", b"v3".to_vec(), WriteCondition::MatchesEtag(etag), PutOptions::json())
            .await
            .unwrap();
        assert_eq!(stale, ConditionalPut::PreconditionFailed);
        assert_eq!(store.get("doc.json").await.unwrap().unwrap().data, b"v2");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(store.put("../outside", vec![], PutOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_upload_file_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("payload.bin");
        std::fs::write(&src, b"hello world").unwrap();

        let store = LocalStore::new(dir.path().join("store"));
        let result = store
            .upload_file("a/payload.bin", &src, PutOptions::default())
            .await
            .unwrap();
        assert_eq!(result.checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(store.exists("a/payload.bin").await.unwrap());
        assert!(store.url_for("a/payload.bin").starts_with("file://"));

        let served = LocalStore::new(dir.path()).with_base_url("http://mirror.local/r/");
        assert_eq!(served.url_for("a/b"), "http://mirror.local/r/a/b");
    }
}
