//! Checksum verification of downloaded artifacts

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use bdp_common::checksum::{compute_file_checksum, digests_match};
use bdp_common::types::ChecksumAlgorithm;

#[async_trait]
pub trait ChecksumVerifier: Send + Sync {
    /// `true` when the file's MD5 equals `expected_md5`
    async fn verify(&self, path: &Path, expected_md5: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Verifier;

#[async_trait]
impl ChecksumVerifier for Md5Verifier {
    async fn verify(&self, path: &Path, expected_md5: &str) -> Result<bool> {
        let path = path.to_path_buf();
        let actual =
            tokio::task::spawn_blocking(move || compute_file_checksum(&path, ChecksumAlgorithm::Md5))
                .await??;
        Ok(digests_match(expected_md5, &actual))
    }
}
