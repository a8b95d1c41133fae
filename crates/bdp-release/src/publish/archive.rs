//! Archive utilities for file-backed repositories
//!
//! # Supported Formats
//!
//! - **Tar.gz** (.tar.gz): flate2 + tar, for packing a repository directory
//!   into a full-release payload and unpacking it on the consumer side.
//!
//! Both functions are blocking; call them from `spawn_blocking`.

use anyhow::{bail, Context, Result};
use bdp_common::checksum::compute_file_checksum;
use bdp_common::types::ChecksumAlgorithm;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Pack `src_dir` into a gzip-compressed tar at `dest`
///
/// # Returns
/// MD5 of the written archive
pub fn archive_directory(src_dir: &Path, dest: &Path) -> Result<String> {
    if !src_dir.is_dir() {
        bail!("Repository path {} is not a directory", src_dir.display());
    }

    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", src_dir)
        .with_context(|| format!("Failed to archive {}", src_dir.display()))?;
    builder
        .into_inner()
        .context("Failed to finish tar stream")?
        .finish()
        .context("Failed to finish gzip stream")?;

    let md5 = compute_file_checksum(dest, ChecksumAlgorithm::Md5)?;
    debug!(src = %src_dir.display(), archive = %dest.display(), %md5, "Archived repository");
    Ok(md5)
}

/// Unpack a tar.gz archive into `dest_dir`
///
/// Entries that would land outside `dest_dir` are refused by `tar`.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_mtime(true);
    tar.unpack(dest_dir)
        .with_context(|| format!("Failed to extract {} into {}", archive.display(), dest_dir.display()))?;
    debug!(archive = %archive.display(), dest = %dest_dir.display(), "Extracted archive");
    Ok(())
}
