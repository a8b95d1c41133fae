//! Artifact downloads
//!
//! `http(s)://` URLs are streamed with reqwest into a `.part` file that is
//! renamed once complete. `file://` URLs (local object stores) are copied.
//! The remote last-modified time, when known, becomes the local mtime.

use std::path::Path;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::LAST_MODIFIED;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub url: String,
    pub local_path: std::path::PathBuf,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, local_path: &Path) -> Result<FetchReport>;
}

#[derive(Clone, Default)]
pub struct UrlDownloader {
    client: reqwest::Client,
}

impl UrlDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &Url, local_path: &Path) -> Result<(u64, Option<DateTime<Utc>>)> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()
            .with_context(|| format!("Download of {} failed", url))?;

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let part = local_path.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("Failed to create {}", part.display()))?;

        let mut size = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed reading body of {}", url))?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, local_path)
            .await
            .with_context(|| format!("Failed to move {} into place", part.display()))?;
        Ok((size, last_modified))
    }

    async fn fetch_file(&self, url: &Url, local_path: &Path) -> Result<(u64, Option<DateTime<Utc>>)> {
        let source = url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("Invalid file URL {}", url))?;
        let size = tokio::fs::copy(&source, local_path)
            .await
            .with_context(|| format!("Failed to copy {}", source.display()))?;
        let modified = tokio::fs::metadata(&source)
            .await?
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        Ok((size, modified))
    }
}

fn set_mtime(path: &Path, when: DateTime<Utc>) -> Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::from(when))?;
    Ok(())
}

#[async_trait]
impl Downloader for UrlDownloader {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str, local_path: &Path) -> Result<FetchReport> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid artifact URL {}", url))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (size, last_modified) = match parsed.scheme() {
            "http" | "https" => self.fetch_http(&parsed, local_path).await?,
            "file" => self.fetch_file(&parsed, local_path).await?,
            other => bail!("Unsupported URL scheme '{}' in {}", other, url),
        };

        if let Some(when) = last_modified {
            set_mtime(local_path, when)
                .with_context(|| format!("Failed to set mtime on {}", local_path.display()))?;
        }

        debug!(size, "Downloaded artifact");
        Ok(FetchReport {
            url: url.to_string(),
            local_path: local_path.to_path_buf(),
            size,
            last_modified,
        })
    }
}
