use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_LOCAL_ROOT: &str = "./release-store";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_S3_BUCKET: &str = "bdp-releases";

/// Which object store backs the registry and release artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    #[default]
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "s3" | "minio" => Ok(StorageBackend::S3),
            "local" | "file" | "fs" => Ok(StorageBackend::Local),
            other => bail!("Invalid storage backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when absent the AWS default provider chain is used
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_S3_REGION.to_string(),
            bucket: DEFAULT_S3_BUCKET.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_S3_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub local_root: PathBuf,
    pub s3: S3Config,
    /// Public base URL that consumers download artifacts from.
    ///
    /// Defaults to the S3 endpoint (or `file://` URLs for the local backend).
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_root: PathBuf::from(DEFAULT_LOCAL_ROOT),
            s3: S3Config::default(),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let backend = match env::var("RELEASE_STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::default(),
        };

        Ok(Self {
            backend,
            local_root: env::var("RELEASE_LOCAL_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_ROOT)),
            s3: S3Config::from_env(),
            public_base_url: env::var("RELEASE_PUBLIC_BASE_URL").ok(),
        })
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Local,
            local_root: root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == StorageBackend::S3 {
            if self.s3.bucket.is_empty() {
                bail!("S3_BUCKET must not be empty");
            }
            if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
                bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together");
            }
        }
        if let Some(base) = &self.public_base_url {
            url::Url::parse(base)
                .map_err(|e| anyhow::anyhow!("Invalid RELEASE_PUBLIC_BASE_URL '{}': {}", base, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let config = S3Config::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
        assert_eq!(config.access_key.as_deref(), Some("minioadmin"));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_half_credentials() {
        let mut config = StorageConfig {
            backend: StorageBackend::S3,
            ..StorageConfig::default()
        };
        config.s3.access_key = Some("key".into());
        assert!(config.validate().is_err());

        config.s3.secret_key = Some("secret".into());
        assert!(config.validate().is_ok());

        config.public_base_url = Some("not a url".into());
        assert!(config.validate().is_err());
    }
}
