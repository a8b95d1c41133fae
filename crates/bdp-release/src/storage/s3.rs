use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use bdp_common::checksum::md5_hex;
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{
    join_url, ConditionalPut, ObjectStore, PutOptions, S3Config, StoredObject, UploadResult,
    WriteCondition,
};

/// S3 / MinIO backed object store
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Store {
    pub async fn new(config: S3Config, public_base_url: Option<String>) -> Result<Self> {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "Initializing S3 release store"
        );

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => aws_sdk_s3::Config::builder()
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                .credentials_provider(Credentials::new(access, secret, None, None, "bdp-release")),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        let public_base_url = public_base_url.unwrap_or_else(|| default_public_url(&config));

        info!(bucket = %config.bucket, "S3 release store initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
            public_base_url,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn default_public_url(config: &S3Config) -> String {
    match &config.endpoint {
        Some(endpoint) => join_url(endpoint, &config.bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    }
}

fn is_precondition_failure<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    matches!(
        err.code(),
        Some("PreconditionFailed") | Some("ConditionalRequestConflict")
    )
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, data, options), fields(bucket = %self.bucket))]
    async fn put(&self, key: &str, data: Vec<u8>, options: PutOptions) -> Result<UploadResult> {
        let checksum = md5_hex(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = options.content_type {
            request = request.content_type(ct);
        }
        if let Some(location) = options.redirect_to {
            request = request.website_redirect_location(location);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, key))?;

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self, data, options), fields(bucket = %self.bucket))]
    async fn put_if(
        &self,
        key: &str,
        data: Vec<u8>,
        condition: WriteCondition,
        options: PutOptions,
    ) -> Result<ConditionalPut> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        request = match &condition {
            WriteCondition::MustNotExist => request.if_none_match("*"),
            WriteCondition::MatchesEtag(etag) => request.if_match(etag),
        };

        if let Some(ct) = options.content_type {
            request = request.content_type(ct);
        }

        match request.send().await {
            Ok(_) => Ok(ConditionalPut::Applied),
            Err(err) if is_precondition_failure(&err) => {
                debug!(key, ?condition, "Conditional write rejected");
                Ok(ConditionalPut::PreconditionFailed)
            },
            Err(err) => Err(anyhow!(
                "Failed conditional upload to s3://{}/{}: {}",
                self.bucket,
                key,
                aws_sdk_s3::error::DisplayErrorContext(&err)
            )),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                return Err(anyhow!(
                    "Failed to download s3://{}/{}: {}",
                    self.bucket,
                    key,
                    aws_sdk_s3::error::DisplayErrorContext(&err)
                ));
            },
        };

        let etag = response.e_tag().map(|s| s.trim_matches('"').to_string());
        let last_modified = response
            .last_modified()
            .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()));

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(Some(StoredObject {
            data,
            etag,
            last_modified,
        }))
    }

    #[instrument(skip(self, options), fields(bucket = %self.bucket))]
    async fn upload_file(&self, key: &str, path: &Path, options: PutOptions) -> Result<UploadResult> {
        let owned = path.to_path_buf();
        let checksum = tokio::task::spawn_blocking(move || {
            bdp_common::checksum::compute_file_checksum(
                &owned,
                bdp_common::types::ChecksumAlgorithm::Md5,
            )
        })
        .await
        .context("Checksum task panicked")??;

        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len() as i64;

        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size)
            .body(body);

        if let Some(ct) = options.content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to upload {} to s3://{}/{}", path.display(), self.bucket, key))?;

        info!(key, size, "Uploaded file to S3");

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(anyhow!(
                        "Failed to check S3 object existence: {}",
                        aws_sdk_s3::error::DisplayErrorContext(&err)
                    ))
                }
            },
        }
    }

    fn url_for(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}
