//! Release pipeline error types

use thiserror::Error;

/// Result type alias for release operations
pub type ReleaseResult<T> = std::result::Result<T, ReleaseError>;

/// Errors raised by the registry, resolver, publisher and applier
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("No release path from {} to {to}: {reason}", .from.as_deref().unwrap_or("<none>"))]
    NoPathFound {
        from: Option<String>,
        to: String,
        reason: String,
    },

    #[error("Incompatible release {build_version}: {marker} is {found:?}, expected {expected}")]
    IncompatibleRelease {
        build_version: String,
        marker: &'static str,
        expected: String,
        found: Option<String>,
    },

    #[error("Checksum mismatch for {file}: expected {expected}, got {}", .actual.as_deref().unwrap_or("a different digest"))]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Self-referential release {version}: require_version equals target_version")]
    SelfReferentialRelease { version: String },

    #[error("Registry write conflict for source {source_name}: {reason}")]
    RegistryWriteConflict { source_name: String, reason: String },

    #[error("Cycle limit exceeded: still behind after {limit} resolve/apply cycles")]
    CycleLimitExceeded { limit: usize },

    #[error("Release {build_version} requires {required}, but {} is installed", .installed.as_deref().unwrap_or("nothing"))]
    PredecessorMismatch {
        build_version: String,
        required: String,
        installed: Option<String>,
    },

    #[error("Invalid release: {0}")]
    InvalidRelease(String),

    #[error("{phase} timed out after {seconds}s")]
    Timeout { phase: &'static str, seconds: u64 },

    #[error("Update walk cancelled")]
    Cancelled,

    #[error("Version state conflict for source {source_name}: expected {expected:?}, found {found:?}")]
    VersionState {
        source_name: String,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Download error: {0:#}")]
    Download(anyhow::Error),

    #[error("Apply error: {0:#}")]
    Apply(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("BDP error: {0}")]
    Bdp(#[from] bdp_common::BdpError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReleaseError {
    /// Stable snake_case name for logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            ReleaseError::NoPathFound { .. } => "no_path_found",
            ReleaseError::IncompatibleRelease { .. } => "incompatible_release",
            ReleaseError::ChecksumMismatch { .. } => "checksum_mismatch",
            ReleaseError::SelfReferentialRelease { .. } => "self_referential_release",
            ReleaseError::RegistryWriteConflict { .. } => "registry_write_conflict",
            ReleaseError::CycleLimitExceeded { .. } => "cycle_limit_exceeded",
            ReleaseError::PredecessorMismatch { .. } => "predecessor_mismatch",
            ReleaseError::InvalidRelease(_) => "invalid_release",
            ReleaseError::Timeout { .. } => "timeout",
            ReleaseError::Cancelled => "cancelled",
            ReleaseError::VersionState { .. } => "version_state",
            ReleaseError::Download(_) => "download",
            ReleaseError::Apply(_) => "apply",
            ReleaseError::Storage(_) => "storage",
            ReleaseError::Config(_) => "config",
            ReleaseError::Io(_) => "io",
            ReleaseError::Serialization(_) => "serialization",
            ReleaseError::Database(_) => "database",
            ReleaseError::Bdp(_) => "bdp",
            ReleaseError::Internal(_) => "internal",
        }
    }

    /// Whether a fresh resolve/apply walk could succeed after a delay.
    ///
    /// Structural failures (no path, incompatible markers, bad releases,
    /// cancellation) never heal by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReleaseError::ChecksumMismatch { .. }
                | ReleaseError::RegistryWriteConflict { .. }
                | ReleaseError::Timeout { .. }
                | ReleaseError::VersionState { .. }
                | ReleaseError::Download(_)
                | ReleaseError::Storage(_)
                | ReleaseError::Io(_)
                | ReleaseError::Database(_)
        )
    }

    pub(crate) fn no_path(from: Option<&str>, to: &str, reason: impl Into<String>) -> Self {
        ReleaseError::NoPathFound {
            from: from.map(str::to_string),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}
