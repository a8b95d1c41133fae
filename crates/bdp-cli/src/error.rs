//! Error types for BDP CLI
//!
//! Messages are user-facing and say what to do next where possible.

use bdp_release::ReleaseError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    /// No descriptor for the requested release
    #[error("Release '{build_version}' not found for source '{source_name}'. Run 'bdp versions {source_name}' to list releases.")]
    ReleaseNotFound {
        source_name: String,
        build_version: String,
    },

    /// An update job ended without reaching its target
    #[error("Update of '{source_name}' failed ({kind}): {message}")]
    UpdateFailed {
        source_name: String,
        kind: String,
        message: String,
    },

    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
