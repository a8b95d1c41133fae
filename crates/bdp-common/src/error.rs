//! Error types for BDP

use thiserror::Error;

/// Result type alias for BDP operations
pub type Result<T> = std::result::Result<T, BdpError>;

/// Main error type for BDP
#[derive(Error, Debug)]
pub enum BdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
