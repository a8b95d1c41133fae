//! Common types used across BDP

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{BdpError, Result};

// ============================================================================
// Checksums
// ============================================================================

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = BdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(BdpError::Parse(format!("unknown checksum algorithm: {}", other))),
        }
    }
}

// ============================================================================
// Build Versions
// ============================================================================

static BUILD_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap()
});

/// Validate a build version string.
///
/// Build versions are opaque, zero-padded strings (typically date stamps
/// such as `20240115`) and are ordered lexically. They double as object
/// store key segments, so only `[A-Za-z0-9._-]` is accepted and the first
/// character must be alphanumeric.
///
/// # Examples
///
/// ```
/// use bdp_common::types::validate_build_version;
///
/// assert!(validate_build_version("20240115").is_ok());
/// assert!(validate_build_version("../etc").is_err());
/// ```
pub fn validate_build_version(version: &str) -> Result<()> {
    if BUILD_VERSION_RE.is_match(version) {
        Ok(())
    } else {
        Err(BdpError::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_algorithm_round_trip() {
        for algo in [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha512] {
            assert_eq!(algo.to_string().parse::<ChecksumAlgorithm>().unwrap(), algo);
        }
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_validate_build_version() {
        assert!(validate_build_version("20240101").is_ok());
        assert!(validate_build_version("2024-01-01").is_ok());
        assert!(validate_build_version("v1.2.3_rc1").is_ok());
        assert!(validate_build_version("").is_err());
        assert!(validate_build_version(".hidden").is_err());
        assert!(validate_build_version("a/b").is_err());
        assert!(validate_build_version("with space").is_err());
    }
}
