//! BDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the BDP release tooling.
//!
//! # Overview
//!
//! - **Error Handling**: [`BdpError`] and the crate [`Result`] alias
//! - **Checksums**: streaming MD5/SHA digests for artifact verification
//! - **Logging**: centralized `tracing` initialization
//! - **Types**: checksum algorithms and build-version rules
//!
//! # Example
//!
//! ```no_run
//! use bdp_common::checksum::compute_file_checksum;
//! use bdp_common::types::ChecksumAlgorithm;
//!
//! fn fingerprint(path: &str) -> bdp_common::Result<String> {
//!     compute_file_checksum(path, ChecksumAlgorithm::Md5)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BdpError, Result};
