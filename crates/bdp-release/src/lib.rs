//! BDP Release Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Versioned, incremental releases of built datasets.
//!
//! # Overview
//!
//! - **Registry**: per-source catalog of releases in an object store
//!   ([`registry::RegistryClient`])
//! - **Resolver**: computes the chain of releases from the installed version
//!   to a requested one ([`resolver::resolve`])
//! - **Publisher**: turns a finished build into a full or incremental
//!   release and registers it ([`publish::Publisher`])
//! - **Applier**: downloads, verifies and applies a release chain step by
//!   step ([`apply::UpdateApplier`])
//! - **Scheduler**: cron-driven updates with whole-walk retries
//!   ([`scheduler::UpdateScheduler`])
//!
//! # Flow
//!
//! ```text
//! build pipeline -> Publisher -> Registry <- Resolver <- Scheduler
//!                                               |
//!                                            Applier -> Downloader / Verifier / ApplyBackend
//!                                               |
//!                                          VersionStore
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bdp_release::{config::ReleaseConfig, context::ReleaseContext, jobs::UpdateJob};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = ReleaseContext::from_config(ReleaseConfig::load()?).await?;
//!     let report = context
//!         .runner
//!         .run(&UpdateJob::new("mygene"), &CancellationToken::new())
//!         .await;
//!     println!("{:?}", report.final_version);
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod publish;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod storage;

// Re-export commonly used types
pub use error::{ReleaseError, ReleaseResult};
