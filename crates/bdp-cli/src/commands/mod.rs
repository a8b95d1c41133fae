//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod publish;
pub mod resolve;
pub mod show;
pub mod status;
pub mod update;
pub mod versions;

use bdp_release::config::ReleaseConfig;
use bdp_release::context::ReleaseContext;

use crate::error::{CliError, Result};

/// Load configuration from the environment and wire the release context
pub async fn load_context() -> Result<ReleaseContext> {
    let config = ReleaseConfig::load().map_err(|e| CliError::config(format!("{:#}", e)))?;
    let context = ReleaseContext::from_config(config).await?;
    context.migrate().await?;
    Ok(context)
}
