//! `bdp show` command implementation

use colored::Colorize;

use crate::commands::load_context;
use crate::error::{CliError, Result};
use crate::output::or_dash;

pub async fn run(source: String, build_version: String, json: bool) -> Result<()> {
    let context = load_context().await?;
    let descriptor = context
        .registry
        .fetch_descriptor(&source, &build_version)
        .await?
        .ok_or_else(|| CliError::ReleaseNotFound {
            source_name: source.clone(),
            build_version: build_version.clone(),
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(());
    }

    let compat = &descriptor.compatibility;
    println!("{} {}", source.cyan().bold(), descriptor.build_version.green().bold());
    println!("  Type:       {}", descriptor.release_type);
    println!("  Requires:   {}", or_dash(descriptor.require_version.as_deref()));
    println!("  Target:     {}", descriptor.target_version);
    println!("  Released:   {}", descriptor.release_date.to_rfc3339());
    println!("  Artifact:   {}", descriptor.artifact_ref);
    println!("  MD5:        {}", or_dash(descriptor.artifact_md5.as_deref()));
    println!("  App:        {}", or_dash(compat.app_version.as_deref()));
    println!("  Framework:  {}", or_dash(compat.framework_version.as_deref()));
    println!("  Backend:    {}", or_dash(compat.backend_flavor_version.as_deref()));
    if let Some(changes) = &descriptor.changes {
        println!("  Notes:      {}", changes.txt);
    }

    match context.config.compatibility.check(&descriptor) {
        Ok(()) => println!("{} Compatible with this installation", "✓".green()),
        Err(e) => println!("{} {}", "✗".red(), e),
    }

    Ok(())
}
