//! `bdp versions` command implementation
//!
//! Lists a source's registry, marking releases this installation cannot use.

use bdp_release::state::VersionStore;
use colored::Colorize;

use crate::commands::load_context;
use crate::error::Result;
use crate::output::{or_dash, table};

pub async fn run(source: String) -> Result<()> {
    let context = load_context().await?;
    let registry = context.registry.snapshot(&source).await?;

    if registry.is_empty() {
        println!("No releases registered for {}", source.cyan());
        return Ok(());
    }

    let compat = &context.config.compatibility;
    let installed = context.versions.current(&source).await?;

    let mut t = table(&["Build", "Type", "Requires", "Target", "Released", "Compatible"]);
    for release in &registry.versions {
        let mut build = release.build_version.clone();
        if installed.as_deref() == Some(release.target_version.as_str()) {
            build.push_str(" *");
        }
        t.add_row(vec![
            build,
            release.release_type.to_string(),
            or_dash(release.require_version.as_deref()),
            release.target_version.clone(),
            release.release_date.format("%Y-%m-%d %H:%M").to_string(),
            if compat.accepts(release) { "yes" } else { "no" }.to_string(),
        ]);
    }

    println!("{} {}", "Releases for".cyan().bold(), source.cyan().bold());
    println!("{}", t);
    if let Some(latest) = registry.latest() {
        println!("Latest:    {}", latest.target_version.green());
    }
    println!("Installed: {}", or_dash(installed.as_deref()));

    Ok(())
}
