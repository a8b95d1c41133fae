//! `bdp resolve` command implementation
//!
//! Prints the path an update would take without downloading anything.

use bdp_release::resolver::{self, Resolution};
use bdp_release::state::VersionStore;
use colored::Colorize;

use crate::commands::load_context;
use crate::error::Result;
use crate::output::{or_dash, table};

pub async fn run(source: String, target: String, current: Option<String>, fresh: bool) -> Result<()> {
    let context = load_context().await?;

    let current = if fresh {
        None
    } else if current.is_some() {
        current
    } else {
        context.versions.current(&source).await?
    };

    let registry = context.registry.snapshot(&source).await?;
    let resolution = resolver::resolve(
        &registry,
        &context.config.compatibility,
        current.as_deref(),
        &target,
    )?;

    match resolution {
        Resolution::UpToDate { version } => {
            println!("{} {} is up to date at {}", "✓".green(), source, version.green());
        },
        Resolution::Path(path) => {
            println!(
                "{} {} -> {} ({} step{})",
                source.cyan().bold(),
                or_dash(current.as_deref()),
                or_dash(path.final_version()).green(),
                path.len(),
                if path.len() == 1 { "" } else { "s" }
            );
            let mut t = table(&["#", "Release", "Artifact"]);
            for (i, step) in path.iter().enumerate() {
                t.add_row(vec![(i + 1).to_string(), step.to_string(), step.artifact_ref.clone()]);
            }
            println!("{}", t);
        },
    }

    Ok(())
}
