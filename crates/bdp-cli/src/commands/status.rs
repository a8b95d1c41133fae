//! `bdp status` command implementation
//!
//! Shows installed versions, or one source's advance history.

use bdp_release::state::VersionStore;
use colored::Colorize;

use crate::commands::load_context;
use crate::error::Result;
use crate::output::{or_dash, table};

pub async fn run(source: Option<String>) -> Result<()> {
    let context = load_context().await?;

    let Some(source) = source else {
        let records = context.versions.records().await?;
        if records.is_empty() {
            println!("No sources installed.");
            println!("Run 'bdp update <source>' to install one.");
            return Ok(());
        }

        let mut t = table(&["Source", "Installed", "Updated", "Advances"]);
        for record in &records {
            t.add_row(vec![
                record.source.clone(),
                or_dash(record.version.as_deref()),
                record
                    .updated_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                record.history.len().to_string(),
            ]);
        }
        println!("{}", "Installed Sources:".cyan().bold());
        println!("{}", t);
        return Ok(());
    };

    let record = context.versions.record(&source).await?;
    println!("{} {}", source.cyan().bold(), or_dash(record.version.as_deref()).green());
    if record.history.is_empty() {
        println!("  Nothing installed yet");
        return Ok(());
    }

    let mut t = table(&["Applied", "From", "To", "Release"]);
    for advance in &record.history {
        t.add_row(vec![
            advance.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            or_dash(advance.from.as_deref()),
            advance.to.clone(),
            advance.build_version.clone(),
        ]);
    }
    println!("{}", t);

    Ok(())
}
