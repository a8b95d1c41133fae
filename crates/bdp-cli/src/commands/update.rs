//! `bdp update` command implementation
//!
//! Runs one update job in the foreground. Ctrl+C cancels the walk; the
//! version reached so far stays installed.

use bdp_release::jobs::UpdateJob;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::commands::load_context;
use crate::error::{CliError, Result};
use crate::output::{create_spinner, or_dash};

pub async fn run(
    source: String,
    target: String,
    max_steps: Option<usize>,
    until_latest: bool,
) -> Result<()> {
    let context = load_context().await?;

    let mut job = UpdateJob::new(&source).with_target(target);
    if let Some(max_steps) = max_steps {
        job = job.with_max_steps(max_steps);
    }
    if until_latest {
        job = job.until_latest();
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let spinner = create_spinner(&format!("Updating {} to {}", source, job.target));
    let report = context.runner.run(&job, &cancel).await;
    spinner.finish_and_clear();
    watcher.abort();

    println!(
        "{} {} -> {}",
        source.cyan().bold(),
        or_dash(report.start_version.as_deref()),
        or_dash(report.final_version.as_deref()).green()
    );
    println!("  Steps applied: {}", report.steps_applied);
    println!("  Cycles:        {}", report.cycles);
    println!("  Attempts:      {}", report.attempts);
    println!("  Duration:      {:.1}s", report.duration_secs);

    match (report.error_kind, report.error) {
        (Some(kind), message) => Err(CliError::UpdateFailed {
            source_name: source,
            kind,
            message: message.unwrap_or_default(),
        }),
        (None, _) => {
            println!("{} Update complete", "✓".green());
            Ok(())
        },
    }
}
