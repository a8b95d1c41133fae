//! `bdp publish` command implementation
//!
//! Registers a release built elsewhere. Build documents are the JSON
//! metadata a build run writes next to its data.

use bdp_release::publish::{BuildDocument, DiffSet, PublishRequest, RepositoryTarget};
use bdp_release::registry::ReleaseDescriptor;
use colored::Colorize;

use crate::commands::load_context;
use crate::error::{CliError, Result};
use crate::output::create_spinner;
use crate::{PublishCommand, PublishFullArgs};

pub async fn run(command: &PublishCommand) -> Result<()> {
    let request = match command {
        PublishCommand::Full(args) => full_request(args)?,
        PublishCommand::Incremental { old, new, diff_dir } => PublishRequest::Incremental {
            old: BuildDocument::load(old)?,
            new: BuildDocument::load(new)?,
            diff: DiffSet::load(diff_dir.clone())?,
        },
    };

    let context = load_context().await?;
    let spinner = create_spinner("Publishing release");
    let result = context.publisher().publish(request).await;
    spinner.finish_and_clear();

    print_published(&result?);
    Ok(())
}

fn full_request(args: &PublishFullArgs) -> Result<PublishRequest> {
    let repository = match (&args.archive_dir, &args.snapshot) {
        (Some(path), None) => RepositoryTarget::FileBacked { path: path.clone() },
        (None, Some(reference)) => RepositoryTarget::Queryable {
            reference: reference.clone(),
        },
        _ => {
            return Err(CliError::config(
                "exactly one of --archive-dir or --snapshot is required",
            ))
        },
    };

    Ok(PublishRequest::Full {
        build: BuildDocument::load(&args.build)?,
        repository,
        previous: args.previous.as_ref().map(BuildDocument::load).transpose()?,
    })
}

fn print_published(descriptor: &ReleaseDescriptor) {
    println!("{} Published {}", "✓".green(), descriptor.to_string().green());
    println!("  Build:    {}", descriptor.build_version);
    println!("  Artifact: {}", descriptor.artifact_ref);
    if let Some(md5) = &descriptor.artifact_md5 {
        println!("  MD5:      {}", md5);
    }
    if let Some(changes) = &descriptor.changes {
        println!("  Notes:    {}", changes.txt);
    }
}
