//! BDP CLI Library
//!
//! Command-line interface for publishing and installing dataset releases.
//!
//! # Overview
//!
//! - **Registry**: List a source's releases (`bdp versions`) and inspect one (`bdp show`)
//! - **Planning**: Print the release path an update would take (`bdp resolve`)
//! - **Updating**: Walk the installed version forward (`bdp update`)
//! - **State**: Show installed versions and their history (`bdp status`)
//! - **Publishing**: Register full and incremental releases (`bdp publish`)
//!
//! Configuration comes from the same environment variables as the
//! `bdp-release` daemon (see `bdp_release::config`).

pub mod commands;
pub mod error;
pub mod output;

pub use error::{CliError, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// BDP - Biological Dataset Package releases
#[derive(Parser, Debug)]
#[command(name = "bdp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the full command reference as Markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the releases registered for a source
    Versions {
        /// Source name (e.g. "mygene")
        source: String,
    },

    /// Show one release descriptor
    Show {
        source: String,

        /// Build version of the release
        build_version: String,

        /// Print the raw descriptor JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the release path from the installed version to a target
    Resolve {
        source: String,

        /// Target version, exact build version, or "latest"
        #[arg(short, long, default_value = "latest")]
        target: String,

        /// Resolve from this version instead of the installed one
        #[arg(short, long, conflicts_with = "fresh")]
        current: Option<String>,

        /// Resolve as if nothing were installed
        #[arg(long)]
        fresh: bool,
    },

    /// Download, verify and apply releases up to a target
    Update {
        source: String,

        /// Target version, exact build version, or "latest"
        #[arg(short, long, default_value = "latest")]
        target: String,

        /// Maximum number of releases applied in one walk
        #[arg(short, long)]
        max_steps: Option<usize>,

        /// Keep walking until the newest release is installed
        #[arg(long, conflicts_with = "target")]
        until_latest: bool,
    },

    /// Show installed versions
    Status {
        /// Show one source with its advance history
        source: Option<String>,
    },

    /// Publish releases to the registry
    Publish {
        #[command(subcommand)]
        command: PublishCommand,
    },
}

/// Publishing subcommands
#[derive(Subcommand, Debug)]
pub enum PublishCommand {
    /// Publish a full release
    Full(PublishFullArgs),

    /// Publish an incremental release from a diff directory
    Incremental {
        /// Build document (JSON) of the version the diff applies to
        #[arg(long)]
        old: PathBuf,

        /// Build document (JSON) of the version the diff produces
        #[arg(long)]
        new: PathBuf,

        /// Directory holding the diff files and metadata.json
        #[arg(long)]
        diff_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("repository").required(true).args(["archive_dir", "snapshot"]))]
pub struct PublishFullArgs {
    /// Build document (JSON) of the release
    #[arg(long)]
    pub build: PathBuf,

    /// Directory to archive and upload
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Reference of an already queryable snapshot
    #[arg(long)]
    pub snapshot: Option<String>,

    /// Build document of the previous release, for release notes
    #[arg(long)]
    pub previous: Option<PathBuf>,
}
