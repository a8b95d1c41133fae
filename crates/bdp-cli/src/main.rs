//! BDP CLI - Main entry point

use bdp_cli::{Cli, Commands};
use bdp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let mut builder = LogConfig::builder()
        .output(LogOutput::Console)
        .log_file_prefix("bdp-cli".to_string());
    builder = if cli.verbose {
        builder
            .level(LogLevel::Debug)
            .filter_directives("sqlx=warn,aws_config=warn,hyper=info")
    } else {
        builder.level(LogLevel::Warn)
    };
    let log_config = builder.build();

    // LOG_* environment variables take precedence over --verbose
    let log_config = if std::env::var_os("LOG_LEVEL").is_some() {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> bdp_cli::Result<()> {
    use bdp_cli::commands;

    match command {
        Commands::Versions { source } => commands::versions::run(source).await,
        Commands::Show {
            source,
            build_version,
            json,
        } => commands::show::run(source, build_version, json).await,
        Commands::Resolve {
            source,
            target,
            current,
            fresh,
        } => commands::resolve::run(source, target, current, fresh).await,
        Commands::Update {
            source,
            target,
            max_steps,
            until_latest,
        } => commands::update::run(source, target, max_steps, until_latest).await,
        Commands::Status { source } => commands::status::run(source).await,
        Commands::Publish { command } => commands::publish::run(&command).await,
    }
}
