//! BDP release daemon - runs scheduled dataset updates

use anyhow::Result;
use bdp_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bdp_release::{config::ReleaseConfig, context::ReleaseContext, scheduler::UpdateScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("bdp-release")
        .filter_directives("bdp_release=debug,sqlx=info,aws_config=warn")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    info!("Starting BDP release daemon");

    let config = ReleaseConfig::load()?;
    info!(
        storage = ?config.storage.backend,
        state = ?config.state.backend,
        sources = config.scheduler.schedules.len(),
        "Configuration loaded"
    );

    let context = ReleaseContext::from_config(config).await?;
    context.migrate().await?;

    let cancel = CancellationToken::new();
    let scheduler_handle = if context.config.scheduler.enabled {
        let scheduler = UpdateScheduler::new(
            context.runner.clone(),
            context.config.scheduler.schedules.clone(),
            context.config.scheduler.target.clone(),
            cancel.clone(),
        );
        Some(scheduler.start())
    } else {
        warn!("Scheduler is disabled (RELEASE_SCHEDULE_ENABLED=false), waiting for shutdown");
        None
    };

    shutdown_signal().await;
    cancel.cancel();

    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!("Scheduler task ended abnormally: {}", e);
        }
    }

    info!("Release daemon shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
