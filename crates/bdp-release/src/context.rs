//! Process-wide wiring
//!
//! Builds the object store, registry client, version store, applier and
//! runner once from a [`ReleaseConfig`]. The daemon and the CLI share it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::apply::{FilesystemBackend, Md5Verifier, UpdateApplier, UrlDownloader};
use crate::config::{ReleaseConfig, StateBackend};
use crate::publish::Publisher;
use crate::registry::RegistryClient;
use crate::scheduler::{RunnerConfig, UpdateRunner};
use crate::state::{FileVersionStore, PgVersionStore, VersionStore};
use crate::storage::{LocalStore, ObjectStore, S3Store, StorageBackend};

pub struct ReleaseContext {
    pub config: ReleaseConfig,
    pub registry: RegistryClient,
    pub versions: Arc<dyn VersionStore>,
    pub applier: Arc<UpdateApplier>,
    pub runner: Arc<UpdateRunner>,
    /// Set when the PostgreSQL state backend is selected
    pub pg_versions: Option<PgVersionStore>,
}

impl ReleaseContext {
    pub async fn from_config(config: ReleaseConfig) -> Result<Self> {
        let store = build_store(&config).await?;
        let registry = RegistryClient::new(store, config.registry_prefix.clone());

        let (versions, pg_versions): (Arc<dyn VersionStore>, Option<PgVersionStore>) =
            match config.state.backend {
                StateBackend::File => {
                    info!(path = %config.state.file.display(), "Using file version state");
                    (Arc::new(FileVersionStore::new(config.state.file.clone())), None)
                },
                StateBackend::Postgres => {
                    let pg = PgVersionStore::connect(&config.state.database)
                        .await
                        .context("Failed to connect version state database")?;
                    info!("Using PostgreSQL version state");
                    (Arc::new(pg.clone()), Some(pg))
                },
            };

        let applier = Arc::new(UpdateApplier::new(
            Arc::new(UrlDownloader::new()),
            Arc::new(Md5Verifier),
            Arc::new(FilesystemBackend::new(config.install_dir.clone())),
            versions.clone(),
            config.applier.clone(),
        ));

        let runner = Arc::new(UpdateRunner::new(
            registry.clone(),
            config.compatibility.clone(),
            applier.clone(),
            RunnerConfig {
                max_cycles: config.scheduler.max_cycles,
                max_attempts: config.scheduler.max_attempts,
                retry_delay: config.scheduler.retry_delay,
            },
        ));

        Ok(Self {
            config,
            registry,
            versions,
            applier,
            runner,
            pg_versions,
        })
    }

    /// Publisher stamping releases with this process's markers
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.registry.clone(), self.config.compatibility.clone())
    }

    /// Apply pending migrations when the PostgreSQL state backend is used
    pub async fn migrate(&self) -> Result<()> {
        if let Some(pg) = &self.pg_versions {
            pg.migrate().await.context("Failed to run migrations")?;
            info!("Database migrations completed");
        }
        Ok(())
    }
}

async fn build_store(config: &ReleaseConfig) -> Result<Arc<dyn ObjectStore>> {
    let storage = &config.storage;
    Ok(match storage.backend {
        StorageBackend::Local => {
            let mut store = LocalStore::new(storage.local_root.clone());
            if let Some(base) = &storage.public_base_url {
                store = store.with_base_url(base.clone());
            }
            info!(root = %storage.local_root.display(), "Local object store initialized");
            Arc::new(store)
        },
        StorageBackend::S3 => {
            let store = S3Store::new(storage.s3.clone(), storage.public_base_url.clone()).await?;
            info!(bucket = %store.bucket(), "S3 object store initialized");
            Arc::new(store)
        },
    })
}
