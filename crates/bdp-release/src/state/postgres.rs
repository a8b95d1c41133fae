//! PostgreSQL version store
//!
//! Tables are created by the migrations in `crates/bdp-release/migrations`.
//! An advance locks the source row (`SELECT ... FOR UPDATE`), compares the
//! installed version and writes the new one together with a history row in
//! one transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{AdvanceRecord, VersionRecord, VersionStore};
use crate::config::DatabaseConfig;
use crate::error::{ReleaseError, ReleaseResult};

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    source: String,
    version: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    from_version: Option<String>,
    to_version: String,
    build_version: String,
    applied_at: DateTime<Utc>,
}

impl From<HistoryRow> for AdvanceRecord {
    fn from(row: HistoryRow) -> Self {
        Self {
            from: row.from_version,
            to: row.to_version,
            build_version: row.build_version,
            applied_at: row.applied_at,
        }
    }
}

#[derive(Clone)]
pub struct PgVersionStore {
    pool: PgPool,
}

impl PgVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> ReleaseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Version state pool created");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> ReleaseResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReleaseError::Database(e.into()))?;
        Ok(())
    }

    async fn history(&self, source: &str) -> ReleaseResult<Vec<AdvanceRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT from_version, to_version, build_version, applied_at
            FROM release_version_history
            WHERE source = $1
            ORDER BY applied_at, id
            "#,
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AdvanceRecord::from).collect())
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn current(&self, source: &str) -> ReleaseResult<Option<String>> {
        let version: Option<Option<String>> =
            sqlx::query_scalar("SELECT version FROM release_versions WHERE source = $1")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.flatten())
    }

    #[instrument(skip(self))]
    async fn advance(
        &self,
        source: &str,
        from: Option<&str>,
        to: &str,
        build_version: &str,
    ) -> ReleaseResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO release_versions (source, version, updated_at) VALUES ($1, NULL, NULL) ON CONFLICT (source) DO NOTHING",
        )
        .bind(source)
        .execute(&mut *tx)
        .await?;

        let installed: Option<String> =
            sqlx::query_scalar("SELECT version FROM release_versions WHERE source = $1 FOR UPDATE")
                .bind(source)
                .fetch_one(&mut *tx)
                .await?;

        if installed.as_deref() != from {
            tx.rollback().await?;
            return Err(ReleaseError::VersionState {
                source_name: source.to_string(),
                expected: from.map(str::to_string),
                found: installed,
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE release_versions SET version = $2, updated_at = $3 WHERE source = $1")
            .bind(source)
            .bind(to)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO release_version_history (id, source, from_version, to_version, build_version, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source)
        .bind(from)
        .bind(to)
        .bind(build_version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record(&self, source: &str) -> ReleaseResult<VersionRecord> {
        let row = sqlx::query_as::<_, VersionRow>(
            "SELECT source, version, updated_at FROM release_versions WHERE source = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(VersionRecord::empty(source));
        };
        Ok(VersionRecord {
            history: self.history(source).await?,
            source: row.source,
            version: row.version,
            updated_at: row.updated_at,
        })
    }

    async fn records(&self) -> ReleaseResult<Vec<VersionRecord>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            "SELECT source, version, updated_at FROM release_versions ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(VersionRecord {
                history: self.history(&row.source).await?,
                source: row.source,
                version: row.version,
                updated_at: row.updated_at,
            });
        }
        Ok(records)
    }
}
