//! Update scheduling
//!
//! [`UpdateRunner`] executes one [`UpdateJob`]: a fresh resolve and apply,
//! retried as a whole after `retry_delay` when the failure is retryable.
//! [`UpdateScheduler`] fires the runner for each configured source on its
//! cron schedule. A source's runs never overlap; different sources run
//! concurrently.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use cron::Schedule;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::apply::{UpdateApplier, WalkReport};
use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CYCLES, DEFAULT_RETRY_DELAY_SECS};
use crate::error::{ReleaseError, ReleaseResult};
use crate::jobs::{UpdateJob, UpdateReport};
use crate::registry::{CompatibilityMarkers, RegistryClient};
use crate::resolver::{self, Resolution};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_cycles: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

pub struct UpdateRunner {
    registry: RegistryClient,
    compat: CompatibilityMarkers,
    applier: Arc<UpdateApplier>,
    config: RunnerConfig,
}

impl UpdateRunner {
    pub fn new(
        registry: RegistryClient,
        compat: CompatibilityMarkers,
        applier: Arc<UpdateApplier>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            compat,
            applier,
            config,
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn compatibility(&self) -> &CompatibilityMarkers {
        &self.compat
    }

    pub fn applier(&self) -> &Arc<UpdateApplier> {
        &self.applier
    }

    fn max_steps(&self, job: &UpdateJob) -> usize {
        job.max_steps.unwrap_or(self.applier.config().max_steps)
    }

    /// One resolve/apply walk, no retries
    pub async fn run_once(&self, job: &UpdateJob, cancel: &CancellationToken) -> ReleaseResult<WalkReport> {
        self.applier
            .update(
                &self.registry,
                &self.compat,
                &job.source,
                &job.target,
                self.max_steps(job),
                cancel,
            )
            .await
    }

    /// Walk repeatedly until the newest release is installed.
    ///
    /// Releases published while walking are picked up by the next cycle.
    /// Fails with `CycleLimitExceeded` when still behind after `max_cycles`.
    pub async fn run_to_latest(
        &self,
        job: &UpdateJob,
        report: &mut UpdateReport,
        cancel: &CancellationToken,
    ) -> ReleaseResult<()> {
        let job = job.clone().until_latest();
        for _ in 0..self.config.max_cycles {
            let walk = self.run_once(&job, cancel).await?;
            report.record_walk(&walk);
            if walk.steps.is_empty() {
                return Ok(());
            }
        }

        if self.is_up_to_date(&job).await? {
            Ok(())
        } else {
            Err(ReleaseError::CycleLimitExceeded {
                limit: self.config.max_cycles,
            })
        }
    }

    /// Number of advances recorded for `source`
    async fn advances(&self, source: &str) -> Option<usize> {
        let record = self.applier.versions().record(source).await.ok()?;
        Some(record.history.len())
    }

    async fn is_up_to_date(&self, job: &UpdateJob) -> ReleaseResult<bool> {
        let current = self.applier.versions().current(&job.source).await?;
        let snapshot = self.registry.snapshot(&job.source).await?;
        let resolution = resolver::resolve(&snapshot, &self.compat, current.as_deref(), &job.target)?;
        Ok(matches!(resolution, Resolution::UpToDate { .. }))
    }

    /// Run `job` with retries and report the outcome
    #[instrument(skip(self, cancel), fields(source = %job.source, target = %job.target))]
    pub async fn run(&self, job: &UpdateJob, cancel: &CancellationToken) -> UpdateReport {
        let start = self.applier.versions().current(&job.source).await.ok().flatten();
        let baseline = self.advances(&job.source).await;
        let mut report = UpdateReport::new(job, start);

        loop {
            report.attempts += 1;
            let result = if job.until_latest {
                self.run_to_latest(job, &mut report, cancel).await
            } else {
                self.run_once(job, cancel)
                    .await
                    .map(|walk| report.record_walk(&walk))
            };

            let err = match result {
                Ok(()) => break,
                Err(e) => e,
            };

            if let Ok(current) = self.applier.versions().current(&job.source).await {
                report.final_version = current;
            }
            // Steps a failed walk advanced before stopping are only in the history
            if let (Some(before), Some(now)) = (baseline, self.advances(&job.source).await) {
                report.record_advances(now.saturating_sub(before));
            }

            if !err.is_retryable() || report.attempts >= self.config.max_attempts {
                error!(
                    kind = err.kind(),
                    attempts = report.attempts,
                    last_good = ?report.final_version,
                    error = %err,
                    "Update failed"
                );
                report.fail(&err);
                break;
            }

            warn!(
                kind = err.kind(),
                attempt = report.attempts,
                retry_in_secs = self.config.retry_delay.as_secs(),
                error = %err,
                "Update attempt failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {},
                _ = cancel.cancelled() => {
                    report.fail(&ReleaseError::Cancelled);
                    break;
                },
            }
        }

        report.complete();
        if report.succeeded() {
            info!(
                final_version = ?report.final_version,
                steps = report.steps_applied,
                attempts = report.attempts,
                "Update finished"
            );
        }
        report
    }
}

/// A source and the cron schedule it is updated on
#[derive(Debug, Clone)]
pub struct SourceSchedule {
    pub source: String,
    pub expression: String,
    pub schedule: Schedule,
}

impl SourceSchedule {
    /// Parse `source=<cron expression>`
    ///
    /// Expressions use the 6/7-field format with seconds, e.g.
    /// `mygene=0 0 2 * * *`.
    pub fn parse(entry: &str) -> Result<Self> {
        let (source, expression) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Schedule entry '{}' must look like source=<cron>", entry))?;
        let (source, expression) = (source.trim(), expression.trim());
        bdp_common::types::validate_build_version(source)
            .map_err(|e| anyhow!("Invalid source name in schedule '{}': {}", entry, e))?;
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("Invalid cron expression '{}' for {}", expression, source))?;

        Ok(Self {
            source: source.to_string(),
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Parse a `;`-separated list of entries
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Time until the next firing, `None` when the schedule has ended
    pub fn next_delay(&self) -> Option<Duration> {
        let next = self.schedule.upcoming(Utc).next()?;
        Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

pub struct UpdateScheduler {
    runner: Arc<UpdateRunner>,
    schedules: Vec<SourceSchedule>,
    target: String,
    cancel: CancellationToken,
}

impl UpdateScheduler {
    pub fn new(
        runner: Arc<UpdateRunner>,
        schedules: Vec<SourceSchedule>,
        target: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            schedules,
            target: target.into(),
            cancel,
        }
    }

    /// Start one task per source; the handle resolves after cancellation
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(sources = self.schedules.len(), "Update scheduler started");

            let mut tasks = JoinSet::new();
            for schedule in self.schedules {
                let runner = self.runner.clone();
                let cancel = self.cancel.clone();
                let job = UpdateJob::new(schedule.source.clone()).with_target(self.target.clone());
                tasks.spawn(run_source(runner, schedule, job, cancel));
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Source scheduler task failed: {}", e);
                }
            }

            info!("Update scheduler stopped");
        })
    }
}

async fn run_source(
    runner: Arc<UpdateRunner>,
    schedule: SourceSchedule,
    job: UpdateJob,
    cancel: CancellationToken,
) {
    info!(source = %schedule.source, cron = %schedule.expression, "Scheduled source updates");
    loop {
        let Some(delay) = schedule.next_delay() else {
            warn!(source = %schedule.source, "Schedule has no upcoming runs");
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {},
        }

        let report = runner.run(&job, &cancel).await;
        if !report.succeeded() && cancel.is_cancelled() {
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule_entries() {
        let schedules = SourceSchedule::parse_list("mygene=0 0 2 * * *; chembl = 0 30 * * * * ;").unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].source, "mygene");
        assert_eq!(schedules[1].source, "chembl");
        assert_eq!(schedules[1].expression, "0 30 * * * *");
        assert!(schedules[0].next_delay().is_some());
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(SourceSchedule::parse("mygene").is_err());
        assert!(SourceSchedule::parse("mygene=every day").is_err());
        assert!(SourceSchedule::parse("../x=0 0 2 * * *").is_err());
    }
}
