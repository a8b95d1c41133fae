//! Update job definitions
//!
//! An [`UpdateJob`] asks the runner to move one source to a target version;
//! an [`UpdateReport`] records how that went.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apply::WalkReport;
use crate::error::ReleaseError;
use crate::resolver::LATEST;

/// Update job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJob {
    /// Source to update
    pub source: String,
    /// Requested version, `"latest"` for the newest release
    pub target: String,
    /// Overrides the applier's step limit
    pub max_steps: Option<usize>,
    /// Keep resolving and applying until nothing newer is published
    pub until_latest: bool,
    /// Timestamp when job was created
    pub created_at: DateTime<Utc>,
}

impl UpdateJob {
    /// Create a job that moves `source` to the latest release
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: LATEST.to_string(),
            max_steps: None,
            until_latest: false,
            created_at: Utc::now(),
        }
    }

    /// Target a specific version
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn until_latest(mut self) -> Self {
        self.target = LATEST.to_string();
        self.until_latest = true;
        self
    }
}

/// Outcome of one update job
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub source: String,
    pub target: String,
    pub start_version: Option<String>,
    /// Last successfully advanced version
    pub final_version: Option<String>,
    pub steps_applied: usize,
    pub cycles: usize,
    pub attempts: u32,
    /// `ReleaseError::kind()` of the terminal failure
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl UpdateReport {
    pub fn new(job: &UpdateJob, start_version: Option<String>) -> Self {
        Self {
            source: job.source.clone(),
            target: job.target.clone(),
            final_version: start_version.clone(),
            start_version,
            steps_applied: 0,
            cycles: 0,
            attempts: 0,
            error_kind: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_secs: 0.0,
        }
    }

    /// Fold one walk into the totals
    pub fn record_walk(&mut self, walk: &WalkReport) {
        self.cycles += 1;
        self.steps_applied += walk.steps_applied();
        if walk.final_version.is_some() {
            self.final_version = walk.final_version.clone();
        }
    }

    /// Reconcile with the number of advances made since the job started.
    ///
    /// A walk that fails partway returns no [`WalkReport`]; its advanced
    /// steps count here, along with the cycle they belong to.
    pub fn record_advances(&mut self, advanced: usize) {
        if advanced > self.steps_applied {
            self.steps_applied = advanced;
            self.cycles += 1;
        }
    }

    pub fn fail(&mut self, error: &ReleaseError) {
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
    }

    /// Mark report as completed
    pub fn complete(&mut self) {
        let end = Utc::now();
        self.completed_at = Some(end);
        self.duration_secs = (end - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    pub fn succeeded(&self) -> bool {
        self.error_kind.is_none()
    }
}
