//! Update applier
//!
//! Walks a resolved [`ReleasePath`] one step at a time:
//!
//! ```text
//! Idle -> Resolving -> Downloading -> Verifying -> Applying -> Advanced -> (Downloading | Done)
//!                  \-> Done (already up to date)
//! Downloading | Verifying | Applying -> Failed
//! ```
//!
//! A step's version advance is recorded in the [`VersionStore`] before the
//! next step starts, so a failure leaves the consumer at the last advanced
//! version. Steps are never retried here; the scheduler retries whole walks.
//!
//! Cancellation is honoured up to the end of a step's download. Each phase
//! runs as its own task under its own time budget.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{
    DEFAULT_APPLY_TIMEOUT_SECS, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_STEPS,
    DEFAULT_VERIFY_TIMEOUT_SECS, DEFAULT_WORK_DIR,
};
use crate::error::{ReleaseError, ReleaseResult};
use crate::publish::diff::check_file_name;
use crate::publish::{DiffManifest, MANIFEST_FILE};
use crate::registry::{CompatibilityMarkers, RegistryClient, ReleaseDescriptor};
use crate::resolver::{self, ReleasePath, Resolution};
use crate::state::VersionStore;

pub mod backend;
pub mod download;
pub mod verify;

pub use backend::{ApplyBackend, FilesystemBackend, LocalArtifact, Payload};
pub use download::{Downloader, FetchReport, UrlDownloader};
pub use verify::{ChecksumVerifier, Md5Verifier};

#[derive(Debug, Clone)]
pub struct ApplierConfig {
    pub max_steps: usize,
    pub download_timeout: Duration,
    pub verify_timeout: Duration,
    pub apply_timeout: Duration,
    /// Per-step downloads land in `<work_dir>/<source>/<build_version>/`
    pub work_dir: PathBuf,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            apply_timeout: Duration::from_secs(DEFAULT_APPLY_TIMEOUT_SECS),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    Idle,
    Resolving,
    Downloading,
    Verifying,
    Applying,
    Advanced,
    Done,
    Failed,
}

impl WalkState {
    pub fn can_transition_to(self, next: WalkState) -> bool {
        use WalkState::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Idle, Downloading)
                | (Resolving, Downloading)
                | (Resolving, Done)
                | (Downloading, Verifying)
                | (Verifying, Applying)
                | (Applying, Advanced)
                | (Advanced, Downloading)
                | (Advanced, Done)
                | (Downloading, Failed)
                | (Verifying, Failed)
                | (Applying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WalkState::Done | WalkState::Failed)
    }
}

impl std::fmt::Display for WalkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WalkState::Idle => "idle",
            WalkState::Resolving => "resolving",
            WalkState::Downloading => "downloading",
            WalkState::Verifying => "verifying",
            WalkState::Applying => "applying",
            WalkState::Advanced => "advanced",
            WalkState::Done => "done",
            WalkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct WalkTracker {
    state: WalkState,
}

impl WalkTracker {
    fn new() -> Self {
        Self {
            state: WalkState::Idle,
        }
    }

    fn enter(&mut self, next: WalkState) -> ReleaseResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ReleaseError::Internal(format!(
                "invalid walk transition {} -> {}",
                self.state, next
            )));
        }
        debug!(from = %self.state, to = %next, "Walk state");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` when the current phase allows it
    fn fail(&mut self) {
        if self.state.can_transition_to(WalkState::Failed) {
            self.state = WalkState::Failed;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub build_version: String,
    pub release: String,
    pub from: Option<String>,
    pub to: String,
    pub bytes_downloaded: u64,
    pub download_ms: u64,
    pub verify_ms: u64,
    pub apply_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub source: String,
    pub start_version: Option<String>,
    pub final_version: Option<String>,
    pub steps: Vec<StepReport>,
    pub state: WalkState,
}

impl WalkReport {
    pub fn steps_applied(&self) -> usize {
        self.steps.len()
    }
}

/// A downloaded step waiting for verification
struct Staged {
    artifact: LocalArtifact,
    /// (file, expected md5)
    checks: Vec<(PathBuf, String)>,
    bytes: u64,
}

pub struct UpdateApplier {
    downloader: Arc<dyn Downloader>,
    verifier: Arc<dyn ChecksumVerifier>,
    backend: Arc<dyn ApplyBackend>,
    versions: Arc<dyn VersionStore>,
    config: ApplierConfig,
}

impl UpdateApplier {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        verifier: Arc<dyn ChecksumVerifier>,
        backend: Arc<dyn ApplyBackend>,
        versions: Arc<dyn VersionStore>,
        config: ApplierConfig,
    ) -> Self {
        Self {
            downloader,
            verifier,
            backend,
            versions,
            config,
        }
    }

    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    pub fn versions(&self) -> &Arc<dyn VersionStore> {
        &self.versions
    }

    /// Resolve `target` against a fresh registry snapshot and apply the path
    #[instrument(skip(self, registry, compat, cancel))]
    pub async fn update(
        &self,
        registry: &RegistryClient,
        compat: &CompatibilityMarkers,
        source: &str,
        target: &str,
        max_steps: usize,
        cancel: &CancellationToken,
    ) -> ReleaseResult<WalkReport> {
        let mut tracker = WalkTracker::new();
        tracker.enter(WalkState::Resolving)?;

        let current = self.versions.current(source).await?;
        let snapshot = registry.snapshot(source).await?;
        match resolver::resolve(&snapshot, compat, current.as_deref(), target)? {
            Resolution::UpToDate { version } => {
                tracker.enter(WalkState::Done)?;
                info!(%version, "Already up to date");
                Ok(WalkReport {
                    source: source.to_string(),
                    start_version: current,
                    final_version: Some(version),
                    steps: Vec::new(),
                    state: tracker.state,
                })
            },
            Resolution::Path(path) => {
                self.walk(tracker, source, &path, current.as_deref(), max_steps, cancel)
                    .await
            },
        }
    }

    /// Apply `path` starting from `current`.
    ///
    /// `current` must be the version tracked for `source`. Fails with
    /// `CycleLimitExceeded` when the path is longer than `max_steps`.
    #[instrument(skip(self, path, cancel), fields(steps = path.len()))]
    pub async fn apply_path(
        &self,
        source: &str,
        path: &ReleasePath,
        current: Option<&str>,
        max_steps: usize,
        cancel: &CancellationToken,
    ) -> ReleaseResult<WalkReport> {
        self.walk(WalkTracker::new(), source, path, current, max_steps, cancel)
            .await
    }

    async fn walk(
        &self,
        mut tracker: WalkTracker,
        source: &str,
        path: &ReleasePath,
        current: Option<&str>,
        max_steps: usize,
        cancel: &CancellationToken,
    ) -> ReleaseResult<WalkReport> {
        if path.len() > max_steps {
            return Err(ReleaseError::CycleLimitExceeded { limit: max_steps });
        }

        let tracked = self.versions.current(source).await?;
        if tracked.as_deref() != current {
            return Err(ReleaseError::VersionState {
                source_name: source.to_string(),
                expected: current.map(str::to_string),
                found: tracked,
            });
        }

        if !path.is_valid_from(current) {
            let first = path.steps().first();
            return Err(ReleaseError::PredecessorMismatch {
                build_version: first.map(|d| d.build_version.clone()).unwrap_or_default(),
                required: first
                    .and_then(|d| d.require_version.clone())
                    .unwrap_or_else(|| "a chained path".to_string()),
                installed: current.map(str::to_string),
            });
        }

        let mut report = WalkReport {
            source: source.to_string(),
            start_version: current.map(str::to_string),
            final_version: current.map(str::to_string),
            steps: Vec::with_capacity(path.len()),
            state: tracker.state,
        };

        for descriptor in path {
            let from = report.final_version.clone();
            match self
                .run_step(&mut tracker, source, descriptor, from.as_deref(), cancel)
                .await
            {
                Ok(step) => {
                    report.final_version = Some(step.to.clone());
                    report.steps.push(step);
                },
                Err(e) => {
                    tracker.fail();
                    warn!(
                        release = %descriptor,
                        state = %tracker.state,
                        last_good = ?report.final_version,
                        error = %e,
                        "Update walk aborted"
                    );
                    return Err(e);
                },
            }
        }

        tracker.enter(WalkState::Done)?;
        report.state = tracker.state;
        info!(
            final_version = ?report.final_version,
            steps = report.steps.len(),
            "Update walk complete"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(build_version = %descriptor.build_version))]
    async fn run_step(
        &self,
        tracker: &mut WalkTracker,
        source: &str,
        descriptor: &ReleaseDescriptor,
        from: Option<&str>,
        cancel: &CancellationToken,
    ) -> ReleaseResult<StepReport> {
        if cancel.is_cancelled() {
            return Err(ReleaseError::Cancelled);
        }
        if descriptor.is_incremental() && descriptor.require_version.as_deref() != from {
            return Err(ReleaseError::PredecessorMismatch {
                build_version: descriptor.build_version.clone(),
                required: descriptor.require_version.clone().unwrap_or_default(),
                installed: from.map(str::to_string),
            });
        }

        let step_dir = self
            .config
            .work_dir
            .join(source)
            .join(&descriptor.build_version);
        tokio::fs::create_dir_all(&step_dir).await?;

        tracker.enter(WalkState::Downloading)?;
        let started = Instant::now();
        let staged = timed(
            "download",
            self.config.download_timeout,
            Some(cancel),
            stage(self.downloader.clone(), descriptor.clone(), step_dir.clone()),
        )
        .await?;
        let download_ms = elapsed_ms(started);

        tracker.enter(WalkState::Verifying)?;
        let started = Instant::now();
        timed(
            "verify",
            self.config.verify_timeout,
            None,
            verify_all(self.verifier.clone(), staged.checks),
        )
        .await?;
        let verify_ms = elapsed_ms(started);

        tracker.enter(WalkState::Applying)?;
        let started = Instant::now();
        let backend = self.backend.clone();
        let (owned_source, artifact) = (source.to_string(), staged.artifact);
        timed("apply", self.config.apply_timeout, None, async move {
            backend
                .apply(&owned_source, &artifact)
                .await
                .map_err(ReleaseError::Apply)
        })
        .await?;
        let apply_ms = elapsed_ms(started);

        self.versions
            .advance(
                source,
                from,
                &descriptor.target_version,
                &descriptor.build_version,
            )
            .await?;
        tracker.enter(WalkState::Advanced)?;
        info!(release = %descriptor, "Advanced installed version");

        if let Err(e) = tokio::fs::remove_dir_all(&step_dir).await {
            warn!(dir = %step_dir.display(), error = %e, "Failed to clean step directory");
        }

        Ok(StepReport {
            build_version: descriptor.build_version.clone(),
            release: descriptor.to_string(),
            from: from.map(str::to_string),
            to: descriptor.target_version.clone(),
            bytes_downloaded: staged.bytes,
            download_ms,
            verify_ms,
            apply_ms,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Run one phase as its own task, aborting it when `limit` elapses or
/// `cancel` fires
async fn timed<T, F>(
    phase: &'static str,
    limit: Duration,
    cancel: Option<&CancellationToken>,
    fut: F,
) -> ReleaseResult<T>
where
    T: Send + 'static,
    F: Future<Output = ReleaseResult<T>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    let abort = handle.abort_handle();
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        joined = tokio::time::timeout(limit, handle) => match joined {
            Ok(joined) => {
                joined.map_err(|e| ReleaseError::Internal(format!("{} task failed: {}", phase, e)))?
            },
            Err(_) => {
                abort.abort();
                Err(ReleaseError::Timeout {
                    phase,
                    seconds: limit.as_secs(),
                })
            },
        },
        _ = cancelled => {
            abort.abort();
            Err(ReleaseError::Cancelled)
        },
    }
}

fn file_name_from_url(url: &str, fallback: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| check_file_name(name).is_ok())
        .unwrap_or_else(|| fallback.to_string())
}

/// Download everything a step needs into `step_dir`
async fn stage(
    downloader: Arc<dyn Downloader>,
    descriptor: ReleaseDescriptor,
    step_dir: PathBuf,
) -> ReleaseResult<Staged> {
    let fetch = |url: String, dest: PathBuf| {
        let downloader = downloader.clone();
        async move {
            downloader
                .fetch(&url, &dest)
                .await
                .map_err(ReleaseError::Download)
        }
    };

    if descriptor.is_full() {
        let Some(md5) = descriptor.artifact_md5.clone() else {
            let reference = descriptor.artifact_ref.clone();
            return Ok(Staged {
                artifact: LocalArtifact {
                    descriptor,
                    payload: Payload::Reference(reference),
                },
                checks: Vec::new(),
                bytes: 0,
            });
        };

        let name = file_name_from_url(&descriptor.artifact_ref, "artifact.tar.gz");
        let dest = step_dir.join(&name);
        let report = fetch(descriptor.artifact_ref.clone(), dest.clone()).await?;
        return Ok(Staged {
            artifact: LocalArtifact {
                descriptor,
                payload: Payload::Archive(dest.clone()),
            },
            checks: vec![(dest, md5)],
            bytes: report.size,
        });
    }

    let manifest_path = step_dir.join(MANIFEST_FILE);
    let mut bytes = fetch(descriptor.artifact_ref.clone(), manifest_path.clone())
        .await?
        .size;
    let manifest = DiffManifest::from_slice(&tokio::fs::read(&manifest_path).await?)?;
    check_manifest(&descriptor, &manifest)?;

    let base = Url::parse(&descriptor.artifact_ref)
        .map_err(|e| ReleaseError::InvalidRelease(format!("bad artifact_ref {}: {}", descriptor.artifact_ref, e)))?;
    let mut checks = Vec::with_capacity(manifest.diff.files.len());
    for file in manifest.payload_files() {
        check_file_name(&file.name)?;
        let url = base
            .join(&file.name)
            .map_err(|e| ReleaseError::InvalidRelease(format!("bad diff file url {}: {}", file.name, e)))?;
        let dest = step_dir.join(&file.name);
        bytes += fetch(url.to_string(), dest.clone()).await?.size;
        checks.push((dest, file.md5sum.clone()));
    }

    Ok(Staged {
        artifact: LocalArtifact {
            descriptor,
            payload: Payload::Diff {
                manifest,
                dir: step_dir,
            },
        },
        checks,
        bytes,
    })
}

fn check_manifest(descriptor: &ReleaseDescriptor, manifest: &DiffManifest) -> ReleaseResult<()> {
    let expected_old = descriptor.require_version.as_deref();
    if manifest.new.version != descriptor.target_version || Some(manifest.old.version.as_str()) != expected_old {
        return Err(ReleaseError::InvalidRelease(format!(
            "diff manifest covers {} -> {}, release is {}",
            manifest.old.version, manifest.new.version, descriptor
        )));
    }
    Ok(())
}

async fn verify_all(
    verifier: Arc<dyn ChecksumVerifier>,
    checks: Vec<(PathBuf, String)>,
) -> ReleaseResult<()> {
    for (path, expected) in checks {
        let file = display_name(&path);
        let ok = verifier
            .verify(&path, &expected)
            .await
            .map_err(|e| ReleaseError::Download(e.context(format!("Failed to verify {}", file))))?;
        if !ok {
            return Err(ReleaseError::ChecksumMismatch {
                file,
                expected,
                actual: None,
            });
        }
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
