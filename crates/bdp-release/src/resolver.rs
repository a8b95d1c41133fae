//! Version graph resolver
//!
//! Computes the ordered list of releases that moves a consumer from its
//! installed version to a requested one. Releases form a graph where an
//! incremental release is an edge `require_version -> target_version` and a
//! full release is reachable from anywhere.
//!
//! # Algorithm
//!
//! 1. `"latest"` becomes the `target_version` of the last registry entry.
//! 2. Every release landing on the target version is a candidate; at least
//!    one must pass the compatibility check.
//! 3. If the target is already installed there is nothing to do.
//! 4. A full candidate is a one-step path. An incremental candidate whose
//!    `require_version` is installed is a one-step path.
//! 5. Otherwise the walk recurses to a compatible predecessor (a release
//!    whose `target_version` is the required version) and appends the
//!    candidate. Incremental releases are tried before full ones, newest
//!    `build_version` first; a release whose own walk dead-ends is skipped
//!    in favour of the next one.
//!
//! `build_version` strings are compared lexically, so they must be
//! zero-padded (e.g. `20240115`).
//!
//! The walk never revisits a release already on the chain it is expanding,
//! which bounds recursion depth by the registry size.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::error::{ReleaseError, ReleaseResult};
use crate::registry::{CompatibilityMarkers, ReleaseDescriptor, VersionRegistry};

/// Target alias for the newest release
pub const LATEST: &str = "latest";

/// Ordered releases, oldest step first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePath {
    steps: Vec<ReleaseDescriptor>,
}

impl ReleasePath {
    pub fn new(steps: Vec<ReleaseDescriptor>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ReleaseDescriptor] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<ReleaseDescriptor> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReleaseDescriptor> {
        self.steps.iter()
    }

    /// Version installed after the whole path is applied
    pub fn final_version(&self) -> Option<&str> {
        self.steps.last().map(|d| d.target_version.as_str())
    }

    /// Every adjacent pair chains and the first step applies on `current`.
    pub fn is_valid_from(&self, current: Option<&str>) -> bool {
        let Some(first) = self.steps.first() else {
            return false;
        };
        let starts = first.is_full() || (current.is_some() && first.require_version.as_deref() == current);
        starts && self.steps.windows(2).all(|pair| pair[1].follows(&pair[0]))
    }
}

impl<'a> IntoIterator for &'a ReleasePath {
    type Item = &'a ReleaseDescriptor;
    type IntoIter = std::slice::Iter<'a, ReleaseDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

impl std::fmt::Display for ReleasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.steps.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Outcome of a successful resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The requested version is already installed
    UpToDate { version: String },
    Path(ReleasePath),
}

impl Resolution {
    pub fn path(&self) -> Option<&ReleasePath> {
        match self {
            Resolution::Path(path) => Some(path),
            Resolution::UpToDate { .. } => None,
        }
    }
}

/// Map `"latest"` to the version installed by the newest release
pub fn resolve_target<'a>(registry: &'a VersionRegistry, target: &'a str) -> Option<&'a str> {
    if target == LATEST {
        registry.latest().map(|d| d.target_version.as_str())
    } else {
        Some(target)
    }
}

/// Resolve the release path from `current` to `target`.
///
/// `target` is a version (every release landing on it is a candidate), a
/// specific `build_version`, or [`LATEST`]. `current` is `None` when nothing
/// is installed.
pub fn resolve(
    registry: &VersionRegistry,
    compat: &CompatibilityMarkers,
    current: Option<&str>,
    target: &str,
) -> ReleaseResult<Resolution> {
    if registry.is_empty() {
        return Err(ReleaseError::no_path(current, target, "registry is empty"));
    }

    let target = resolve_target(registry, target)
        .ok_or_else(|| ReleaseError::no_path(current, target, "registry is empty"))?;

    let mut releases: Vec<&ReleaseDescriptor> = registry.reaching(target).collect();
    if releases.is_empty() {
        releases.extend(registry.get(target));
    }
    let Some(&first) = releases.first() else {
        return Err(ReleaseError::no_path(
            current,
            target,
            format!("release {} is not registered", target),
        ));
    };
    let target_version = first.target_version.as_str();

    let usable: Vec<&ReleaseDescriptor> = releases
        .iter()
        .copied()
        .filter(|d| d.validate().is_ok() && compat.accepts(d))
        .collect();
    if usable.is_empty() {
        // Report why the preferred release is unusable
        let preferred = releases
            .iter()
            .copied()
            .min_by(|a, b| preference(a, b))
            .unwrap_or(first);
        preferred.validate()?;
        compat.check(preferred)?;
    }

    if current == Some(target_version) {
        debug!(version = %target_version, "Already at requested version");
        return Ok(Resolution::UpToDate {
            version: target_version.to_string(),
        });
    }

    let mut walk = Walk {
        registry,
        compat,
        current,
        chain: Vec::new(),
        dead_ends: HashSet::new(),
        pruned: 0,
    };
    let steps = match walk.first_path(usable) {
        Some(found) => found?,
        None => {
            return Err(ReleaseError::no_path(
                current,
                target_version,
                format!("no compatible release chain reaches {}", target_version),
            ))
        },
    };
    let path = ReleasePath::new(steps);

    debug!(
        from = current.unwrap_or("<none>"),
        to = %target_version,
        steps = path.len(),
        %path,
        "Resolved release path"
    );

    Ok(Resolution::Path(path))
}

/// Incremental first, then newest `build_version`
fn preference(a: &ReleaseDescriptor, b: &ReleaseDescriptor) -> std::cmp::Ordering {
    b.is_incremental()
        .cmp(&a.is_incremental())
        .then_with(|| b.build_version.cmp(&a.build_version))
}

struct Walk<'a> {
    registry: &'a VersionRegistry,
    compat: &'a CompatibilityMarkers,
    current: Option<&'a str>,
    /// Build versions being expanded, outermost first
    chain: Vec<&'a str>,
    /// Releases with no path to `current` whatever the chain
    dead_ends: HashSet<&'a str>,
    /// Candidates skipped so far because they were on the chain
    pruned: usize,
}

impl<'a> Walk<'a> {
    /// Expand `candidates` in preference order; the first that reaches
    /// `current` wins. `None` when every candidate dead-ends.
    fn first_path(
        &mut self,
        mut candidates: Vec<&'a ReleaseDescriptor>,
    ) -> Option<ReleaseResult<Vec<ReleaseDescriptor>>> {
        candidates.sort_by(|a, b| preference(a, b));

        for candidate in candidates {
            match self.expand(candidate) {
                Ok(steps) => return Some(Ok(steps)),
                Err(err @ ReleaseError::NoPathFound { .. }) | Err(err @ ReleaseError::InvalidRelease(_)) => {
                    trace!(candidate = %candidate, error = %err, "Candidate dead-ends");
                },
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    fn expand(&mut self, descriptor: &'a ReleaseDescriptor) -> ReleaseResult<Vec<ReleaseDescriptor>> {
        let required = match (&descriptor.require_version, descriptor.is_full()) {
            (_, true) => return Ok(vec![descriptor.clone()]),
            (Some(required), false) => required.as_str(),
            (None, false) => {
                return Err(ReleaseError::InvalidRelease(format!(
                    "incremental release {} has no require_version",
                    descriptor.build_version
                )))
            },
        };

        if self.current == Some(required) {
            return Ok(vec![descriptor.clone()]);
        }

        if self.chain.len() >= self.registry.len() {
            self.pruned += 1;
            return Err(ReleaseError::no_path(
                self.current,
                &descriptor.target_version,
                "walk exceeded registry size",
            ));
        }

        self.chain.push(&descriptor.build_version);
        let result = self.expand_predecessors(descriptor, required);
        self.chain.pop();
        result
    }

    fn expand_predecessors(
        &mut self,
        descriptor: &'a ReleaseDescriptor,
        required: &'a str,
    ) -> ReleaseResult<Vec<ReleaseDescriptor>> {
        let pruned_before = self.pruned;
        let mut candidates: Vec<&'a ReleaseDescriptor> = Vec::new();

        for candidate in self.registry.reaching(required) {
            if self.chain.contains(&candidate.build_version.as_str()) {
                self.pruned += 1;
                continue;
            }
            if self.dead_ends.contains(candidate.build_version.as_str()) {
                continue;
            }
            if candidate.validate().is_err() || !self.compat.accepts(candidate) {
                trace!(candidate = %candidate, "Skipping unusable predecessor");
                continue;
            }
            candidates.push(candidate);
        }

        if let Some(found) = self.first_path(candidates) {
            let mut steps = found?;
            steps.push(descriptor.clone());
            return Ok(steps);
        }

        // A failure that hit the chain anywhere below may succeed from
        // another chain, so only chain-free failures are remembered.
        if self.pruned == pruned_before {
            self.dead_ends.insert(&descriptor.build_version);
        }

        Err(ReleaseError::no_path(
            self.current,
            &descriptor.target_version,
            format!(
                "no compatible predecessor reaches {} (required by {})",
                required, descriptor.build_version
            ),
        ))
    }
}
