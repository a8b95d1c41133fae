//! Registry data model
//!
//! These types are serialized verbatim into the object store:
//! `versions.json` holds a [`VersionRegistry`], each `<build_version>.json`
//! holds one [`ReleaseDescriptor`].

use bdp_common::types::validate_build_version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, ReleaseResult};

/// Version of the `versions.json` document layout
pub const REGISTRY_FORMAT: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Applicable with nothing installed
    Full,
    /// Applicable only on top of `require_version`
    Incremental,
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseType::Full => f.write_str("full"),
            ReleaseType::Incremental => f.write_str("incremental"),
        }
    }
}

/// Software markers a release was built with.
///
/// A consumer declares its own markers; every marker it declares must match
/// the release exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityMarkers {
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub framework_version: Option<String>,
    #[serde(default)]
    pub backend_flavor_version: Option<String>,
}

impl CompatibilityMarkers {
    pub fn new(
        app_version: impl Into<String>,
        framework_version: impl Into<String>,
        backend_flavor_version: impl Into<String>,
    ) -> Self {
        Self {
            app_version: Some(app_version.into()),
            framework_version: Some(framework_version.into()),
            backend_flavor_version: Some(backend_flavor_version.into()),
        }
    }

    fn pairs<'a>(&'a self, other: &'a Self) -> [(&'static str, &'a Option<String>, &'a Option<String>); 3] {
        [
            ("app_version", &self.app_version, &other.app_version),
            ("framework_version", &self.framework_version, &other.framework_version),
            (
                "backend_flavor_version",
                &self.backend_flavor_version,
                &other.backend_flavor_version,
            ),
        ]
    }

    /// Check that `release` can be applied by a consumer holding `self`.
    pub fn check(&self, release: &ReleaseDescriptor) -> ReleaseResult<()> {
        for (marker, ours, theirs) in self.pairs(&release.compatibility) {
            if let Some(expected) = ours {
                if theirs.as_deref() != Some(expected.as_str()) {
                    return Err(ReleaseError::IncompatibleRelease {
                        build_version: release.build_version.clone(),
                        marker,
                        expected: expected.clone(),
                        found: theirs.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn accepts(&self, release: &ReleaseDescriptor) -> bool {
        self.check(release).is_ok()
    }
}

/// Pointers to the release note files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChanges {
    pub txt: String,
    pub json: String,
}

/// Registry key of the incremental release `require_version -> target_version`.
///
/// The target comes first so that every release landing on a version sorts
/// right after that version's full release, and the last registry entry
/// always carries the newest `target_version`.
pub fn incremental_key(require_version: &str, target_version: &str) -> String {
    format!("{}.{}", target_version, require_version)
}

/// One available release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub build_version: String,
    #[serde(rename = "type")]
    pub release_type: ReleaseType,
    pub target_version: String,
    #[serde(default)]
    pub require_version: Option<String>,
    pub release_date: DateTime<Utc>,
    #[serde(flatten)]
    pub compatibility: CompatibilityMarkers,
    /// Archive URL, snapshot reference, or diff manifest URL
    pub artifact_ref: String,
    /// MD5 of the archive for file-backed full releases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ReleaseChanges>,
}

impl ReleaseDescriptor {
    pub fn full(
        build_version: impl Into<String>,
        artifact_ref: impl Into<String>,
        compatibility: CompatibilityMarkers,
    ) -> Self {
        let build_version = build_version.into();
        Self {
            target_version: build_version.clone(),
            build_version,
            release_type: ReleaseType::Full,
            require_version: None,
            release_date: Utc::now(),
            compatibility,
            artifact_ref: artifact_ref.into(),
            artifact_md5: None,
            changes: None,
        }
    }

    pub fn incremental(
        require_version: impl Into<String>,
        target_version: impl Into<String>,
        artifact_ref: impl Into<String>,
        compatibility: CompatibilityMarkers,
    ) -> Self {
        let require_version: String = require_version.into();
        let target_version: String = target_version.into();
        Self {
            build_version: incremental_key(&require_version, &target_version),
            target_version,
            release_type: ReleaseType::Incremental,
            require_version: Some(require_version),
            release_date: Utc::now(),
            compatibility,
            artifact_ref: artifact_ref.into(),
            artifact_md5: None,
            changes: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.release_type == ReleaseType::Full
    }

    pub fn is_incremental(&self) -> bool {
        self.release_type == ReleaseType::Incremental
    }

    /// True when `self` can be applied directly after `previous`
    pub fn follows(&self, previous: &ReleaseDescriptor) -> bool {
        self.require_version.as_deref() == Some(previous.target_version.as_str())
    }

    /// Structural validation applied at publish time and on registry load
    pub fn validate(&self) -> ReleaseResult<()> {
        validate_build_version(&self.build_version)
            .map_err(|e| ReleaseError::InvalidRelease(format!("build_version: {}", e)))?;
        validate_build_version(&self.target_version)
            .map_err(|e| ReleaseError::InvalidRelease(format!("target_version: {}", e)))?;

        match (self.release_type, &self.require_version) {
            (ReleaseType::Incremental, None) => Err(ReleaseError::InvalidRelease(format!(
                "incremental release {} has no require_version",
                self.build_version
            ))),
            (ReleaseType::Full, Some(_)) => Err(ReleaseError::InvalidRelease(format!(
                "full release {} must not declare require_version",
                self.build_version
            ))),
            (ReleaseType::Incremental, Some(required)) if *required == self.target_version => {
                Err(ReleaseError::SelfReferentialRelease {
                    version: self.target_version.clone(),
                })
            },
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for ReleaseDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.require_version {
            Some(required) => write!(
                f,
                "{}@{}->{}",
                self.release_type, required, self.target_version
            ),
            None => write!(f, "{}@{}", self.release_type, self.target_version),
        }
    }
}

/// The `versions.json` document for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRegistry {
    pub format: String,
    pub versions: Vec<ReleaseDescriptor>,
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self {
            format: REGISTRY_FORMAT.to_string(),
            versions: Vec::new(),
        }
    }
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and normalize a `versions.json` document
    pub fn from_slice(data: &[u8]) -> ReleaseResult<Self> {
        let mut registry: VersionRegistry = serde_json::from_slice(data)?;
        if registry.format.split('.').next() != Some("1") {
            return Err(ReleaseError::InvalidRelease(format!(
                "unsupported registry format {}",
                registry.format
            )));
        }
        registry.normalize();
        Ok(registry)
    }

    pub fn to_vec(&self) -> ReleaseResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ReleaseDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.upsert(descriptor);
        }
        registry
    }

    // Sorted by build_version, last write wins for duplicate keys.
    fn normalize(&mut self) {
        let mut seen = std::collections::BTreeMap::new();
        for descriptor in self.versions.drain(..) {
            seen.insert(descriptor.build_version.clone(), descriptor);
        }
        self.versions = seen.into_values().collect();
    }

    /// Append or replace by `build_version`, keeping the list sorted
    pub fn upsert(&mut self, descriptor: ReleaseDescriptor) {
        match self
            .versions
            .binary_search_by(|d| d.build_version.as_str().cmp(&descriptor.build_version))
        {
            Ok(index) => self.versions[index] = descriptor,
            Err(index) => self.versions.insert(index, descriptor),
        }
    }

    pub fn get(&self, build_version: &str) -> Option<&ReleaseDescriptor> {
        self.versions
            .binary_search_by(|d| d.build_version.as_str().cmp(build_version))
            .ok()
            .map(|index| &self.versions[index])
    }

    /// The last entry, which is the chain head
    pub fn latest(&self) -> Option<&ReleaseDescriptor> {
        self.versions.last()
    }

    /// Releases whose application yields `version`
    pub fn reaching<'a>(&'a self, version: &'a str) -> impl Iterator<Item = &'a ReleaseDescriptor> + 'a {
        self.versions.iter().filter(move |d| d.target_version == version)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn markers() -> CompatibilityMarkers {
        CompatibilityMarkers::new("0.10", "1.4", "es7")
    }

    #[test]
    fn test_descriptor_wire_format() {
        let d = ReleaseDescriptor::incremental("20240101", "20240115", "http://x/metadata.json", markers());
        let value = serde_json::to_value(&d).unwrap();

        assert_eq!(value["type"], "incremental");
        assert_eq!(value["require_version"], "20240101");
        assert_eq!(value["target_version"], "20240115");
        assert_eq!(value["app_version"], "0.10");
        assert_eq!(value["backend_flavor_version"], "es7");
        assert!(value.get("changes").is_none());

        let full = ReleaseDescriptor::full("20240101", "snapshot://s1", CompatibilityMarkers::default());
        let value = serde_json::to_value(&full).unwrap();
        assert!(value["require_version"].is_null());
        assert!(value["app_version"].is_null());

        let back: ReleaseDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, full);
    }

    #[test]
    fn test_validate() {
        assert!(ReleaseDescriptor::full("20240101", "a", markers()).validate().is_ok());

        let looped = ReleaseDescriptor::incremental("20240115", "20240115", "a", markers());
        assert!(matches!(
            looped.validate(),
            Err(ReleaseError::SelfReferentialRelease { .. })
        ));

        let mut orphan = ReleaseDescriptor::incremental("20240101", "20240115", "a", markers());
        orphan.require_version = None;
        assert!(matches!(orphan.validate(), Err(ReleaseError::InvalidRelease(_))));

        let bad_key = ReleaseDescriptor::full("../x", "a", markers());
        assert!(bad_key.validate().is_err());
    }

    #[test]
    fn test_compatibility_check() {
        let release = ReleaseDescriptor::full("20240101", "a", markers());

        assert!(CompatibilityMarkers::default().accepts(&release));
        assert!(markers().accepts(&release));

        let newer_app = CompatibilityMarkers {
            app_version: Some("0.11".into()),
            ..CompatibilityMarkers::default()
        };
        match newer_app.check(&release) {
            Err(ReleaseError::IncompatibleRelease { marker, found, .. }) => {
                assert_eq!(marker, "app_version");
                assert_eq!(found.as_deref(), Some("0.10"));
            },
            other => panic!("unexpected: {:?}", other),
        }

        let unmarked = ReleaseDescriptor::full("20240101", "a", CompatibilityMarkers::default());
        assert!(!markers().accepts(&unmarked));
    }

    #[test]
    fn test_registry_upsert_keeps_order() {
        let mut registry = VersionRegistry::new();
        registry.upsert(ReleaseDescriptor::incremental("20240101", "20240115", "b", markers()));
        registry.upsert(ReleaseDescriptor::full("20240101", "a", markers()));
        registry.upsert(ReleaseDescriptor::incremental("20240101", "20240115", "b2", markers()));

        let keys: Vec<_> = registry.versions.iter().map(|d| d.build_version.as_str()).collect();
        assert_eq!(keys, vec!["20240101", "20240115.20240101"]);
        assert_eq!(registry.get("20240115.20240101").unwrap().artifact_ref, "b2");
        assert_eq!(registry.latest().unwrap().target_version, "20240115");
        assert_eq!(registry.reaching("20240101").count(), 1);
    }

    #[test]
    fn test_full_and_incremental_for_one_version_coexist() {
        let mut registry = VersionRegistry::new();
        registry.upsert(ReleaseDescriptor::full("20240101", "a", markers()));
        registry.upsert(ReleaseDescriptor::incremental("20240101", "20240115", "b", markers()));
        registry.upsert(ReleaseDescriptor::full("20240115", "c", markers()));
        registry.upsert(ReleaseDescriptor::incremental("20231201", "20240115", "d", markers()));

        let shown: Vec<_> = registry.versions.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            shown,
            vec![
                "full@20240101",
                "full@20240115",
                "incremental@20231201->20240115",
                "incremental@20240101->20240115",
            ]
        );
        assert_eq!(registry.reaching("20240115").count(), 3);
        assert_eq!(registry.get("20240115").unwrap().artifact_ref, "c");
        assert_eq!(incremental_key("20231201", "20240115"), "20240115.20231201");
    }

    #[test]
    fn test_registry_from_slice_sorts_and_checks_format() {
        let doc = serde_json::json!({
            "format": "1.0",
            "versions": [
                serde_json::to_value(ReleaseDescriptor::full("20240201", "b", markers())).unwrap(),
                serde_json::to_value(ReleaseDescriptor::full("20240101", "a", markers())).unwrap(),
            ]
        });
        let registry = VersionRegistry::from_slice(&serde_json::to_vec(&doc).unwrap()).unwrap();
        assert_eq!(registry.versions[0].build_version, "20240101");

        let future = br#"{"format": "2.0", "versions": []}"#;
        assert!(VersionRegistry::from_slice(future).is_err());
    }
}
