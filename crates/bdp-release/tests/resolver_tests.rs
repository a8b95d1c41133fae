//! Resolver scenarios against registry snapshots

mod common;

use bdp_release::registry::{CompatibilityMarkers, VersionRegistry};
use bdp_release::resolver::{resolve, Resolution, LATEST};
use bdp_release::ReleaseError;
use common::{compat, full, incr};

fn two_release_registry() -> VersionRegistry {
    VersionRegistry::from_descriptors([full("20240101"), incr("20240101", "20240115")])
}

fn versions(resolution: &Resolution) -> Vec<String> {
    resolution
        .path()
        .expect("expected a path")
        .iter()
        .map(|d| d.to_string())
        .collect()
}

#[test]
fn test_fresh_install_walks_back_to_full() {
    let registry = two_release_registry();
    let resolution = resolve(&registry, &compat(), None, "20240115").unwrap();
    assert_eq!(
        versions(&resolution),
        vec!["full@20240101", "incremental@20240101->20240115"]
    );
}

#[test]
fn test_installed_predecessor_takes_single_step() {
    let registry = two_release_registry();
    let resolution = resolve(&registry, &compat(), Some("20240101"), "20240115").unwrap();
    assert_eq!(versions(&resolution), vec!["incremental@20240101->20240115"]);
}

#[test]
fn test_already_installed_needs_no_update() {
    let registry = two_release_registry();
    let resolution = resolve(&registry, &compat(), Some("20240115"), "20240115").unwrap();
    assert_eq!(
        resolution,
        Resolution::UpToDate {
            version: "20240115".into()
        }
    );
}

#[test]
fn test_incompatible_target_is_reported_distinctly() {
    let registry = two_release_registry();
    let caller = CompatibilityMarkers::new("4.0", "1.1", "es8");
    let err = resolve(&registry, &caller, Some("20240101"), "20240115").unwrap_err();
    match err {
        ReleaseError::IncompatibleRelease {
            marker, expected, found, ..
        } => {
            assert_eq!(marker, "app_version");
            assert_eq!(expected, "4.0");
            assert_eq!(found.as_deref(), Some("3.2"));
        },
        other => panic!("expected IncompatibleRelease, got {other:?}"),
    }
}

#[test]
fn test_latest_alias_and_empty_registry() {
    let registry = two_release_registry();
    let resolution = resolve(&registry, &compat(), Some("20240101"), LATEST).unwrap();
    assert_eq!(resolution.path().unwrap().final_version(), Some("20240115"));

    let err = resolve(&VersionRegistry::new(), &compat(), None, LATEST).unwrap_err();
    assert!(matches!(err, ReleaseError::NoPathFound { .. }));
}

#[test]
fn test_unknown_target_is_no_path() {
    let err = resolve(&two_release_registry(), &compat(), None, "20990101").unwrap_err();
    assert!(matches!(err, ReleaseError::NoPathFound { ref reason, .. } if reason.contains("20990101")));
}

#[test]
fn test_long_chain_prefers_incrementals() {
    let registry = VersionRegistry::from_descriptors([
        full("20240101"),
        incr("20240101", "20240115"),
        incr("20240115", "20240201"),
        full("20240201"),
        incr("20240201", "20240215"),
    ]);

    // The incremental into 20240201 beats the full release of it
    let resolution = resolve(&registry, &compat(), Some("20240101"), LATEST).unwrap();
    assert_eq!(
        versions(&resolution),
        vec![
            "incremental@20240101->20240115",
            "incremental@20240115->20240201",
            "incremental@20240201->20240215",
        ]
    );

    let fresh = resolve(&registry, &compat(), None, LATEST).unwrap();
    assert_eq!(versions(&fresh)[0], "full@20240101");
    assert_eq!(fresh.path().unwrap().len(), 4);
}

#[test]
fn test_full_release_reached_when_incrementals_break() {
    let registry = VersionRegistry::from_descriptors([
        incr("20231201", "20240115"),
        full("20240201"),
        incr("20240201", "20240215"),
    ]);

    let resolution = resolve(&registry, &compat(), Some("20240115"), LATEST).unwrap();
    assert_eq!(
        versions(&resolution),
        vec!["full@20240201", "incremental@20240201->20240215"]
    );
}

#[test]
fn test_unrelated_install_without_full_release_has_no_path() {
    let registry = VersionRegistry::from_descriptors([incr("20240101", "20240115")]);
    let err = resolve(&registry, &compat(), Some("20231201"), "20240115").unwrap_err();
    assert!(matches!(err, ReleaseError::NoPathFound { .. }));
}

#[test]
fn test_resolved_paths_are_valid_and_repeatable() {
    let registry = VersionRegistry::from_descriptors([
        full("20240101"),
        incr("20240101", "20240115"),
        incr("20240115", "20240201"),
        incr("20240201", "20240215"),
    ]);

    for current in [None, Some("20240101"), Some("20240115"), Some("20240201")] {
        let first = resolve(&registry, &compat(), current, LATEST).unwrap();
        let second = resolve(&registry, &compat(), current, LATEST).unwrap();
        assert_eq!(first, second);

        let path = first.path().unwrap();
        assert!(path.is_valid_from(current), "invalid path {} from {:?}", path, current);
        assert_eq!(path.final_version(), Some("20240215"));
        assert!(path
            .iter()
            .all(|d| d.require_version.as_deref() != Some(d.target_version.as_str())));
    }
}
