//! Publisher integration tests on a local object store

mod common;

use bdp_release::publish::{DiffFile, PublishRequest, Publisher, RepositoryTarget};
use bdp_release::registry::ReleaseType;
use bdp_release::resolver::{resolve, LATEST};
use bdp_release::ReleaseError;
use common::{build_doc, compat, write_diff_set, TestEnv, SOURCE};

async fn publish_first_full(env: &TestEnv, publisher: &Publisher) {
    publisher
        .publish(PublishRequest::Full {
            build: build_doc("20240101", 100),
            repository: RepositoryTarget::Queryable {
                reference: "snapshot://mygene_20240101".into(),
            },
            previous: None,
        })
        .await
        .unwrap();
    assert_eq!(env.registry.snapshot(SOURCE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_incremental_publish_registers_last() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    publish_first_full(&env, &publisher).await;

    let mut diff = write_diff_set(
        &env.path("diff"),
        "20240101",
        "20240115",
        &[("genes_0.pyobj", b"added genes"), ("genes_1.pyobj", b"removed genes")],
    );
    diff.manifest.diff.files[1].md5sum.clear();
    diff.manifest.applied.insert("hub-1".into(), true);

    let descriptor = publisher
        .publish(PublishRequest::Incremental {
            old: build_doc("20240101", 100),
            new: build_doc("20240115", 120),
            diff,
        })
        .await
        .unwrap();

    assert_eq!(descriptor.release_type, ReleaseType::Incremental);
    assert_eq!(descriptor.require_version.as_deref(), Some("20240101"));
    assert_eq!(descriptor.build_version, "20240115.20240101");
    assert_eq!(descriptor.target_version, "20240115");
    assert!(descriptor.artifact_ref.ends_with("releases/mygene/20240115.20240101/metadata.json"));
    assert!(descriptor.changes.is_some());

    let registry = env.registry.snapshot(SOURCE).await.unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        env.registry.latest(SOURCE).await.unwrap().as_deref(),
        Some("20240115.20240101")
    );
    assert_eq!(
        env.registry.fetch_descriptor(SOURCE, "20240115.20240101").await.unwrap(),
        Some(descriptor)
    );

    let release_dir = env.path("store/releases/mygene/20240115.20240101");
    assert!(release_dir.join("genes_0.pyobj").is_file());
    assert!(release_dir.join("release_20240115.txt").is_file());
    assert!(release_dir.join("release_20240115.json").is_file());

    // Uploaded manifest has every checksum filled and no applied markers
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(release_dir.join("metadata.json")).unwrap()).unwrap();
    assert!(manifest.get("applied").is_none());
    let files: Vec<DiffFile> = serde_json::from_value(manifest["diff"]["files"].clone()).unwrap();
    assert!(files.iter().all(|f| f.md5sum.len() == 32));
}

async fn publish_incremental(env: &TestEnv, publisher: &Publisher, dir: &str) {
    let diff = write_diff_set(
        &env.path(dir),
        "20240101",
        "20240115",
        &[("genes_0.pyobj", b"added genes")],
    );
    publisher
        .publish(PublishRequest::Incremental {
            old: build_doc("20240101", 100),
            new: build_doc("20240115", 120),
            diff,
        })
        .await
        .unwrap();
}

async fn publish_full(publisher: &Publisher, version: &str) {
    publisher
        .publish(PublishRequest::Full {
            build: build_doc(version, 120),
            repository: RepositoryTarget::Queryable {
                reference: format!("snapshot://mygene_{}", version),
            },
            previous: Some(build_doc("20240101", 100)),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_full_and_incremental_releases_of_one_version_coexist() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    publish_first_full(&env, &publisher).await;

    // Incremental first, then the full release of the same version
    publish_incremental(&env, &publisher, "diff").await;
    publish_full(&publisher, "20240115").await;

    let registry = env.registry.snapshot(SOURCE).await.unwrap();
    let shown: Vec<String> = registry.versions.iter().map(|d| d.to_string()).collect();
    assert_eq!(
        shown,
        vec!["full@20240101", "full@20240115", "incremental@20240101->20240115"]
    );

    // Both payloads survive side by side
    let releases = env.path("store/releases/mygene");
    assert!(releases.join("20240115.json").is_file());
    assert!(releases.join("20240115.20240101.json").is_file());
    assert!(releases.join("20240115/release_20240115.json").is_file());
    assert!(releases.join("20240115.20240101/genes_0.pyobj").is_file());
    assert!(releases.join("20240115.20240101/release_20240115.json").is_file());

    let upgrade = resolve(&registry, &compat(), Some("20240101"), "20240115").unwrap();
    let steps = upgrade.path().unwrap().steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].release_type, ReleaseType::Incremental);

    let fresh = resolve(&registry, &compat(), None, "20240115").unwrap();
    assert_eq!(fresh.path().unwrap().final_version(), Some("20240115"));
    assert!(fresh.path().unwrap().is_valid_from(None));

    let latest = resolve(&registry, &compat(), Some("20231201"), LATEST).unwrap();
    assert_eq!(latest.path().unwrap().final_version(), Some("20240115"));
}

#[tokio::test]
async fn test_incremental_published_after_full_keeps_the_full_release() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    publish_first_full(&env, &publisher).await;

    publish_full(&publisher, "20240115").await;
    publish_incremental(&env, &publisher, "diff").await;
    // Republishing replaces only its own entry
    publish_incremental(&env, &publisher, "diff-again").await;

    let registry = env.registry.snapshot(SOURCE).await.unwrap();
    assert_eq!(registry.len(), 3);
    let kinds: Vec<ReleaseType> = registry.reaching("20240115").map(|d| d.release_type).collect();
    assert_eq!(kinds, vec![ReleaseType::Full, ReleaseType::Incremental]);
    assert_eq!(
        env.registry.latest(SOURCE).await.unwrap().as_deref(),
        Some("20240115.20240101")
    );

    let upgrade = resolve(&registry, &compat(), Some("20240101"), LATEST).unwrap();
    assert_eq!(upgrade.path().unwrap().steps()[0].build_version, "20240115.20240101");
}

#[tokio::test]
async fn test_bad_checksum_leaves_registry_untouched() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    publish_first_full(&env, &publisher).await;

    let mut diff = write_diff_set(
        &env.path("diff"),
        "20240101",
        "20240115",
        &[("genes_0.pyobj", b"added genes")],
    );
    diff.manifest.diff.files[0].md5sum = "0".repeat(32);

    let err = publisher
        .publish(PublishRequest::Incremental {
            old: build_doc("20240101", 100),
            new: build_doc("20240115", 120),
            diff,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::ChecksumMismatch { ref file, .. } if file == "genes_0.pyobj"));

    let registry = env.registry.snapshot(SOURCE).await.unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.reaching("20240115").count(), 0);
    assert_eq!(env.registry.latest(SOURCE).await.unwrap().as_deref(), Some("20240101"));
    assert!(env
        .registry
        .fetch_descriptor(SOURCE, "20240115.20240101")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_self_referential_release_is_rejected() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    publish_first_full(&env, &publisher).await;

    let diff = write_diff_set(&env.path("diff"), "20240101", "20240101", &[("a.pyobj", b"x")]);
    let err = publisher
        .publish(PublishRequest::Incremental {
            old: build_doc("20240101", 100),
            new: build_doc("20240101", 100),
            diff,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ReleaseError::SelfReferentialRelease { ref version } if version == "20240101"));
    assert_eq!(env.registry.snapshot(SOURCE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manifest_must_cover_the_published_builds() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());

    let diff = write_diff_set(&env.path("diff"), "20231201", "20240115", &[("a.pyobj", b"x")]);
    let err = publisher
        .publish(PublishRequest::Incremental {
            old: build_doc("20240101", 100),
            new: build_doc("20240115", 120),
            diff,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::InvalidRelease(_)));
    assert!(env.registry.snapshot(SOURCE).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_publish_archives_file_backed_repository() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());

    let repo = env.path("repo");
    std::fs::create_dir_all(repo.join("index")).unwrap();
    std::fs::write(repo.join("index/genes.dat"), b"gene index").unwrap();

    let descriptor = publisher
        .publish(PublishRequest::Full {
            build: build_doc("20240201", 130),
            repository: RepositoryTarget::FileBacked { path: repo },
            previous: Some(build_doc("20240115", 120)),
        })
        .await
        .unwrap();

    assert!(descriptor.is_full());
    assert_eq!(descriptor.require_version, None);
    assert_eq!(descriptor.compatibility, compat());
    let md5 = descriptor.artifact_md5.clone().unwrap();
    assert!(descriptor.artifact_ref.starts_with("file://"));
    assert!(descriptor.artifact_ref.ends_with("mygene_20240201.tar.gz"));

    let archive = env.path("store/releases/mygene/20240201/mygene_20240201.tar.gz");
    let actual = bdp_common::checksum::compute_file_checksum(&archive, bdp_common::types::ChecksumAlgorithm::Md5)
        .unwrap();
    assert_eq!(actual, md5);

    // Release notes are written because a previous build was linked
    assert!(descriptor.changes.is_some());
    assert!(env
        .path("store/releases/mygene/20240201/release_20240201.json")
        .is_file());
}

#[tokio::test]
async fn test_diff_and_publish_requires_engine() {
    let env = TestEnv::new();
    let publisher = Publisher::new(env.registry.clone(), compat());
    let err = publisher
        .diff_and_publish(build_doc("20240101", 1), build_doc("20240115", 2), &env.path("work"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::Config(_)));
}
