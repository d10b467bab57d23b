// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use sealfleet_core::{
    BackupSummary, BundleIdentity, Digest, HostHealth, HostId, HostOutcome, HostRecord, JobKind,
    JobRecord, JobState, KeyId, SealError, StateStore, StoredArtifact, StrategyId,
};
use sealfleet_storage::SqliteStateStore;

async fn store() -> (tempfile::TempDir, SqliteStateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStateStore::open_path(dir.path().join("state.db"), true)
        .await
        .unwrap();
    (dir, store)
}

fn api() -> BundleIdentity {
    BundleIdentity::new("api").unwrap()
}

fn artifact(version: u64) -> StoredArtifact {
    let bytes = format!("artifact v{version}").into_bytes();
    StoredArtifact {
        identity: api(),
        version,
        checksum: Digest::sha256(&bytes),
        strategy: StrategyId::Local,
        key_id: KeyId::fingerprint(&[1u8; 32]),
        bytes,
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    }
}

fn job(id: &str, state: JobState, minute: u32) -> JobRecord {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap();
    let mut hosts = BTreeMap::new();
    hosts.insert(HostId::from("a"), HostOutcome::Delivered);
    hosts.insert(
        HostId::from("b"),
        HostOutcome::Skipped {
            reason: "unreachable".into(),
        },
    );
    let mut backups = BTreeMap::new();
    backups.insert(
        HostId::from("a"),
        BackupSummary {
            version: Some(1),
            checksum: None,
        },
    );
    JobRecord {
        id: id.into(),
        identity: api(),
        kind: JobKind::Update,
        state,
        previous_version: Some(1),
        target_version: Some(2),
        hosts,
        backups,
        error: None,
        created_at: at,
        updated_at: at,
    }
}

#[tokio::test]
async fn artifacts_are_write_once_and_listed_newest_first() {
    let (_dir, store) = store().await;
    store.put_artifact(&artifact(1)).await.unwrap();
    store.put_artifact(&artifact(2)).await.unwrap();
    assert!(store.put_artifact(&artifact(2)).await.is_err());

    let listed = store.list_artifacts(&api()).await.unwrap();
    assert_eq!(
        listed.iter().map(|a| a.version).collect::<Vec<_>>(),
        vec![2, 1]
    );
    assert_eq!(listed[1], artifact(1));
    assert_eq!(store.latest_version(&api()).await.unwrap(), Some(2));
    assert_eq!(store.list_identities().await.unwrap(), vec![api()]);
}

#[tokio::test]
async fn current_version_moves_only_to_stored_versions() {
    let (_dir, store) = store().await;
    assert_eq!(store.current_version(&api()).await.unwrap(), None);
    store.put_artifact(&artifact(1)).await.unwrap();
    store.set_current_version(&api(), 1).await.unwrap();
    assert_eq!(store.current_version(&api()).await.unwrap(), Some(1));

    let err = store.set_current_version(&api(), 9).await.unwrap_err();
    assert!(matches!(err, SealError::NotFound { .. }));
    assert_eq!(store.current_version(&api()).await.unwrap(), Some(1));
}

#[tokio::test]
async fn current_version_cannot_be_deleted() {
    let (_dir, store) = store().await;
    store.put_artifact(&artifact(1)).await.unwrap();
    store.put_artifact(&artifact(2)).await.unwrap();
    store.set_current_version(&api(), 2).await.unwrap();

    assert!(store.delete_artifact(&api(), 2).await.is_err());
    store.delete_artifact(&api(), 1).await.unwrap();
    assert!(store.get_artifact(&api(), 1).await.unwrap().is_none());
    assert!(matches!(
        store.delete_artifact(&api(), 1).await,
        Err(SealError::NotFound { .. })
    ));
}

#[tokio::test]
async fn jobs_round_trip_and_finished_jobs_are_frozen() {
    let (_dir, store) = store().await;
    store.save_job(&job("j1", JobState::Distributing, 0)).await.unwrap();
    store.save_job(&job("j1", JobState::Committed, 0)).await.unwrap();

    let loaded = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(loaded.state, JobState::Committed);
    assert_eq!(loaded.hosts.len(), 2);
    assert_eq!(loaded, job("j1", JobState::Committed, 0));

    let err = store
        .save_job(&job("j1", JobState::RolledBack, 0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already finished"));
    assert!(store.get_job("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn jobs_are_listed_newest_first() {
    let (_dir, store) = store().await;
    store.save_job(&job("old", JobState::Committed, 1)).await.unwrap();
    store.save_job(&job("new", JobState::RolledBack, 5)).await.unwrap();
    let ids: Vec<_> = store
        .list_jobs(&api())
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, vec!["new", "old"]);
}

#[tokio::test]
async fn host_records_upsert() {
    let (_dir, store) = store().await;
    let mut record = HostRecord {
        host: HostId::from("web-1"),
        identity: api(),
        last_version: Some(1),
        last_key_id: Some(KeyId::fingerprint(&[1u8; 32])),
        health: HostHealth::Healthy,
        updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
    };
    store.upsert_host(&record).await.unwrap();
    record.health = HostHealth::Degraded;
    record.last_version = None;
    store.upsert_host(&record).await.unwrap();

    let loaded = store
        .get_host(&HostId::from("web-1"), &api())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, record);
    assert_eq!(store.list_hosts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    {
        let store = SqliteStateStore::open_path(&path, true).await.unwrap();
        store.put_artifact(&artifact(1)).await.unwrap();
        store.set_current_version(&api(), 1).await.unwrap();
        store.database().close().await.unwrap();
    }
    let store = SqliteStateStore::open_path(&path, true).await.unwrap();
    assert_eq!(store.current_version(&api()).await.unwrap(), Some(1));
}

#[tokio::test]
async fn backup_is_a_usable_copy() {
    let (dir, store) = store().await;
    store.put_artifact(&artifact(1)).await.unwrap();
    store.set_current_version(&api(), 1).await.unwrap();

    let dest = dir.path().join("copy.db");
    store.database().backup_to(&dest).await.unwrap();

    let copy = SqliteStateStore::open_path(&dest, true).await.unwrap();
    assert_eq!(copy.current_version(&api()).await.unwrap(), Some(1));
    assert_eq!(
        copy.get_artifact(&api(), 1).await.unwrap().unwrap().bytes,
        b"artifact v1"
    );
}

#[tokio::test]
async fn identity_lock_is_shared_between_handles() {
    let (dir, first) = store().await;
    let second = SqliteStateStore::open_path(dir.path().join("state.db"), true)
        .await
        .unwrap();
    let lease = Utc::now() + chrono::Duration::seconds(60);

    assert!(first.acquire_identity_lock(&api(), "job-1", lease).await.unwrap());
    assert!(!second.acquire_identity_lock(&api(), "job-2", lease).await.unwrap());
    let other = BundleIdentity::new("web").unwrap();
    assert!(second.acquire_identity_lock(&other, "job-2", lease).await.unwrap());

    assert!(first.renew_identity_lock(&api(), "job-1", lease).await.unwrap());
    assert!(!second.renew_identity_lock(&api(), "job-2", lease).await.unwrap());

    // Only the holder can release.
    second.release_identity_lock(&api(), "job-2").await.unwrap();
    assert!(!second.acquire_identity_lock(&api(), "job-2", lease).await.unwrap());
    first.release_identity_lock(&api(), "job-1").await.unwrap();
    assert!(second.acquire_identity_lock(&api(), "job-2", lease).await.unwrap());
}

#[tokio::test]
async fn expired_identity_lock_is_taken_over() {
    let (_dir, store) = store().await;
    let expired = Utc::now() - chrono::Duration::seconds(1);
    assert!(store.acquire_identity_lock(&api(), "crashed", expired).await.unwrap());

    let lease = Utc::now() + chrono::Duration::seconds(60);
    assert!(store.acquire_identity_lock(&api(), "job-2", lease).await.unwrap());
    assert!(!store.renew_identity_lock(&api(), "crashed", lease).await.unwrap());
}
