// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end rotation tests against in-memory fleets.
//!
//! Each test creates an isolated TestHarness with a temp SQLite store, an
//! in-memory key provider and mock hosts. Tests are independent and
//! order-insensitive.

use std::sync::Arc;
use std::time::Duration;

use sealfleet_core::{HostHealth, HostId, HostOutcome, JobState, SealError, StateStore};
use sealfleet_fleet::{Quorum, RotationPlan, RotationRequest};
use sealfleet_test_utils::TestHarness;
use tokio_util::sync::CancellationToken;

// ---- Happy path ----

#[tokio::test]
async fn test_create_then_update_commits_on_every_host() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");

    let created = h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    TestHarness::assert_state(&created, JobState::Committed);
    assert_eq!(h.current_version(&api).await, Some(1));

    let updated = h.update(&api, "DB_PASSWORD", "two").await.unwrap();
    TestHarness::assert_state(&updated, JobState::Committed);
    assert!(updated.committed());
    assert_eq!(updated.record.previous_version, Some(1));
    assert_eq!(updated.record.target_version, Some(2));
    assert_eq!(h.current_version(&api).await, Some(2));

    for host in ["a", "b"] {
        assert_eq!(h.host_version(host, &api).await, Some(2));
        assert_eq!(
            updated.record.hosts.get(&HostId::from(host)),
            Some(&HostOutcome::Committed)
        );
        let record = h
            .store
            .get_host(&HostId::from(host), &api)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_version, Some(2));
        assert_eq!(record.health, HostHealth::Healthy);
    }

    let bundle = h.open_current(&api).await.unwrap();
    assert_eq!(bundle.get("DB_PASSWORD").unwrap().expose(), "two");
}

#[tokio::test]
async fn test_files_land_with_private_modes() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("TOKEN", "t")]).await.unwrap();

    let artifact = h.layout.artifact_path(&api);
    let key = h.layout.key_path(&api);
    assert_eq!(h.fleet.file_mode("a", &artifact).await, Some(0o600));
    assert_eq!(h.fleet.file_mode("a", &key).await, Some(0o600));
    assert!(
        h.fleet
            .file("a", &h.layout.artifact_sidecar_path(&api))
            .await
            .is_some()
    );
}

// ---- All-or-nothing ----

#[tokio::test]
async fn test_unreachable_host_rolls_back_the_rest() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet.set_unreachable("b", true).await;
    let outcome = h.update(&api, "DB_PASSWORD", "two").await.unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert!(matches!(outcome.error, Some(SealError::QuorumNotMet { .. })));
    assert_eq!(
        outcome.record.hosts.get(&HostId::from("a")),
        Some(&HostOutcome::RolledBack)
    );
    assert!(matches!(
        outcome.record.hosts.get(&HostId::from("b")),
        Some(HostOutcome::Skipped { .. })
    ));
    assert_eq!(h.host_version("a", &api).await, Some(1));
    assert_eq!(h.current_version(&api).await, Some(1));
}

#[tokio::test]
async fn test_connection_lost_mid_push_restores_partial_files() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    let paths = h.layout.managed_paths(&api);
    let mut before = Vec::new();
    for path in &paths {
        before.push(h.fleet.file("b", path).await);
    }

    // Every push attempt lands the key sidecar and key on b, then drops.
    h.fleet.drop_connection_after("b", 2, 2).await;
    let outcome = h
        .run(
            &api,
            RotationPlan::RotateKey {
                changes: Default::default(),
            },
        )
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    for host in ["a", "b"] {
        assert_eq!(
            outcome.record.hosts.get(&HostId::from(host)),
            Some(&HostOutcome::RolledBack),
            "host {host}"
        );
    }
    for (path, contents) in paths.iter().zip(&before) {
        assert_eq!(&h.fleet.file("b", path).await, contents, "{path} on b");
    }
    assert_eq!(h.host_version("b", &api).await, Some(1));
    assert_eq!(h.current_version(&api).await, Some(1));
    assert!(!h.keys.has_staged(&api).await);
}

#[tokio::test]
async fn test_one_failed_verification_restores_whole_fleet() {
    let h = TestHarness::builder()
        .with_hosts(["h1", "h2", "h3", "h4", "h5"])
        .build()
        .await
        .unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet.fail_verification("h3", true).await;
    let outcome = h.update(&api, "DB_PASSWORD", "two").await.unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    for host in ["h1", "h2", "h3", "h4", "h5"] {
        assert_eq!(h.host_version(host, &api).await, Some(1), "host {host}");
        assert_eq!(
            outcome.record.hosts.get(&HostId::from(host)),
            Some(&HostOutcome::RolledBack),
            "host {host}"
        );
    }
    assert_eq!(h.current_version(&api).await, Some(1));
    let bundle = h.open_current(&api).await.unwrap();
    assert_eq!(bundle.get("DB_PASSWORD").unwrap().expose(), "one");
}

#[tokio::test]
async fn test_unhealthy_services_fail_verification() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet.set_unhealthy("a", true).await;
    let outcome = h.update(&api, "DB_PASSWORD", "two").await.unwrap();
    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert_eq!(h.host_version("b", &api).await, Some(1));
}

#[tokio::test]
async fn test_rolled_back_version_number_is_not_reused() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet.fail_verification("a", true).await;
    let failed = h.update(&api, "DB_PASSWORD", "two").await.unwrap();
    assert_eq!(failed.record.target_version, Some(2));

    h.fleet.fail_verification("a", false).await;
    let retried = h.update(&api, "DB_PASSWORD", "two").await.unwrap();
    TestHarness::assert_state(&retried, JobState::Committed);
    assert_eq!(retried.record.target_version, Some(3));
    assert_eq!(h.current_version(&api).await, Some(3));
}

// ---- Quorum ----

#[tokio::test]
async fn test_fraction_quorum_tolerates_unreachable_host() {
    let h = TestHarness::builder()
        .with_hosts(["a", "b", "c", "d"])
        .with_quorum(Quorum::Fraction(0.5))
        .build()
        .await
        .unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet.set_unreachable("d", true).await;
    let outcome = h.update(&api, "DB_PASSWORD", "two").await.unwrap();

    TestHarness::assert_state(&outcome, JobState::Committed);
    assert_eq!(h.current_version(&api).await, Some(2));
    assert_eq!(h.host_version("a", &api).await, Some(2));
    assert_eq!(h.host_version("d", &api).await, Some(1));

    // The skipped host catches up on the next re-publish.
    h.fleet.set_unreachable("d", false).await;
    let catch_up = h
        .run(&api, RotationPlan::Restore { version: 2 })
        .await
        .unwrap();
    TestHarness::assert_state(&catch_up, JobState::Committed);
    assert_eq!(h.host_version("d", &api).await, Some(2));
}

// ---- Idempotence ----

#[tokio::test]
async fn test_republishing_current_version_is_a_no_op() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    let before = h.fleet.placements("a").await;

    let outcome = h
        .run(&api, RotationPlan::Restore { version: 1 })
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::Committed);
    assert_eq!(h.fleet.placements("a").await, before);
    assert_eq!(h.current_version(&api).await, Some(1));
}

#[tokio::test]
async fn test_create_twice_fails_without_touching_hosts() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    let before = h.fleet.placements("a").await;

    let outcome = h.create(&api, &[("DB_PASSWORD", "other")]).await.unwrap();
    TestHarness::assert_state(&outcome, JobState::Failed);
    assert!(matches!(outcome.error, Some(SealError::AlreadyExists { .. })));
    assert_eq!(h.fleet.placements("a").await, before);
}

// ---- Key rotation ----

#[tokio::test]
async fn test_rotate_key_changes_key_id_and_keeps_values() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    let old_key = h.keys.current_key_id(&api).await.unwrap();

    let outcome = h
        .run(
            &api,
            RotationPlan::RotateKey {
                changes: Default::default(),
            },
        )
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::Committed);
    let new_key = h.keys.current_key_id(&api).await.unwrap();
    assert_ne!(old_key, new_key);
    assert!(!h.keys.has_staged(&api).await);
    let bundle = h.open_current(&api).await.unwrap();
    assert_eq!(bundle.get("DB_PASSWORD").unwrap().expose(), "one");
    assert_eq!(bundle.version(), 2);
}

#[tokio::test]
async fn test_failed_key_rotation_discards_staged_key() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    let old_key = h.keys.current_key_id(&api).await.unwrap();

    h.fleet.fail_verification("b", true).await;
    let outcome = h
        .run(
            &api,
            RotationPlan::RotateKey {
                changes: Default::default(),
            },
        )
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert_eq!(h.keys.current_key_id(&api).await, Some(old_key));
    assert!(!h.keys.has_staged(&api).await);
    assert!(h.open_current(&api).await.is_ok());
}

#[tokio::test]
async fn test_unconfirmable_key_rolls_back() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.keys.set_fail_confirm(true);
    let outcome = h
        .run(
            &api,
            RotationPlan::RotateKey {
                changes: Default::default(),
            },
        )
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert_eq!(h.host_version("a", &api).await, Some(1));
    assert_eq!(h.current_version(&api).await, Some(1));
}

// ---- Concurrency ----

#[tokio::test]
async fn test_concurrent_updates_to_one_identity_serialize() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    let request = |value: &str| RotationRequest {
        identity: api.clone(),
        hosts: h.hosts.clone(),
        plan: RotationPlan::Update {
            changes: sealfleet_vault::BundleChanges {
                set: vec![(
                    "DB_PASSWORD".to_string(),
                    sealfleet_vault::SecretValue::new(value),
                )],
                unset: Vec::new(),
            },
        },
        dry_run: false,
    };
    let first = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        let request = request("two");
        async move { orchestrator.run(request, CancellationToken::new()).await }
    });
    let second = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        let request = request("three");
        async move { orchestrator.run(request, CancellationToken::new()).await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    TestHarness::assert_state(&first, JobState::Committed);
    TestHarness::assert_state(&second, JobState::Committed);

    let mut versions = vec![
        first.record.target_version.unwrap(),
        second.record.target_version.unwrap(),
    ];
    versions.sort_unstable();
    assert_eq!(versions, vec![2, 3]);
    assert_eq!(h.current_version(&api).await, Some(3));
    assert_eq!(h.host_version("a", &api).await, Some(3));
}

#[tokio::test]
async fn test_separate_processes_serialize_on_one_identity() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    h.update(&api, "DB_PASSWORD", "two").await.unwrap();
    h.fleet
        .set_push_delay("a", Some(Duration::from_millis(300)))
        .await;

    let other = Arc::new(h.separate_orchestrator().await.unwrap());
    let restore = || RotationRequest {
        identity: api.clone(),
        hosts: h.hosts.clone(),
        plan: RotationPlan::Restore { version: 1 },
        dry_run: false,
    };
    let first = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        let request = restore();
        async move { orchestrator.run(request, CancellationToken::new()).await }
    });
    let second = tokio::spawn({
        let orchestrator = Arc::clone(&other);
        let request = restore();
        async move { orchestrator.run(request, CancellationToken::new()).await }
    });

    let mut jobs = vec![
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
    ];
    for job in &jobs {
        TestHarness::assert_state(job, JobState::Committed);
    }
    jobs.sort_by_key(|j| j.record.created_at);
    assert!(
        jobs[0].record.updated_at <= jobs[1].record.created_at,
        "jobs overlapped: {:?} and {:?}",
        (jobs[0].record.created_at, jobs[0].record.updated_at),
        (jobs[1].record.created_at, jobs[1].record.updated_at),
    );
    assert_eq!(h.current_version(&api).await, Some(1));
    assert_eq!(h.host_version("a", &api).await, Some(1));

    // Both leases were released.
    let lease = chrono::Utc::now() + chrono::Duration::seconds(60);
    assert!(h.store.acquire_identity_lock(&api, "after", lease).await.unwrap());
}

#[tokio::test]
async fn test_different_identities_rotate_independently() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    let billing = TestHarness::identity("billing");

    let (a, b) = tokio::join!(
        h.create(&api, &[("DB_PASSWORD", "one")]),
        h.create(&billing, &[("STRIPE_KEY", "sk")]),
    );
    TestHarness::assert_state(&a.unwrap(), JobState::Committed);
    TestHarness::assert_state(&b.unwrap(), JobState::Committed);
    assert_eq!(h.host_version("b", &billing).await, Some(1));
}

// ---- Cancellation ----

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h
        .run_on(
            &api,
            RotationPlan::Create {
                secrets: vec![(
                    "DB_PASSWORD".into(),
                    sealfleet_vault::SecretValue::new("one"),
                )],
                strategy: None,
            },
            h.hosts.clone(),
            cancel,
        )
        .await;

    match result {
        Err(SealError::Cancelled) => {}
        Ok(outcome) => TestHarness::assert_state(&outcome, JobState::Cancelled),
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.current_version(&api).await, None);
    assert_eq!(h.store.latest_version(&api).await.unwrap(), None);
    assert_eq!(h.fleet.placements("a").await, 0);
    assert!(!h.keys.has_staged(&api).await);
}

#[tokio::test]
async fn test_cancel_during_slow_push_rolls_back() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet
        .set_push_delay("b", Some(Duration::from_millis(300)))
        .await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let changes = sealfleet_vault::BundleChanges {
        set: vec![(
            "DB_PASSWORD".into(),
            sealfleet_vault::SecretValue::new("two"),
        )],
        unset: Vec::new(),
    };
    let outcome = h
        .run_on(&api, RotationPlan::Update { changes }, h.hosts.clone(), cancel)
        .await
        .unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert!(matches!(outcome.error, Some(SealError::Cancelled)));
    // The late push to b finished before b was restored.
    assert_eq!(h.host_version("a", &api).await, Some(1));
    assert_eq!(h.host_version("b", &api).await, Some(1));
    assert_eq!(h.current_version(&api).await, Some(1));
}

#[tokio::test]
async fn test_push_timeout_rolls_back() {
    let h = TestHarness::builder()
        .with_distribute_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();

    h.fleet
        .set_push_delay("a", Some(Duration::from_millis(200)))
        .await;
    let outcome = h.update(&api, "DB_PASSWORD", "two").await.unwrap();

    TestHarness::assert_state(&outcome, JobState::RolledBack);
    assert_eq!(h.host_version("a", &api).await, Some(1));
    assert_eq!(h.host_version("b", &api).await, Some(1));
}

// ---- Dry run and history ----

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = TestHarness::builder()
        .with_hosts(["a", "b", "c"])
        .build()
        .await
        .unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    let before = h.fleet.placements("a").await;
    let hosts_before = h.store.list_hosts().await.unwrap();
    h.fleet.set_unreachable("c", true).await;

    let outcome = h
        .orchestrator
        .run(
            RotationRequest {
                identity: api.clone(),
                hosts: h.hosts.clone(),
                plan: RotationPlan::RotateKey {
                    changes: Default::default(),
                },
                dry_run: true,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.record.target_version, Some(2));
    assert_eq!(outcome.record.backups.len(), 2);
    assert!(matches!(
        outcome.record.hosts.get(&HostId::from("c")),
        Some(HostOutcome::Skipped { .. })
    ));
    assert_eq!(h.fleet.placements("a").await, before);
    assert_eq!(h.store.latest_version(&api).await.unwrap(), Some(1));
    assert!(!h.keys.has_staged(&api).await);
    assert_eq!(h.store.list_jobs(&api).await.unwrap().len(), 1);
    assert_eq!(h.store.list_hosts().await.unwrap(), hosts_before);
}

#[tokio::test]
async fn test_job_history_records_terminal_states() {
    let h = TestHarness::builder().build().await.unwrap();
    let api = TestHarness::identity("api");
    h.create(&api, &[("DB_PASSWORD", "one")]).await.unwrap();
    h.fleet.fail_verification("a", true).await;
    h.update(&api, "DB_PASSWORD", "two").await.unwrap();

    let jobs = h.store.list_jobs(&api).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].state, JobState::RolledBack);
    assert_eq!(jobs[1].state, JobState::Committed);
    assert!(jobs[0].error.is_some());
    assert_eq!(
        jobs[0].backups.get(&HostId::from("a")).and_then(|b| b.version),
        Some(1)
    );
}
