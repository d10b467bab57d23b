// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end rotation testing.
//!
//! `TestHarness` assembles an [`Orchestrator`] over a [`MockFleet`], an
//! [`InMemoryKeyProvider`] and a temp SQLite state store.

use std::sync::Arc;
use std::time::Duration;

use sealfleet_core::{BundleIdentity, Host, JobState, SealError, StateStore, StrategyId};
use sealfleet_fleet::{
    Distributor, Orchestrator, Quorum, RemoteLayout, RotationOutcome, RotationPlan,
    RotationRequest, RotationSettings,
};
use sealfleet_keys::KeyRegistry;
use sealfleet_resilience::RetryPolicy;
use sealfleet_storage::SqliteStateStore;
use sealfleet_vault::{Bundle, BundleChanges, EncryptedArtifact, SecretValue};
use tokio_util::sync::CancellationToken;

use crate::mock_fleet::MockFleet;
use crate::mock_keys::InMemoryKeyProvider;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    hosts: Vec<String>,
    quorum: Quorum,
    concurrency: usize,
    distribute_timeout: Duration,
    verify_timeout: Duration,
    retry: RetryPolicy,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            hosts: vec!["a".into(), "b".into()],
            quorum: Quorum::All,
            concurrency: 4,
            distribute_timeout: Duration::from_secs(5),
            verify_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                jitter: false,
            },
        }
    }

    /// Host ids in the fleet, replacing the default `a`, `b`.
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quorum(mut self, quorum: Quorum) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_distribute_timeout(mut self, timeout: Duration) -> Self {
        self.distribute_timeout = timeout;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, SealError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| SealError::Internal(format!("temp dir: {e}")))?;
        let store = Arc::new(
            SqliteStateStore::open_path(temp_dir.path().join("state.db"), true).await?,
        );

        let keys = Arc::new(InMemoryKeyProvider::new(StrategyId::Local));
        let registry =
            Arc::new(KeyRegistry::new(StrategyId::Local).with_provider(keys.clone()));

        let fleet = Arc::new(MockFleet::new());
        let mut hosts = Vec::with_capacity(self.hosts.len());
        for id in &self.hosts {
            hosts.push(fleet.add_host(id).await);
        }

        let layout = RemoteLayout::new("/etc/sealfleet", "/etc/sealfleet/keys");
        let distributor = Arc::new(Distributor::new(
            fleet.clone(),
            layout.clone(),
            self.retry.clone(),
        ));
        let settings = RotationSettings {
            concurrency: self.concurrency,
            quorum: self.quorum,
            distribute_timeout: self.distribute_timeout,
            verify_timeout: self.verify_timeout,
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            registry,
            distributor,
            fleet.clone(),
            fleet.clone(),
            settings.clone(),
        ));

        Ok(TestHarness {
            orchestrator,
            store,
            keys,
            fleet,
            hosts,
            layout,
            settings,
            retry: self.retry,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete rotation environment with mock hosts and temp storage.
pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    /// SQLite state store (temp DB, cleaned up on drop).
    pub store: Arc<SqliteStateStore>,
    pub keys: Arc<InMemoryKeyProvider>,
    pub fleet: Arc<MockFleet>,
    pub hosts: Vec<Host>,
    pub layout: RemoteLayout,
    settings: RotationSettings,
    retry: RetryPolicy,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// An orchestrator with its own connection to the same state database,
    /// keys and fleet, as a second `sealfleet` process would have.
    pub async fn separate_orchestrator(&self) -> Result<Orchestrator, SealError> {
        let store = Arc::new(
            SqliteStateStore::open_path(self.store.database().path(), true).await?,
        );
        let registry =
            Arc::new(KeyRegistry::new(StrategyId::Local).with_provider(self.keys.clone()));
        let distributor = Arc::new(Distributor::new(
            self.fleet.clone(),
            self.layout.clone(),
            self.retry.clone(),
        ));
        Ok(Orchestrator::new(
            store,
            registry,
            distributor,
            self.fleet.clone(),
            self.fleet.clone(),
            self.settings.clone(),
        ))
    }

    pub fn identity(name: &str) -> BundleIdentity {
        BundleIdentity::new(name).unwrap_or_else(|e| panic!("bad test identity: {e}"))
    }

    /// Run `plan` against every host.
    pub async fn run(
        &self,
        identity: &BundleIdentity,
        plan: RotationPlan,
    ) -> Result<RotationOutcome, SealError> {
        self.run_on(identity, plan, self.hosts.clone(), CancellationToken::new())
            .await
    }

    pub async fn run_on(
        &self,
        identity: &BundleIdentity,
        plan: RotationPlan,
        hosts: Vec<Host>,
        cancel: CancellationToken,
    ) -> Result<RotationOutcome, SealError> {
        self.orchestrator
            .run(
                RotationRequest {
                    identity: identity.clone(),
                    hosts,
                    plan,
                    dry_run: false,
                },
                cancel,
            )
            .await
    }

    /// Create a bundle holding `secrets` and deploy it everywhere.
    pub async fn create(
        &self,
        identity: &BundleIdentity,
        secrets: &[(&str, &str)],
    ) -> Result<RotationOutcome, SealError> {
        let secrets = secrets
            .iter()
            .map(|(k, v)| (k.to_string(), SecretValue::new(*v)))
            .collect();
        self.run(
            identity,
            RotationPlan::Create {
                secrets,
                strategy: None,
            },
        )
        .await
    }

    /// Set `name` to `value` and deploy.
    pub async fn update(
        &self,
        identity: &BundleIdentity,
        name: &str,
        value: &str,
    ) -> Result<RotationOutcome, SealError> {
        let changes = BundleChanges {
            set: vec![(name.to_string(), SecretValue::new(value))],
            unset: Vec::new(),
        };
        self.run(identity, RotationPlan::Update { changes }).await
    }

    pub async fn current_version(&self, identity: &BundleIdentity) -> Option<u64> {
        self.store.current_version(identity).await.ok().flatten()
    }

    /// Version deployed on `host`, read back from its artifact header.
    pub async fn host_version(&self, host: &str, identity: &BundleIdentity) -> Option<u64> {
        self.fleet
            .deployed_version(host, &self.layout.artifact_path(identity))
            .await
    }

    /// Decrypt the stored current version.
    pub async fn open_current(&self, identity: &BundleIdentity) -> Result<Bundle, SealError> {
        let version = self
            .current_version(identity)
            .await
            .ok_or_else(|| SealError::NotFound {
                what: format!("current version of `{identity}`"),
            })?;
        let stored = self
            .store
            .get_artifact(identity, version)
            .await?
            .ok_or_else(|| SealError::NotFound {
                what: format!("artifact v{version}"),
            })?;
        let artifact = EncryptedArtifact::parse(&stored.bytes)?;
        let key = sealfleet_core::KeyProvider::resolve_key(
            self.keys.as_ref(),
            identity,
            artifact.key_id(),
        )
        .await?;
        sealfleet_vault::open(&artifact, &key)
    }

    /// Assert a job finished in `state`, printing the record otherwise.
    pub fn assert_state(outcome: &RotationOutcome, state: JobState) {
        assert_eq!(
            outcome.record.state, state,
            "unexpected job state, record: {:#?}, error: {:?}",
            outcome.record, outcome.error
        );
    }
}
