// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rotation state machine.
//!
//! ```text
//! Pending -> Building -> Distributing -> Verifying -> Committed
//!    |          |              |              |
//!    +----------+--> Cancelled +--------------+-> RolledBack
//!               +--> Failed
//! ```
//!
//! Jobs for one identity run one at a time, within a process through
//! [`IdentityLocks`] and across processes through a leased lock in the state
//! store. The current-version pointer only moves in the Committed transition.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sealfleet_config::model::RotationConfig;
use sealfleet_core::{
    BundleIdentity, ExpectedArtifact, HealthStatus, Host, HostHealth, HostId, HostOutcome,
    HostRecord, HostVerifier, JobKind, JobRecord, JobState, KeyId, KeyMaterial, KeyProvider,
    SealError, ServiceHooks, StateStore, StoredArtifact, StrategyId, EXIT_OK,
};
use sealfleet_keys::local::render_key_file;
use sealfleet_keys::{IdentityLocks, KeyRegistry};
use sealfleet_vault::{Bundle, BundleChanges, EncryptedArtifact, SecretValue};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::distributor::{Distributor, HostBackup, Payload, PushOutcome};
use crate::quorum::Quorum;

/// How long an identity lease lasts without renewal.
const LEASE_SECS: i64 = 60;
/// Renewal period of a held lease.
const LEASE_RENEW: Duration = Duration::from_secs(20);
/// Wait between attempts to take a lease another job holds.
const LEASE_POLL: Duration = Duration::from_millis(200);

fn lease_expiry() -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(LEASE_SECS)
}

/// Limits applied to every job.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub concurrency: usize,
    pub quorum: Quorum,
    pub distribute_timeout: Duration,
    pub verify_timeout: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            quorum: Quorum::All,
            distribute_timeout: Duration::from_secs(120),
            verify_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&RotationConfig> for RotationSettings {
    fn from(config: &RotationConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            quorum: Quorum::from(&config.quorum),
            distribute_timeout: Duration::from_secs(config.distribute_timeout_secs),
            verify_timeout: Duration::from_secs(config.verify_timeout_secs),
        }
    }
}

/// What a job publishes.
#[derive(Debug, Clone)]
pub enum RotationPlan {
    /// A new bundle with a freshly generated key. `strategy` defaults to the
    /// registry's default strategy.
    Create {
        secrets: Vec<(String, SecretValue)>,
        strategy: Option<StrategyId>,
    },
    /// New values under the current key.
    Update { changes: BundleChanges },
    /// The current values plus `changes`, sealed under a new key.
    RotateKey { changes: BundleChanges },
    /// A stored version re-published as current.
    Restore { version: u64 },
}

impl RotationPlan {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Create { .. } => JobKind::Create,
            Self::Update { .. } => JobKind::Update,
            Self::RotateKey { .. } => JobKind::RotateKey,
            Self::Restore { .. } => JobKind::Restore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationRequest {
    pub identity: BundleIdentity,
    pub hosts: Vec<Host>,
    pub plan: RotationPlan,
    /// Report what would happen without staging keys, storing artifacts or
    /// touching hosts.
    pub dry_run: bool,
}

/// The final job record, plus the error that ended the job if it did not commit.
#[derive(Debug)]
pub struct RotationOutcome {
    pub record: JobRecord,
    pub error: Option<SealError>,
}

impl RotationOutcome {
    pub fn committed(&self) -> bool {
        self.record.state == JobState::Committed && self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(EXIT_OK, SealError::exit_code)
    }
}

struct StagedKey {
    provider: Arc<dyn KeyProvider>,
    key_id: KeyId,
}

/// Everything Building produced.
struct Built {
    version: u64,
    payload: Arc<Payload>,
    expected: ExpectedArtifact,
    staged: Option<StagedKey>,
    /// True if Building stored a new artifact version.
    stored: bool,
}

enum PushResult {
    Done(Result<PushOutcome, SealError>),
    /// The push outlived its phase; it keeps running and rollback awaits it.
    Detached {
        handle: JoinHandle<Result<PushOutcome, SealError>>,
        reason: String,
    },
    NotStarted,
}

/// Mutable state of one running job.
struct JobRun {
    record: JobRecord,
    hosts: Vec<Host>,
    backups: HashMap<HostId, Arc<HostBackup>>,
    detached: HashMap<HostId, JoinHandle<Result<PushOutcome, SealError>>>,
    /// Hosts that may hold new files even though their push did not succeed.
    maybe_touched: BTreeSet<HostId>,
}

impl JobRun {
    fn set_outcome(&mut self, host: &HostId, outcome: HostOutcome) {
        self.record.hosts.insert(host.clone(), outcome);
    }

    fn outcome(&self, host: &HostId) -> Option<&HostOutcome> {
        self.record.hosts.get(host)
    }

    fn hosts_where(&self, pred: impl Fn(&HostOutcome) -> bool) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|h| self.outcome(&h.id).is_some_and(&pred))
            .cloned()
            .collect()
    }

    fn count(&self, pred: impl Fn(&HostOutcome) -> bool) -> usize {
        self.record.hosts.values().filter(|o| pred(*o)).count()
    }
}

/// Keep the lease alive until `stop` fires. A lost lease cancels the job.
async fn renew_lease(
    store: Arc<dyn StateStore>,
    identity: BundleIdentity,
    job_id: String,
    job_cancel: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(LEASE_RENEW) => {}
        }
        match store
            .renew_identity_lock(&identity, &job_id, lease_expiry())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                error!(identity = %identity, job_id = %job_id, "identity lease lost, cancelling job");
                job_cancel.cancel();
                return;
            }
            Err(e) => warn!(identity = %identity, error = %e, "identity lease not renewed"),
        }
    }
}

/// Runs rotation jobs against a fleet.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    keys: Arc<KeyRegistry>,
    distributor: Arc<Distributor>,
    verifier: Arc<dyn HostVerifier>,
    hooks: Arc<dyn ServiceHooks>,
    locks: IdentityLocks,
    settings: RotationSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: Arc<KeyRegistry>,
        distributor: Arc<Distributor>,
        verifier: Arc<dyn HostVerifier>,
        hooks: Arc<dyn ServiceHooks>,
        settings: RotationSettings,
    ) -> Self {
        Self {
            store,
            keys,
            distributor,
            verifier,
            hooks,
            locks: IdentityLocks::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    /// Run one job to a terminal state, first waiting for any other job on
    /// the same identity in this or another process.
    ///
    /// Returns `Err` only when no job record could be created or persisted;
    /// every other failure is reported in the outcome.
    pub async fn run(
        &self,
        request: RotationRequest,
        cancel: CancellationToken,
    ) -> Result<RotationOutcome, SealError> {
        let _guard = tokio::select! {
            guard = self.locks.lock(&request.identity) => guard,
            _ = cancel.cancelled() => return Err(SealError::Cancelled),
        };
        let job_id = uuid::Uuid::new_v4().to_string();
        if request.dry_run {
            return self.run_job(job_id, request, cancel).await;
        }

        self.acquire_lease(&request.identity, &job_id, &cancel).await?;
        let job_cancel = cancel.child_token();
        let stop_renewal = CancellationToken::new();
        let renewal = tokio::spawn(renew_lease(
            self.store.clone(),
            request.identity.clone(),
            job_id.clone(),
            job_cancel.clone(),
            stop_renewal.clone(),
        ));

        let identity = request.identity.clone();
        let result = self.run_job(job_id.clone(), request, job_cancel).await;

        stop_renewal.cancel();
        if let Err(e) = renewal.await {
            warn!(identity = %identity, error = %e, "lease renewal task failed");
        }
        if let Err(e) = self.store.release_identity_lock(&identity, &job_id).await {
            warn!(identity = %identity, job_id = %job_id, error = %e, "identity lease not released");
        }
        result
    }

    /// Wait until this job holds the store-wide lease on `identity`.
    async fn acquire_lease(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SealError> {
        let mut waiting = false;
        loop {
            if self
                .store
                .acquire_identity_lock(identity, job_id, lease_expiry())
                .await?
            {
                return Ok(());
            }
            if !waiting {
                info!(identity = %identity, "another job holds this identity, waiting");
                waiting = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(LEASE_POLL) => {}
                _ = cancel.cancelled() => return Err(SealError::Cancelled),
            }
        }
    }

    async fn run_job(
        &self,
        job_id: String,
        request: RotationRequest,
        cancel: CancellationToken,
    ) -> Result<RotationOutcome, SealError> {
        let now = Utc::now();
        let previous_version = self.store.current_version(&request.identity).await?;
        let record = JobRecord {
            id: job_id,
            identity: request.identity.clone(),
            kind: request.plan.kind(),
            state: JobState::Pending,
            previous_version,
            target_version: None,
            hosts: request
                .hosts
                .iter()
                .map(|h| (h.id.clone(), HostOutcome::Pending))
                .collect(),
            backups: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        let mut run = JobRun {
            record,
            hosts: request.hosts.clone(),
            backups: HashMap::new(),
            detached: HashMap::new(),
            maybe_touched: BTreeSet::new(),
        };

        if request.dry_run {
            return self.dry_run(run, &request).await;
        }

        info!(
            job_id = %run.record.id,
            identity = %request.identity,
            kind = %run.record.kind,
            hosts = run.hosts.len(),
            "rotation job created"
        );
        self.store.save_job(&run.record).await?;
        if cancel.is_cancelled() {
            return self.finish_cancelled(run, None).await;
        }

        // Building
        self.transition(&mut run, JobState::Building).await?;
        self.capture_backups(&mut run, &request.identity, true).await;
        if cancel.is_cancelled() {
            return self.finish_cancelled(run, None).await;
        }
        let built = match self.build(&request).await {
            Ok(built) => built,
            Err(e) => return self.finish_failed(run, e).await,
        };
        run.record.target_version = Some(built.version);
        if cancel.is_cancelled() {
            return self.finish_cancelled(run, Some(built)).await;
        }

        // Distributing
        self.transition(&mut run, JobState::Distributing).await?;
        self.distribute(&mut run, &built, &cancel).await;
        self.store.save_job(&run.record).await?;
        if cancel.is_cancelled() {
            return self.rollback(run, built, SealError::Cancelled).await;
        }

        // Verifying
        self.transition(&mut run, JobState::Verifying).await?;
        self.verify(&mut run, &built, &cancel).await;
        if cancel.is_cancelled() {
            return self.rollback(run, built, SealError::Cancelled).await;
        }

        let targets = run.hosts.len();
        let skipped = run.count(|o| matches!(o, HostOutcome::Skipped { .. }));
        let verified = run.count(|o| matches!(o, HostOutcome::Verified));
        if !self.settings.quorum.is_met(targets, skipped, verified) {
            let required = self.settings.quorum.required(targets, skipped);
            warn!(
                job_id = %run.record.id,
                verified,
                required,
                skipped,
                "quorum not met, rolling back"
            );
            return self
                .rollback(run, built, SealError::QuorumNotMet { verified, required })
                .await;
        }

        self.commit(run, built).await
    }

    async fn transition(&self, run: &mut JobRun, state: JobState) -> Result<(), SealError> {
        debug!(job_id = %run.record.id, from = %run.record.state, to = %state, "job transition");
        run.record.state = state;
        run.record.updated_at = Utc::now();
        self.store.save_job(&run.record).await
    }

    /// Persist the terminal record and build the outcome.
    async fn finish(
        &self,
        mut run: JobRun,
        state: JobState,
        error: Option<SealError>,
    ) -> Result<RotationOutcome, SealError> {
        run.record.state = state;
        run.record.updated_at = Utc::now();
        if let Some(e) = &error {
            run.record.error = Some(match run.record.error.take() {
                Some(extra) => format!("{e}; {extra}"),
                None => e.to_string(),
            });
        }
        self.store.save_job(&run.record).await?;
        info!(
            job_id = %run.record.id,
            identity = %run.record.identity,
            state = %state,
            version = ?run.record.target_version,
            "rotation job finished"
        );
        Ok(RotationOutcome {
            record: run.record,
            error,
        })
    }

    async fn finish_failed(
        &self,
        run: JobRun,
        error: SealError,
    ) -> Result<RotationOutcome, SealError> {
        error!(job_id = %run.record.id, error = %error, "building failed");
        self.finish(run, JobState::Failed, Some(error)).await
    }

    /// Undo Building's side effects and stop.
    async fn finish_cancelled(
        &self,
        mut run: JobRun,
        built: Option<Built>,
    ) -> Result<RotationOutcome, SealError> {
        if let Some(built) = built {
            let identity = run.record.identity.clone();
            if let Some(staged) = &built.staged
                && let Err(e) = staged.provider.abort_rollover(&identity).await
            {
                run.record.error = Some(format!("staged key not discarded: {e}"));
            }
            if built.stored
                && let Err(e) = self.store.delete_artifact(&identity, built.version).await
            {
                warn!(identity = %identity, version = built.version, error = %e, "could not remove unpublished artifact");
            }
            run.record.target_version = None;
        }
        for outcome in run.record.hosts.values_mut() {
            if *outcome == HostOutcome::Pending {
                *outcome = HostOutcome::Skipped {
                    reason: "job cancelled".into(),
                };
            }
        }
        self.finish(run, JobState::Cancelled, Some(SealError::Cancelled))
            .await
    }

    /// Read every target host's current files. Hosts that cannot be read are
    /// skipped for this rotation, and recorded as unreachable when `persist`
    /// is set.
    async fn capture_backups(&self, run: &mut JobRun, identity: &BundleIdentity, persist: bool) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();
        for host in run.hosts.clone() {
            let distributor = self.distributor.clone();
            let identity = identity.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = distributor.capture(&host, &identity).await;
                (host.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((host, result)) = joined else {
                continue;
            };
            match result {
                Ok(backup) => {
                    run.record
                        .backups
                        .insert(host.clone(), backup.summary().clone());
                    run.backups.insert(host, Arc::new(backup));
                }
                Err(e) => {
                    warn!(job_id = %run.record.id, host = %host, error = %e, "host unreadable, skipping");
                    if persist {
                        self.mark_host(&host, identity, None, None, HostHealth::Unreachable)
                            .await;
                    }
                    run.set_outcome(&host, HostOutcome::Skipped { reason: e.to_string() });
                }
            }
        }
        for host in &run.hosts {
            if !run.backups.contains_key(&host.id)
                && run.outcome(&host.id) == Some(&HostOutcome::Pending)
            {
                run.record.hosts.insert(
                    host.id.clone(),
                    HostOutcome::Skipped {
                        reason: "backup task failed".into(),
                    },
                );
            }
        }
    }

    /// Produce the artifact to publish.
    async fn build(&self, request: &RotationRequest) -> Result<Built, SealError> {
        let identity = &request.identity;
        let current = self.store.current_version(identity).await?;
        let latest = self.store.latest_version(identity).await?;

        match &request.plan {
            RotationPlan::Create { secrets, strategy } => {
                if current.is_some() || latest.is_some() {
                    return Err(SealError::AlreadyExists {
                        identity: identity.to_string(),
                    });
                }
                let bundle = Bundle::create(identity.clone(), secrets.iter().cloned())?;
                let provider = self
                    .keys
                    .get(strategy.unwrap_or_else(|| self.keys.default_strategy()))?;
                let key = provider.rotate(identity).await?;
                self.seal_and_store(bundle, key, provider, true).await
            }
            RotationPlan::Update { changes } | RotationPlan::RotateKey { changes } => {
                let current = current.ok_or_else(|| SealError::NotFound {
                    what: format!("current version of bundle `{identity}`"),
                })?;
                let (artifact, provider, key) = self.load_version(identity, current).await?;
                let bundle = sealfleet_vault::open(&artifact, &key)?;
                let next = bundle.next_version(changes)?;
                // Versions from rolled-back jobs stay stored, so never reuse one.
                let version = latest
                    .unwrap_or(current)
                    .max(current)
                    .checked_add(1)
                    .ok_or_else(|| SealError::Internal("bundle version overflow".into()))?;
                let next = Bundle::from_parts(
                    identity.clone(),
                    version,
                    next.created_at(),
                    next.iter().map(|(n, v)| (n.to_string(), v.clone())),
                )?;
                if matches!(request.plan, RotationPlan::RotateKey { .. }) {
                    let key = provider.rotate(identity).await?;
                    self.seal_and_store(next, key, provider, true).await
                } else {
                    self.seal_and_store(next, key, provider, false).await
                }
            }
            RotationPlan::Restore { version } => {
                let (artifact, _provider, key) = self.load_version(identity, *version).await?;
                // Prove the stored version still opens before touching hosts.
                sealfleet_vault::open(&artifact, &key)?;
                Ok(self.built(artifact, &key, None, false))
            }
        }
    }

    /// Load a stored version together with the key that opens it.
    async fn load_version(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<(EncryptedArtifact, Arc<dyn KeyProvider>, KeyMaterial), SealError> {
        let stored = self
            .store
            .get_artifact(identity, version)
            .await?
            .ok_or_else(|| SealError::NotFound {
                what: format!("version {version} of bundle `{identity}`"),
            })?;
        let artifact = EncryptedArtifact::parse(&stored.bytes)?;
        let provider = self.keys.get(artifact.strategy())?;
        let key = provider.resolve_key(identity, artifact.key_id()).await?;
        Ok((artifact, provider, key))
    }

    async fn seal_and_store(
        &self,
        bundle: Bundle,
        key: KeyMaterial,
        provider: Arc<dyn KeyProvider>,
        staged: bool,
    ) -> Result<Built, SealError> {
        let identity = bundle.identity().clone();
        let staged = staged.then(|| StagedKey {
            provider: provider.clone(),
            key_id: key.key_id().clone(),
        });
        let result = async {
            let artifact = sealfleet_vault::seal(&bundle, &key)?;
            let stored = StoredArtifact {
                identity: identity.clone(),
                version: artifact.version(),
                checksum: artifact.checksum().clone(),
                strategy: artifact.strategy(),
                key_id: artifact.key_id().clone(),
                bytes: artifact.render(),
                created_at: artifact.header().created_at,
            };
            self.store.put_artifact(&stored).await?;
            Ok::<_, SealError>(artifact)
        }
        .await;

        match result {
            Ok(artifact) => Ok(self.built(artifact, &key, staged, true)),
            Err(e) => {
                if let Some(staged) = &staged
                    && let Err(abort) = staged.provider.abort_rollover(&identity).await
                {
                    warn!(identity = %identity, error = %abort, "could not discard staged key");
                }
                Err(e)
            }
        }
    }

    fn built(
        &self,
        artifact: EncryptedArtifact,
        key: &KeyMaterial,
        staged: Option<StagedKey>,
        stored: bool,
    ) -> Built {
        let layout = self.distributor.layout();
        let identity = artifact.identity().clone();
        let key_file = (artifact.strategy() == StrategyId::Local)
            .then(|| Arc::<[u8]>::from(render_key_file(key).as_slice()));
        let expected = ExpectedArtifact {
            identity: identity.clone(),
            version: artifact.version(),
            checksum: artifact.checksum().clone(),
            strategy: artifact.strategy(),
            key_id: artifact.key_id().clone(),
            artifact_path: layout.artifact_path(&identity),
            key_path: key_file.as_ref().map(|_| layout.key_path(&identity)),
        };
        let payload = Payload::new(
            layout,
            identity,
            artifact.version(),
            Arc::from(artifact.render()),
            key_file,
        );
        Built {
            version: artifact.version(),
            payload: Arc::new(payload),
            expected,
            staged,
            stored,
        }
    }

    /// Push to every host that was backed up, with bounded parallelism.
    async fn distribute(&self, run: &mut JobRun, built: &Built, cancel: &CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();
        let timeout = self.settings.distribute_timeout;
        for host in run.hosts_where(|o| *o == HostOutcome::Pending) {
            let distributor = self.distributor.clone();
            let payload = built.payload.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let Some(_permit) = permit else {
                    return (host.id, PushResult::NotStarted);
                };
                let push_host = host.clone();
                let push_cancel = cancel.child_token();
                let mut handle = tokio::spawn(async move {
                    distributor.push(&push_host, &payload, &push_cancel).await
                });
                let result = tokio::select! {
                    joined = &mut handle => PushResult::Done(joined.unwrap_or_else(|e| {
                        Err(SealError::Internal(format!("push task failed: {e}")))
                    })),
                    _ = tokio::time::sleep(timeout) => PushResult::Detached {
                        handle,
                        reason: format!("push timed out after {}s", timeout.as_secs()),
                    },
                    _ = cancel.cancelled() => PushResult::Detached {
                        handle,
                        reason: "job cancelled during push".into(),
                    },
                };
                (host.id, result)
            });
        }

        let identity = run.record.identity.clone();
        while let Some(joined) = tasks.join_next().await {
            let Ok((host, result)) = joined else {
                continue;
            };
            match result {
                PushResult::Done(Ok(PushOutcome::Unchanged)) => {
                    run.set_outcome(&host, HostOutcome::Unchanged);
                }
                PushResult::Done(Ok(PushOutcome::Delivered)) => {
                    run.set_outcome(&host, HostOutcome::Delivered);
                }
                PushResult::Done(Err(e)) => {
                    warn!(job_id = %run.record.id, host = %host, error = %e, "push failed, host degraded");
                    // Files are placed one at a time, so any failure may leave a partial update.
                    if run.backups.contains_key(&host) {
                        run.maybe_touched.insert(host.clone());
                    }
                    let backup = run.backups.get(&host).and_then(|b| b.summary().version);
                    self.mark_host(&host, &identity, backup, None, HostHealth::Degraded)
                        .await;
                    run.set_outcome(&host, HostOutcome::Skipped { reason: e.to_string() });
                }
                PushResult::Detached { handle, reason } => {
                    warn!(job_id = %run.record.id, host = %host, %reason, "push detached");
                    run.detached.insert(host.clone(), handle);
                    run.maybe_touched.insert(host.clone());
                    run.set_outcome(&host, HostOutcome::Skipped { reason });
                }
                PushResult::NotStarted => {
                    run.set_outcome(
                        &host,
                        HostOutcome::Skipped {
                            reason: "job cancelled before push".into(),
                        },
                    );
                }
            }
        }
        for outcome in run.record.hosts.values_mut() {
            if *outcome == HostOutcome::Pending {
                *outcome = HostOutcome::Skipped {
                    reason: "push task failed".into(),
                };
            }
        }
    }

    /// Ask every host that received the update to prove it opens it.
    async fn verify(&self, run: &mut JobRun, built: &Built, cancel: &CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();
        let timeout = self.settings.verify_timeout;
        for host in run.hosts_where(|o| matches!(o, HostOutcome::Delivered | HostOutcome::Unchanged))
        {
            let verifier = self.verifier.clone();
            let hooks = self.hooks.clone();
            let expected = built.expected.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let check = async {
                    verifier.verify(&host, &expected).await?;
                    hooks.restart(&host, &expected.identity).await
                };
                let outcome = tokio::select! {
                    result = tokio::time::timeout(timeout, check) => Some(match result {
                        Err(_) => HostOutcome::VerificationFailed {
                            reason: SealError::VerificationTimeout {
                                host: host.id.to_string(),
                                duration: timeout,
                            }
                            .to_string(),
                        },
                        Ok(Err(e)) => HostOutcome::VerificationFailed { reason: e.to_string() },
                        Ok(Ok(HealthStatus::Healthy)) => HostOutcome::Verified,
                        Ok(Ok(HealthStatus::Degraded(detail))) => {
                            warn!(host = %host.id, %detail, "services degraded after restart");
                            HostOutcome::Verified
                        }
                        Ok(Ok(HealthStatus::Unhealthy(detail))) => HostOutcome::VerificationFailed {
                            reason: format!("services unhealthy: {detail}"),
                        },
                    }),
                    _ = cancel.cancelled() => None,
                };
                (host.id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((host, outcome)) = joined else {
                continue;
            };
            if let Some(outcome) = outcome {
                if let Some(reason) = outcome.reason() {
                    warn!(job_id = %run.record.id, host = %host, %reason, "verification failed");
                }
                run.set_outcome(&host, outcome);
            }
        }
    }

    async fn commit(&self, mut run: JobRun, built: Built) -> Result<RotationOutcome, SealError> {
        let identity = run.record.identity.clone();
        if let Some(staged) = &built.staged
            && let Err(e) = staged.provider.confirm_rollover(&identity, &staged.key_id).await
        {
            error!(job_id = %run.record.id, error = %e, "staged key could not be confirmed");
            return self.rollback(run, built, e).await;
        }

        if let Err(e) = self.store.set_current_version(&identity, built.version).await {
            error!(job_id = %run.record.id, error = %e, "current version not recorded");
            return self.finish(run, JobState::Failed, Some(e)).await;
        }

        let key_id = Some(built.expected.key_id.clone());
        for host in run.hosts.clone() {
            match run.outcome(&host.id).cloned() {
                Some(HostOutcome::Verified) => {
                    run.set_outcome(&host.id, HostOutcome::Committed);
                    self.mark_host(&host.id, &identity, Some(built.version), key_id.clone(), HostHealth::Healthy)
                        .await;
                }
                Some(HostOutcome::VerificationFailed { .. }) => {
                    self.mark_host(&host.id, &identity, Some(built.version), key_id.clone(), HostHealth::Degraded)
                        .await;
                }
                _ => {}
            }
        }

        // Timed-out pushes may still land; let them finish before reporting.
        for (host, handle) in run.detached.drain() {
            if let Ok(Err(e)) = handle.await {
                debug!(host = %host, error = %e, "detached push ended with error");
            }
        }
        self.finish(run, JobState::Committed, None).await
    }

    /// Put every host that may hold new files back to its backup.
    async fn rollback(
        &self,
        mut run: JobRun,
        built: Built,
        cause: SealError,
    ) -> Result<RotationOutcome, SealError> {
        let identity = run.record.identity.clone();
        info!(job_id = %run.record.id, identity = %identity, cause = %cause, "rolling back");

        let to_restore: Vec<Host> = run
            .hosts
            .iter()
            .filter(|h| {
                run.outcome(&h.id).is_some_and(HostOutcome::received)
                    || run.maybe_touched.contains(&h.id)
            })
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();
        for host in to_restore {
            let Some(backup) = run.backups.get(&host.id).cloned() else {
                continue;
            };
            let detached = run.detached.remove(&host.id);
            let distributor = self.distributor.clone();
            let hooks = self.hooks.clone();
            let identity = identity.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if let Some(handle) = detached {
                    // Never restore underneath a push that is still writing.
                    let _ = handle.await;
                }
                let restored = async {
                    distributor
                        .restore(&host, &backup, &CancellationToken::new())
                        .await?;
                    if backup.is_empty() {
                        return Ok(HealthStatus::Healthy);
                    }
                    hooks.restart(&host, &identity).await
                }
                .await;
                let outcome = match restored {
                    Ok(HealthStatus::Unhealthy(detail)) => HostOutcome::RollbackFailed {
                        reason: format!("restored but services unhealthy: {detail}"),
                    },
                    Ok(_) => HostOutcome::RolledBack,
                    Err(e) => HostOutcome::RollbackFailed { reason: e.to_string() },
                };
                (host.id, backup.summary().version, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((host, version, outcome)) = joined else {
                continue;
            };
            let health = match &outcome {
                HostOutcome::RolledBack => HostHealth::Healthy,
                _ => {
                    error!(job_id = %run.record.id, host = %host, reason = ?outcome.reason(), "rollback failed");
                    HostHealth::Degraded
                }
            };
            self.mark_host(&host, &identity, version, None, health).await;
            run.set_outcome(&host, outcome);
        }

        if let Some(staged) = &built.staged
            && let Err(e) = staged.provider.abort_rollover(&identity).await
        {
            run.record.error = Some(format!("staged key not discarded: {e}"));
        }
        self.finish(run, JobState::RolledBack, Some(cause)).await
    }

    /// Record what is known about a host; failures are logged, not fatal.
    async fn mark_host(
        &self,
        host: &HostId,
        identity: &BundleIdentity,
        version: Option<u64>,
        key_id: Option<KeyId>,
        health: HostHealth,
    ) {
        let previous = self.store.get_host(host, identity).await.ok().flatten();
        let record = HostRecord {
            host: host.clone(),
            identity: identity.clone(),
            last_version: version.or_else(|| previous.as_ref().and_then(|p| p.last_version)),
            last_key_id: key_id.or_else(|| previous.and_then(|p| p.last_key_id)),
            health,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.store.upsert_host(&record).await {
            warn!(host = %host, error = %e, "host record not saved");
        }
    }

    /// Describe the job without side effects.
    async fn dry_run(
        &self,
        mut run: JobRun,
        request: &RotationRequest,
    ) -> Result<RotationOutcome, SealError> {
        let identity = &request.identity;
        let latest = self.store.latest_version(identity).await?;
        let current = run.record.previous_version;
        let target = match &request.plan {
            RotationPlan::Create { .. } if latest.is_some() => {
                return Err(SealError::AlreadyExists {
                    identity: identity.to_string(),
                });
            }
            RotationPlan::Create { .. } => 1,
            RotationPlan::Update { .. } | RotationPlan::RotateKey { .. } => {
                let current = current.ok_or_else(|| SealError::NotFound {
                    what: format!("current version of bundle `{identity}`"),
                })?;
                latest.unwrap_or(current).max(current) + 1
            }
            RotationPlan::Restore { version } => {
                if self.store.get_artifact(identity, *version).await?.is_none() {
                    return Err(SealError::NotFound {
                        what: format!("version {version} of bundle `{identity}`"),
                    });
                }
                *version
            }
        };
        run.record.target_version = Some(target);
        self.capture_backups(&mut run, identity, false).await;
        Ok(RotationOutcome {
            record: run.record,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_kinds() {
        assert_eq!(
            RotationPlan::Restore { version: 1 }.kind(),
            JobKind::Restore
        );
        assert_eq!(
            RotationPlan::RotateKey {
                changes: BundleChanges::default()
            }
            .kind(),
            JobKind::RotateKey
        );
    }

    #[test]
    fn settings_from_config_clamp_concurrency() {
        let config = RotationConfig {
            concurrency: 0,
            ..RotationConfig::default()
        };
        let settings = RotationSettings::from(&config);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.quorum, Quorum::All);
    }

    #[test]
    fn outcome_exit_codes() {
        let record = JobRecord {
            id: "j".into(),
            identity: BundleIdentity::new("api").unwrap(),
            kind: JobKind::Update,
            state: JobState::RolledBack,
            previous_version: Some(1),
            target_version: Some(2),
            hosts: BTreeMap::new(),
            backups: BTreeMap::new(),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let outcome = RotationOutcome {
            record,
            error: Some(SealError::QuorumNotMet {
                verified: 1,
                required: 2,
            }),
        };
        assert_eq!(outcome.exit_code(), 1);
        assert!(!outcome.committed());
    }
}
