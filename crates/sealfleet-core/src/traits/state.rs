// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence of artifact versions, the current-version pointer, rotation
//! jobs, and host records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SealError;
use crate::job::{JobRecord, StoredArtifact};
use crate::types::{BundleIdentity, HostId, HostRecord};

/// Durable state owned by the rotation orchestrator.
///
/// Only the orchestrator's Committed transition calls
/// [`set_current_version`](Self::set_current_version).
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Store a sealed artifact. Fails if that version already exists.
    async fn put_artifact(&self, artifact: &StoredArtifact) -> Result<(), SealError>;

    async fn get_artifact(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<Option<StoredArtifact>, SealError>;

    /// All stored versions of an identity, newest first.
    async fn list_artifacts(
        &self,
        identity: &BundleIdentity,
    ) -> Result<Vec<StoredArtifact>, SealError>;

    /// Delete one stored version. Refuses to delete the current version.
    async fn delete_artifact(&self, identity: &BundleIdentity, version: u64)
        -> Result<(), SealError>;

    /// Highest stored version, committed or not.
    async fn latest_version(&self, identity: &BundleIdentity) -> Result<Option<u64>, SealError>;

    /// The committed current version.
    async fn current_version(&self, identity: &BundleIdentity)
        -> Result<Option<u64>, SealError>;

    async fn set_current_version(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<(), SealError>;

    /// Identities with at least one stored artifact.
    async fn list_identities(&self) -> Result<Vec<BundleIdentity>, SealError>;

    /// Insert or update a job record.
    async fn save_job(&self, job: &JobRecord) -> Result<(), SealError>;

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, SealError>;

    /// Jobs for an identity, newest first.
    async fn list_jobs(&self, identity: &BundleIdentity) -> Result<Vec<JobRecord>, SealError>;

    async fn upsert_host(&self, record: &HostRecord) -> Result<(), SealError>;

    async fn get_host(
        &self,
        host: &HostId,
        identity: &BundleIdentity,
    ) -> Result<Option<HostRecord>, SealError>;

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, SealError>;

    /// Take the lease on `identity` for `job_id` until `expires_at`.
    ///
    /// Returns `false` while another job holds an unexpired lease. The lease
    /// is shared by every process using the same store.
    async fn acquire_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SealError>;

    /// Extend the lease. Returns `false` if `job_id` no longer holds it.
    async fn renew_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SealError>;

    /// Drop the lease if `job_id` still holds it.
    async fn release_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
    ) -> Result<(), SealError>;
}
