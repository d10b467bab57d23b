// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of [`StateStore`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sealfleet_config::model::StorageConfig;
use sealfleet_core::{
    BundleIdentity, HostId, HostRecord, JobRecord, SealError, StateStore, StoredArtifact,
};

use crate::database::Database;
use crate::queries;

/// State store backed by a single SQLite file.
pub struct SqliteStateStore {
    db: Database,
}

impl SqliteStateStore {
    /// Open the database named by the storage configuration.
    pub async fn open(config: &StorageConfig) -> Result<Self, SealError> {
        Self::open_path(&config.database_path, config.wal_mode).await
    }

    pub async fn open_path(path: impl AsRef<Path>, wal_mode: bool) -> Result<Self, SealError> {
        Ok(Self {
            db: Database::open(path, wal_mode).await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn put_artifact(&self, artifact: &StoredArtifact) -> Result<(), SealError> {
        queries::artifacts::insert(&self.db, artifact).await
    }

    async fn get_artifact(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<Option<StoredArtifact>, SealError> {
        queries::artifacts::get(&self.db, identity, version).await
    }

    async fn list_artifacts(
        &self,
        identity: &BundleIdentity,
    ) -> Result<Vec<StoredArtifact>, SealError> {
        queries::artifacts::list(&self.db, identity).await
    }

    async fn delete_artifact(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<(), SealError> {
        queries::artifacts::delete(&self.db, identity, version).await
    }

    async fn latest_version(&self, identity: &BundleIdentity) -> Result<Option<u64>, SealError> {
        queries::artifacts::latest_version(&self.db, identity).await
    }

    async fn current_version(
        &self,
        identity: &BundleIdentity,
    ) -> Result<Option<u64>, SealError> {
        queries::artifacts::current_version(&self.db, identity).await
    }

    async fn set_current_version(
        &self,
        identity: &BundleIdentity,
        version: u64,
    ) -> Result<(), SealError> {
        queries::artifacts::set_current_version(&self.db, identity, version).await
    }

    async fn list_identities(&self) -> Result<Vec<BundleIdentity>, SealError> {
        queries::artifacts::list_identities(&self.db).await
    }

    async fn save_job(&self, job: &JobRecord) -> Result<(), SealError> {
        queries::jobs::save(&self.db, job).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, SealError> {
        queries::jobs::get(&self.db, id).await
    }

    async fn list_jobs(&self, identity: &BundleIdentity) -> Result<Vec<JobRecord>, SealError> {
        queries::jobs::list(&self.db, identity).await
    }

    async fn upsert_host(&self, record: &HostRecord) -> Result<(), SealError> {
        queries::hosts::upsert(&self.db, record).await
    }

    async fn get_host(
        &self,
        host: &HostId,
        identity: &BundleIdentity,
    ) -> Result<Option<HostRecord>, SealError> {
        queries::hosts::get(&self.db, host, identity).await
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, SealError> {
        queries::hosts::list(&self.db).await
    }

    async fn acquire_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SealError> {
        queries::locks::acquire(&self.db, identity, job_id, Utc::now(), expires_at).await
    }

    async fn renew_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SealError> {
        queries::locks::renew(&self.db, identity, job_id, expires_at).await
    }

    async fn release_identity_lock(
        &self,
        identity: &BundleIdentity,
        job_id: &str,
    ) -> Result<(), SealError> {
        queries::locks::release(&self.db, identity, job_id).await
    }
}
