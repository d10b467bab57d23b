// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Artifact versions and the current-version pointer.

use std::str::FromStr;

use rusqlite::{params, OptionalExtension};
use sealfleet_core::{BundleIdentity, Digest, KeyId, SealError, StoredArtifact, StrategyId};

use super::{timestamp_from_sql, timestamp_to_sql, version_from_sql, version_to_sql};
use crate::database::{map_tr_err, Database};

const SELECT_COLUMNS: &str =
    "SELECT identity, version, checksum, strategy, key_id, bytes, created_at FROM artifacts";

struct ArtifactRow {
    identity: String,
    version: i64,
    checksum: String,
    strategy: String,
    key_id: String,
    bytes: Vec<u8>,
    created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            version: row.get(1)?,
            checksum: row.get(2)?,
            strategy: row.get(3)?,
            key_id: row.get(4)?,
            bytes: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_artifact(self) -> Result<StoredArtifact, SealError> {
        Ok(StoredArtifact {
            identity: BundleIdentity::new(self.identity)?,
            version: version_from_sql(self.version)?,
            checksum: Digest::from_str(&self.checksum)?,
            strategy: StrategyId::from_str(&self.strategy)
                .map_err(|_| SealError::storage(format!("unknown strategy `{}`", self.strategy)))?,
            key_id: KeyId::parse(&self.key_id)?,
            bytes: self.bytes,
            created_at: timestamp_from_sql(&self.created_at)?,
        })
    }
}

/// Insert a new artifact version. An existing `(identity, version)` is an error.
pub async fn insert(db: &Database, artifact: &StoredArtifact) -> Result<(), SealError> {
    let identity = artifact.identity.to_string();
    let version = version_to_sql(artifact.version)?;
    let checksum = artifact.checksum.to_string();
    let strategy = artifact.strategy.to_string();
    let key_id = artifact.key_id.to_string();
    let bytes = artifact.bytes.clone();
    let created_at = timestamp_to_sql(&artifact.created_at);

    let inserted = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO artifacts \
                 (identity, version, checksum, strategy, key_id, bytes, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![identity, version, checksum, strategy, key_id, bytes, created_at],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if inserted == 0 {
        return Err(SealError::storage(format!(
            "artifact `{}` v{} is already stored",
            artifact.identity, artifact.version
        )));
    }
    Ok(())
}

pub async fn get(
    db: &Database,
    identity: &BundleIdentity,
    version: u64,
) -> Result<Option<StoredArtifact>, SealError> {
    let identity = identity.to_string();
    let version = version_to_sql(version)?;
    let row = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE identity = ?1 AND version = ?2"),
                params![identity, version],
                ArtifactRow::from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    row.map(ArtifactRow::into_artifact).transpose()
}

/// All versions of an identity, newest first.
pub async fn list(db: &Database, identity: &BundleIdentity) -> Result<Vec<StoredArtifact>, SealError> {
    let identity = identity.to_string();
    let rows = db
        .connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} WHERE identity = ?1 ORDER BY version DESC"))?;
            let rows = stmt.query_map(params![identity], ArtifactRow::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)?;
    rows.into_iter().map(ArtifactRow::into_artifact).collect()
}

/// Delete one version unless it is the current one.
pub async fn delete(db: &Database, identity: &BundleIdentity, version: u64) -> Result<(), SealError> {
    if current_version(db, identity).await? == Some(version) {
        return Err(SealError::Config(format!(
            "version {version} of `{identity}` is current and cannot be deleted"
        )));
    }
    let id = identity.to_string();
    let v = version_to_sql(version)?;
    let deleted = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM artifacts WHERE identity = ?1 AND version = ?2",
                params![id, v],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if deleted == 0 {
        return Err(SealError::NotFound {
            what: format!("version {version} of bundle `{identity}`"),
        });
    }
    Ok(())
}

pub async fn latest_version(db: &Database, identity: &BundleIdentity) -> Result<Option<u64>, SealError> {
    let identity = identity.to_string();
    let max: Option<i64> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT MAX(version) FROM artifacts WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)?;
    max.map(version_from_sql).transpose()
}

pub async fn current_version(db: &Database, identity: &BundleIdentity) -> Result<Option<u64>, SealError> {
    let identity = identity.to_string();
    let current: Option<i64> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT version FROM current_versions WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    current.map(version_from_sql).transpose()
}

/// Point `identity` at a stored version.
pub async fn set_current_version(
    db: &Database,
    identity: &BundleIdentity,
    version: u64,
) -> Result<(), SealError> {
    let id = identity.to_string();
    let v = version_to_sql(version)?;
    let now = timestamp_to_sql(&chrono::Utc::now());
    let exists: bool = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE identity = ?1 AND version = ?2)",
                params![id, v],
                |row| row.get(0),
            )?;
            if exists {
                tx.execute(
                    "INSERT INTO current_versions (identity, version, updated_at) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(identity) DO UPDATE SET version = ?2, updated_at = ?3",
                    params![id, v, now],
                )?;
            }
            tx.commit()?;
            Ok(exists)
        })
        .await
        .map_err(map_tr_err)?;
    if !exists {
        return Err(SealError::NotFound {
            what: format!("version {version} of bundle `{identity}`"),
        });
    }
    Ok(())
}

pub async fn list_identities(db: &Database) -> Result<Vec<BundleIdentity>, SealError> {
    let names = db
        .connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT identity FROM artifacts ORDER BY identity")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)?;
    names.into_iter().map(BundleIdentity::new).collect()
}
