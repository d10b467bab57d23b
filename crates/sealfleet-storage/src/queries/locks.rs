// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Leased per-identity job locks.

use chrono::{DateTime, Utc};
use rusqlite::params;
use sealfleet_core::{BundleIdentity, SealError};

use crate::database::{map_tr_err, Database};

/// Take the lease for `job_id`, or take over one that has expired.
pub async fn acquire(
    db: &Database,
    identity: &BundleIdentity,
    job_id: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, SealError> {
    let identity = identity.to_string();
    let job_id = job_id.to_string();
    let now = now.timestamp_millis();
    let expires_at = expires_at.timestamp_millis();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO identity_locks (identity, job_id, acquired_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(identity) DO UPDATE SET \
                 job_id = excluded.job_id, acquired_at = excluded.acquired_at, \
                 expires_at = excluded.expires_at \
                 WHERE identity_locks.expires_at <= ?3 OR identity_locks.job_id = ?2",
                params![identity, job_id, now, expires_at],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

/// Extend a lease still held by `job_id`.
pub async fn renew(
    db: &Database,
    identity: &BundleIdentity,
    job_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, SealError> {
    let identity = identity.to_string();
    let job_id = job_id.to_string();
    let expires_at = expires_at.timestamp_millis();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE identity_locks SET expires_at = ?3 WHERE identity = ?1 AND job_id = ?2",
                params![identity, job_id, expires_at],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

pub async fn release(
    db: &Database,
    identity: &BundleIdentity,
    job_id: &str,
) -> Result<(), SealError> {
    let identity = identity.to_string();
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM identity_locks WHERE identity = ?1 AND job_id = ?2",
                params![identity, job_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
