// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rotation job records.

use rusqlite::{params, OptionalExtension};
use sealfleet_core::{BundleIdentity, JobRecord, SealError};

use super::timestamp_to_sql;
use crate::database::{map_tr_err, Database};

fn decode(json: &str) -> Result<JobRecord, SealError> {
    serde_json::from_str(json).map_err(SealError::storage)
}

/// Insert or replace a job. Terminal jobs are never rewritten.
pub async fn save(db: &Database, job: &JobRecord) -> Result<(), SealError> {
    let record = serde_json::to_string(job).map_err(SealError::storage)?;
    let id = job.id.clone();
    let identity = job.identity.to_string();
    let kind = job.kind.to_string();
    let state = job.state.to_string();
    let created_at = timestamp_to_sql(&job.created_at);
    let updated_at = timestamp_to_sql(&job.updated_at);

    let written = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO rotation_jobs (id, identity, kind, state, record, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(id) DO UPDATE SET state = ?4, record = ?5, updated_at = ?7 \
                 WHERE rotation_jobs.state NOT IN ('committed', 'rolled_back', 'failed', 'cancelled')",
                params![id, identity, kind, state, record, created_at, updated_at],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if written == 0 {
        return Err(SealError::storage(format!(
            "job {} is already finished and cannot be rewritten",
            job.id
        )));
    }
    Ok(())
}

pub async fn get(db: &Database, id: &str) -> Result<Option<JobRecord>, SealError> {
    let id = id.to_string();
    let json: Option<String> = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT record FROM rotation_jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    json.as_deref().map(decode).transpose()
}

/// Jobs for an identity, newest first.
pub async fn list(db: &Database, identity: &BundleIdentity) -> Result<Vec<JobRecord>, SealError> {
    let identity = identity.to_string();
    let rows = db
        .connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM rotation_jobs WHERE identity = ?1 \
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![identity], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)?;
    rows.iter().map(|json| decode(json)).collect()
}
