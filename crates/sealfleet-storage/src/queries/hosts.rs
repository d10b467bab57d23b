// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-host, per-identity delivery records.

use std::str::FromStr;

use rusqlite::{params, OptionalExtension};
use sealfleet_core::{BundleIdentity, HostHealth, HostId, HostRecord, KeyId, SealError};

use super::{timestamp_from_sql, timestamp_to_sql, version_from_sql, version_to_sql};
use crate::database::{map_tr_err, Database};

struct HostRow {
    host: String,
    identity: String,
    last_version: Option<i64>,
    last_key_id: Option<String>,
    health: String,
    updated_at: String,
}

impl HostRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            host: row.get(0)?,
            identity: row.get(1)?,
            last_version: row.get(2)?,
            last_key_id: row.get(3)?,
            health: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<HostRecord, SealError> {
        Ok(HostRecord {
            host: HostId(self.host),
            identity: BundleIdentity::new(self.identity)?,
            last_version: self.last_version.map(version_from_sql).transpose()?,
            last_key_id: self.last_key_id.as_deref().map(KeyId::parse).transpose()?,
            health: HostHealth::from_str(&self.health)
                .map_err(|_| SealError::storage(format!("unknown host health `{}`", self.health)))?,
            updated_at: timestamp_from_sql(&self.updated_at)?,
        })
    }
}

pub async fn upsert(db: &Database, record: &HostRecord) -> Result<(), SealError> {
    let host = record.host.to_string();
    let identity = record.identity.to_string();
    let last_version = record.last_version.map(version_to_sql).transpose()?;
    let last_key_id = record.last_key_id.as_ref().map(|k| k.to_string());
    let health = record.health.to_string();
    let updated_at = timestamp_to_sql(&record.updated_at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO host_records (host, identity, last_version, last_key_id, health, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(host, identity) DO UPDATE SET \
                 last_version = ?3, last_key_id = ?4, health = ?5, updated_at = ?6",
                params![host, identity, last_version, last_key_id, health, updated_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(
    db: &Database,
    host: &HostId,
    identity: &BundleIdentity,
) -> Result<Option<HostRecord>, SealError> {
    let host = host.to_string();
    let identity = identity.to_string();
    let row = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT host, identity, last_version, last_key_id, health, updated_at \
                 FROM host_records WHERE host = ?1 AND identity = ?2",
                params![host, identity],
                HostRow::from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;
    row.map(HostRow::into_record).transpose()
}

pub async fn list(db: &Database) -> Result<Vec<HostRecord>, SealError> {
    let rows = db
        .connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT host, identity, last_version, last_key_id, health, updated_at \
                 FROM host_records ORDER BY host, identity",
            )?;
            let rows = stmt.query_map([], HostRow::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)?;
    rows.into_iter().map(HostRow::into_record).collect()
}
