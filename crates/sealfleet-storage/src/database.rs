// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database handle: one `tokio-rusqlite` connection, so every write runs on
//! the same background thread.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sealfleet_core::SealError;
use tracing::debug;

use crate::migrations;

/// Per-connection settings applied on every open.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Convert a tokio-rusqlite error into [`SealError::Storage`].
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> SealError {
    SealError::storage(e)
}

/// An open, migrated state database.
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub async fn open(path: impl AsRef<Path>, wal_mode: bool) -> Result<Self, SealError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SealError::storage)?;
        }

        // Migrations need a plain `&mut Connection`; run them before handing
        // the file to the async connection.
        let migrate_path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SealError> {
            let mut conn = rusqlite::Connection::open(&migrate_path).map_err(SealError::storage)?;
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")
                    .map_err(SealError::storage)?;
            }
            conn.execute_batch(CONNECTION_PRAGMAS)
                .map_err(SealError::storage)?;
            migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| SealError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(SealError::storage)?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(CONNECTION_PRAGMAS)
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path = %path.display(), wal_mode, "state database opened");
        Ok(Self { conn, path })
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a consistent snapshot of the database to `dest` with SQLite's
    /// online backup API.
    pub async fn backup_to(&self, dest: impl AsRef<Path>) -> Result<(), SealError> {
        let dest = dest.as_ref().to_path_buf();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let mut target = rusqlite::Connection::open(&dest)?;
                let backup = rusqlite::backup::Backup::new(conn, &mut target)?;
                // Holds the writer thread for the whole copy.
                backup.run_to_completion(256, Duration::ZERO, None)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Run SQLite's integrity check, returning any problems it reports.
    pub async fn integrity_check(&self) -> Result<Vec<String>, SealError> {
        self.conn
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare("PRAGMA integrity_check")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let problems: Vec<String> = rows
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter(|line| line != "ok")
                    .collect();
                Ok(problems)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoint the WAL so the main file is self-contained.
    pub async fn close(&self) -> Result<(), SealError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}
