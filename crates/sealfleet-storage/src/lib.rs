// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for sealfleet.
//!
//! Holds every sealed artifact version, the committed current-version
//! pointer per identity, rotation job records and per-host delivery state.
//! All access goes through one `tokio-rusqlite` connection.

pub mod database;
pub mod migrations;
pub mod queries;
pub mod store;

pub use database::Database;
pub use store::SqliteStateStore;
