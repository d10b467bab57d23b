// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed queries, one module per table group.

pub mod artifacts;
pub mod hosts;
pub mod jobs;
pub mod locks;

use chrono::{DateTime, Utc};
use sealfleet_core::SealError;

pub(crate) fn version_to_sql(version: u64) -> Result<i64, SealError> {
    i64::try_from(version).map_err(|_| SealError::Internal(format!("version {version} out of range")))
}

pub(crate) fn version_from_sql(value: i64) -> Result<u64, SealError> {
    u64::try_from(value)
        .map_err(|_| SealError::storage(format!("negative version {value} in state database")))
}

pub(crate) fn timestamp_to_sql(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub(crate) fn timestamp_from_sql(value: &str) -> Result<DateTime<Utc>, SealError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SealError::storage(format!("bad timestamp `{value}`: {e}")))
}
