// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rotation job states, per-host outcomes, and the persisted records that
//! describe them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::digest::Digest;
use crate::key::KeyId;
use crate::types::{BundleIdentity, HostId, StrategyId};

/// State of a rotation job.
///
/// `Pending → Building → Distributing → Verifying → {Committed | RolledBack | Failed}`,
/// plus `Cancelled` for jobs stopped before any host was touched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Building,
    Distributing,
    Verifying,
    Committed,
    RolledBack,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states are immutable history.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::Failed | Self::Cancelled
        )
    }
}

/// What a rotation job publishes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// First version of a new bundle, with a freshly generated key.
    Create,
    /// New values under the current key.
    Update,
    /// Same values re-sealed under a newly generated key.
    RotateKey,
    /// A previously stored artifact version re-published as current.
    Restore,
}

/// Outcome of a rotation job for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    Pending,
    /// The host already held the exact artifact; the push was a no-op.
    Unchanged,
    Delivered,
    /// The host never received the update and is retried on the next rotation.
    Skipped { reason: String },
    Verified,
    /// The host received the artifact but could not prove it opens it.
    VerificationFailed { reason: String },
    RolledBack,
    RollbackFailed { reason: String },
    Committed,
}

impl HostOutcome {
    /// True if the new artifact reached the host (and so may need restoring).
    pub fn received(&self) -> bool {
        matches!(
            self,
            Self::Unchanged | Self::Delivered | Self::Verified | Self::VerificationFailed { .. }
        )
    }

    /// Short label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unchanged => "unchanged",
            Self::Delivered => "delivered",
            Self::Skipped { .. } => "skipped",
            Self::Verified => "verified",
            Self::VerificationFailed { .. } => "verify-failed",
            Self::RolledBack => "rolled-back",
            Self::RollbackFailed { .. } => "rollback-failed",
            Self::Committed => "committed",
        }
    }

    /// Failure detail, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Skipped { reason }
            | Self::VerificationFailed { reason }
            | Self::RollbackFailed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// What a host held before the rotation touched it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Version parsed from the deployed artifact header; `None` for a fresh host.
    pub version: Option<u64>,
    pub checksum: Option<Digest>,
}

/// Persisted description of a rotation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub identity: BundleIdentity,
    pub kind: JobKind,
    pub state: JobState,
    pub previous_version: Option<u64>,
    pub target_version: Option<u64>,
    pub hosts: BTreeMap<HostId, HostOutcome>,
    pub backups: BTreeMap<HostId, BackupSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sealed artifact version as held by the state store. Write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub identity: BundleIdentity,
    pub version: u64,
    pub checksum: Digest,
    pub strategy: StrategyId,
    pub key_id: KeyId,
    /// The full `<name>.enc` file contents (header + armored ciphertext).
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}
