// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Utc};
use sealfleet_core::{BundleIdentity, FileStat, HostId, SealError};
use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    File,
    Directory,
}

/// Result of checking one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Ok,
    /// Mode differs from policy.
    PermissionDrift,
    OwnerMismatch,
    Missing,
    /// A file where a directory belongs, or the other way round.
    WrongType,
}

impl Verdict {
    pub fn is_violation(self) -> bool {
        self != Self::Ok
    }
}

/// One audited path on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub host: HostId,
    pub identity: BundleIdentity,
    pub path: String,
    pub kind: PathKind,
    pub observed: Option<FileStat>,
    /// Policy rendered for display, e.g. `0600`.
    pub expected: String,
    pub expected_mode: u32,
    pub verdict: Verdict,
    pub checked_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Observed mode and ownership, or `absent`.
    pub fn actual(&self) -> String {
        match &self.observed {
            Some(stat) => format!("{:04o} {}:{}", stat.mode, stat.owner, stat.group),
            None => "absent".to_string(),
        }
    }

    /// Shell command that would bring the path back in line.
    pub fn remediation(&self, owner: Option<&str>, group: Option<&str>) -> Option<String> {
        match self.verdict {
            Verdict::Ok => None,
            Verdict::PermissionDrift => {
                Some(format!("chmod {:o} {}", self.expected_mode, self.path))
            }
            Verdict::OwnerMismatch => {
                let spec = match (owner, group) {
                    (Some(o), Some(g)) => format!("{o}:{g}"),
                    (Some(o), None) => o.to_string(),
                    (None, Some(g)) => format!(":{g}"),
                    (None, None) => return None,
                };
                Some(format!("chown {spec} {}", self.path))
            }
            Verdict::Missing => Some(format!(
                "sealfleet rotate {} --hosts {}",
                self.identity, self.host
            )),
            Verdict::WrongType => Some(format!("inspect {} by hand", self.path)),
        }
    }

    /// The error form, for violations that are permission drift.
    pub fn to_error(&self) -> Option<SealError> {
        matches!(self.verdict, Verdict::PermissionDrift | Verdict::OwnerMismatch).then(|| {
            SealError::PermissionDrift {
                host: self.host.to_string(),
                path: self.path.clone(),
                expected: self.expected.clone(),
                actual: self.actual(),
            }
        })
    }
}

/// Totals across a fleet scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub hosts_scanned: usize,
    pub hosts_unreachable: usize,
    pub paths_checked: usize,
    pub violations: usize,
}

impl AuditSummary {
    pub fn is_clean(&self) -> bool {
        self.violations == 0 && self.hosts_unreachable == 0
    }
}
