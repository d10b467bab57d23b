// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fleet scanning.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sealfleet_core::{BundleIdentity, Host, HostApply, HostId, SealError};
use sealfleet_fleet::RemoteLayout;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::policy::AccessPolicy;
use crate::record::{AuditRecord, AuditSummary, PathKind};

/// Audit outcome for one host.
#[derive(Debug)]
pub struct HostAudit {
    pub host: HostId,
    pub records: Vec<AuditRecord>,
    /// Set when the host could not be scanned at all.
    pub error: Option<SealError>,
}

/// A path to stat, and whether its absence is a finding.
struct Target {
    identity: BundleIdentity,
    path: String,
    kind: PathKind,
    required: bool,
}

pub struct Auditor {
    transport: Arc<dyn HostApply>,
    layout: RemoteLayout,
    policy: AccessPolicy,
    /// Identities whose hosts must hold a key file (local strategy).
    key_file_identities: HashSet<BundleIdentity>,
    concurrency: usize,
}

impl Auditor {
    pub fn new(transport: Arc<dyn HostApply>, layout: RemoteLayout, policy: AccessPolicy) -> Self {
        Self {
            transport,
            layout,
            policy,
            key_file_identities: HashSet::new(),
            concurrency: 8,
        }
    }

    /// Report a missing key file for `identity` as a finding.
    ///
    /// Without this, key files are audited only when present.
    pub fn expect_key_file(mut self, identity: BundleIdentity) -> Self {
        self.key_file_identities.insert(identity);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Paths that would be checked on `host`.
    pub fn planned_paths(&self, host: &Host) -> Vec<String> {
        self.targets(host).into_iter().map(|t| t.path).collect()
    }

    fn targets(&self, host: &Host) -> Vec<Target> {
        let Some(first) = host.bundles.first() else {
            return Vec::new();
        };
        let needs_key_dir = host
            .bundles
            .iter()
            .any(|b| self.key_file_identities.contains(b));

        let mut targets = vec![Target {
            identity: first.clone(),
            path: self.layout.artifact_dir().to_string(),
            kind: PathKind::Directory,
            required: true,
        }];
        if self.layout.key_dir() != self.layout.artifact_dir() {
            targets.push(Target {
                identity: first.clone(),
                path: self.layout.key_dir().to_string(),
                kind: PathKind::Directory,
                required: needs_key_dir,
            });
        }
        for identity in &host.bundles {
            targets.push(Target {
                identity: identity.clone(),
                path: self.layout.artifact_path(identity),
                kind: PathKind::File,
                required: true,
            });
            targets.push(Target {
                identity: identity.clone(),
                path: self.layout.key_path(identity),
                kind: PathKind::File,
                required: self.key_file_identities.contains(identity),
            });
        }
        targets
    }

    /// Stat every managed path on `host` and judge it against the policy.
    ///
    /// Read-only; running it twice against an unchanged host yields the same
    /// verdicts.
    pub async fn scan(&self, host: &Host) -> Result<Vec<AuditRecord>, SealError> {
        let targets = self.targets(host);
        if targets.is_empty() {
            debug!(host = %host.id, "host requires no bundles, nothing to audit");
            return Ok(Vec::new());
        }
        let paths: Vec<String> = targets.iter().map(|t| t.path.clone()).collect();
        let stats = self.transport.stat_all(host, &paths).await?;

        let checked_at = Utc::now();
        let mut records = Vec::with_capacity(targets.len());
        for (target, observed) in targets.into_iter().zip(stats) {
            if observed.is_none() && !target.required {
                continue;
            }
            let verdict = self.policy.judge(target.kind, observed.as_ref());
            let record = AuditRecord {
                host: host.id.clone(),
                identity: target.identity,
                expected: self.policy.describe(target.kind),
                expected_mode: self.policy.mode_for(target.kind),
                path: target.path,
                kind: target.kind,
                observed,
                verdict,
                checked_at,
            };
            if verdict.is_violation() {
                warn!(
                    host = %record.host,
                    path = %record.path,
                    verdict = %verdict,
                    expected = %record.expected,
                    actual = %record.actual(),
                    "audit finding"
                );
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Scan many hosts with bounded parallelism. Results keep input order.
    pub async fn scan_fleet(self: &Arc<Self>, hosts: &[Host]) -> (Vec<HostAudit>, AuditSummary) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, host) in hosts.iter().cloned().enumerate() {
            let auditor = Arc::clone(self);
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = auditor.scan(&host).await;
                (index, host.id, result)
            });
        }

        let mut audits: Vec<Option<HostAudit>> = hosts.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, host, result)) = joined else {
                continue;
            };
            let audit = match result {
                Ok(records) => HostAudit {
                    host,
                    records,
                    error: None,
                },
                Err(e) => {
                    warn!(host = %host, error = %e, "host could not be audited");
                    HostAudit {
                        host,
                        records: Vec::new(),
                        error: Some(e),
                    }
                }
            };
            audits[index] = Some(audit);
        }

        let audits: Vec<HostAudit> = audits
            .into_iter()
            .zip(hosts)
            .map(|(audit, host)| {
                audit.unwrap_or_else(|| HostAudit {
                    host: host.id.clone(),
                    records: Vec::new(),
                    error: Some(SealError::Internal("audit task failed".into())),
                })
            })
            .collect();

        let mut summary = AuditSummary::default();
        for audit in &audits {
            if audit.error.is_some() {
                summary.hosts_unreachable += 1;
                continue;
            }
            summary.hosts_scanned += 1;
            summary.paths_checked += audit.records.len();
            summary.violations += audit
                .records
                .iter()
                .filter(|r| r.verdict.is_violation())
                .count();
        }
        info!(
            hosts = summary.hosts_scanned,
            unreachable = summary.hosts_unreachable,
            violations = summary.violations,
            "audit complete"
        );
        (audits, summary)
    }
}
