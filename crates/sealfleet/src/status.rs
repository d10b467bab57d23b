// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sealfleet status` and `sealfleet history`.

use chrono::{DateTime, Utc};
use colored::Colorize;
use sealfleet_core::{BundleIdentity, HostHealth, SealError, StateStore, EXIT_OK};
use serde::Serialize;

use crate::app::App;
use crate::output;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct BundleStatus {
    pub identity: String,
    pub current_version: Option<u64>,
    pub latest_version: Option<u64>,
    pub strategy: Option<String>,
    pub key_id: Option<String>,
    /// First 16 hex chars of the current artifact checksum.
    pub fingerprint: Option<String>,
    pub hosts: Vec<HostStatus>,
}

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub host: String,
    pub version: Option<u64>,
    pub health: HostHealth,
    pub updated_at: DateTime<Utc>,
}

pub async fn collect_status(
    app: &App,
    only: Option<&BundleIdentity>,
) -> Result<Vec<BundleStatus>, SealError> {
    let identities = match only {
        Some(identity) => vec![identity.clone()],
        None => app.store.list_identities().await?,
    };
    let host_records = app.store.list_hosts().await?;

    let mut out = Vec::with_capacity(identities.len());
    for identity in identities {
        let current = app.store.current_version(&identity).await?;
        let latest = app.store.latest_version(&identity).await?;
        let stored = match current {
            Some(v) => app.store.get_artifact(&identity, v).await?,
            None => None,
        };
        let hosts = host_records
            .iter()
            .filter(|r| r.identity == identity)
            .map(|r| HostStatus {
                host: r.host.to_string(),
                version: r.last_version,
                health: r.health,
                updated_at: r.updated_at,
            })
            .collect();
        out.push(BundleStatus {
            identity: identity.to_string(),
            current_version: current,
            latest_version: latest,
            strategy: stored.as_ref().map(|s| s.strategy.to_string()),
            key_id: stored.as_ref().map(|s| s.key_id.to_string()),
            fingerprint: stored.as_ref().map(|s| s.checksum.fingerprint().to_string()),
            hosts,
        });
    }
    Ok(out)
}

pub async fn run_status(
    app: &App,
    identity: Option<BundleIdentity>,
    json: bool,
    plain: bool,
) -> Result<i32, SealError> {
    let statuses = collect_status(app, identity.as_ref()).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(EXIT_OK);
    }

    let color = output::use_color(plain);
    output::heading("sealfleet status", 60);
    if statuses.is_empty() {
        println!("    No bundles yet. Create one with: sealfleet create <identity>");
    }
    for status in &statuses {
        let version = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| format!("v{v}"));
        println!(
            "    {}  current {}  latest {}  {} {}",
            if color {
                status.identity.bold().to_string()
            } else {
                status.identity.clone()
            },
            version(status.current_version),
            version(status.latest_version),
            status.strategy.as_deref().unwrap_or("-"),
            status.fingerprint.as_deref().unwrap_or(""),
        );
        for host in &status.hosts {
            let behind = host.version != status.current_version;
            let ok = host.health == HostHealth::Healthy && !behind;
            println!(
                "      {} {:<16} {:<6} {}",
                output::marker(ok, color),
                host.host,
                version(host.version),
                host.health,
            );
        }
    }
    println!();
    Ok(EXIT_OK)
}

pub async fn run_history(
    app: &App,
    identity: BundleIdentity,
    limit: usize,
    json: bool,
) -> Result<i32, SealError> {
    let mut jobs = app.store.list_jobs(&identity).await?;
    jobs.truncate(limit);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&jobs).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(EXIT_OK);
    }

    output::heading(&format!("sealfleet history {identity}"), 80);
    for job in &jobs {
        let failed = job.hosts.values().filter(|o| o.reason().is_some()).count();
        println!(
            "    {}  {:<10} {:<12} {:>4} -> {:<4} hosts {} ({} with problems)  {}",
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.kind.to_string(),
            job.state.to_string(),
            job.previous_version
                .map_or_else(|| "-".to_string(), |v| format!("v{v}")),
            job.target_version
                .map_or_else(|| "-".to_string(), |v| format!("v{v}")),
            job.hosts.len(),
            failed,
            job.id,
        );
    }
    if jobs.is_empty() {
        println!("    No jobs recorded.");
    }
    println!();
    Ok(EXIT_OK)
}
