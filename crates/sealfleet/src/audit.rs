// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sealfleet audit`.

use std::sync::Arc;

use colored::Colorize;
use sealfleet_audit::{AuditSummary, HostAudit};
use sealfleet_core::{BundleIdentity, SealError, EXIT_OK, EXIT_OPERATIONAL};

use crate::app::App;
use crate::output;

pub async fn run_audit(
    app: &App,
    identity: Option<BundleIdentity>,
    hosts: Option<&[String]>,
    dry_run: bool,
    plain: bool,
) -> Result<i32, SealError> {
    let mut targets = app.all_hosts(hosts)?;
    if let Some(identity) = &identity {
        for host in &mut targets {
            host.bundles.retain(|b| b == identity);
        }
        targets.retain(|h| !h.bundles.is_empty());
    }
    let auditor = app.auditor().await?;

    if dry_run {
        output::heading("sealfleet audit (dry run)", 60);
        for host in &targets {
            println!("    {}", host.id);
            for path in auditor.planned_paths(host) {
                println!("      {path}");
            }
        }
        println!();
        return Ok(EXIT_OK);
    }

    let auditor = Arc::new(auditor);
    let (audits, summary) = auditor.scan_fleet(&targets).await;
    print_audits(&audits, &summary, app, output::use_color(plain));
    Ok(if summary.is_clean() {
        EXIT_OK
    } else {
        EXIT_OPERATIONAL
    })
}

fn print_audits(audits: &[HostAudit], summary: &AuditSummary, app: &App, color: bool) {
    let owner = app.config.audit.owner.as_deref();
    let group = app.config.audit.group.as_deref();
    output::heading("sealfleet audit", 70);
    for audit in audits {
        if let Some(error) = &audit.error {
            println!("    {} {}  unreachable: {error}", output::marker(false, color), audit.host);
            continue;
        }
        let findings: Vec<_> = audit
            .records
            .iter()
            .filter(|r| r.verdict.is_violation())
            .collect();
        println!(
            "    {} {}  {} path(s), {} finding(s)",
            output::marker(findings.is_empty(), color),
            audit.host,
            audit.records.len(),
            findings.len()
        );
        for record in findings {
            let verdict = if color {
                record.verdict.to_string().red().to_string()
            } else {
                record.verdict.to_string()
            };
            println!(
                "        {verdict} {}  expected {}, found {}",
                record.path,
                record.expected,
                record.actual()
            );
            if let Some(fix) = record.remediation(owner, group) {
                println!("          fix: {fix}");
            }
        }
    }
    println!();
    println!(
        "  {} host(s) scanned, {} unreachable, {} finding(s) in {} path(s)",
        summary.hosts_scanned, summary.hosts_unreachable, summary.violations, summary.paths_checked
    );
    println!("  Nothing was changed.");
    println!();
}
