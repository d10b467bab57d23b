// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal rendering shared by commands.

use std::io::IsTerminal;

use colored::Colorize;
use sealfleet_core::{HostOutcome, JobRecord, JobState};

/// Colors only on a terminal, and never with `--plain`.
pub fn use_color(plain: bool) -> bool {
    !plain && std::io::stdout().is_terminal()
}

pub fn heading(title: &str, width: usize) {
    println!();
    println!("  {title}");
    println!("  {}", "-".repeat(width));
}

/// `[OK]`-style marker, colored when allowed.
pub fn marker(ok: bool, color: bool) -> String {
    match (ok, color) {
        (true, true) => "✓".green().to_string(),
        (false, true) => "✗".red().to_string(),
        (true, false) => "[OK]".to_string(),
        (false, false) => "[FAIL]".to_string(),
    }
}

fn outcome_ok(outcome: &HostOutcome) -> bool {
    matches!(
        outcome,
        HostOutcome::Committed
            | HostOutcome::Verified
            | HostOutcome::Delivered
            | HostOutcome::Unchanged
            | HostOutcome::RolledBack
            | HostOutcome::Pending
    )
}

fn state_label(state: JobState, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        JobState::Committed => label.green().bold().to_string(),
        JobState::RolledBack | JobState::Cancelled => label.yellow().bold().to_string(),
        JobState::Failed => label.red().bold().to_string(),
        _ => label,
    }
}

/// Per-host outcome table followed by the overall verdict.
pub fn print_job(record: &JobRecord, color: bool) {
    heading(
        &format!("sealfleet {} {}", record.kind, record.identity),
        60,
    );
    let width = record
        .hosts
        .keys()
        .map(|h| h.as_str().len())
        .max()
        .unwrap_or(4)
        .max(4);
    for (host, outcome) in &record.hosts {
        let backup = record
            .backups
            .get(host)
            .and_then(|b| b.version)
            .map_or_else(|| "-".to_string(), |v| format!("v{v}"));
        let mut line = format!(
            "    {} {:<width$}  {:<16} was {}",
            marker(outcome_ok(outcome), color),
            host.as_str(),
            outcome.label(),
            backup,
        );
        if let Some(reason) = outcome.reason() {
            line.push_str(&format!("  ({reason})"));
        }
        println!("{line}");
    }
    println!();
    let versions = match (record.previous_version, record.target_version) {
        (Some(p), Some(t)) => format!("v{p} -> v{t}"),
        (None, Some(t)) => format!("new -> v{t}"),
        (Some(p), None) => format!("v{p}"),
        (None, None) => "-".to_string(),
    };
    println!(
        "  Job {}: {} ({versions})",
        record.id,
        state_label(record.state, color)
    );
    if let Some(error) = &record.error {
        println!("  Reason: {error}");
    }
    println!();
}
