// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sealfleet rotate` and `sealfleet restore`, plus the shared job runner
//! used by `create` and `edit`.

use clap::Args;
use sealfleet_core::{BundleIdentity, JobRecord, SealError, StateStore};
use sealfleet_fleet::{RotationOutcome, RotationPlan, RotationRequest};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::App;
use crate::output;

/// Flags shared by every command that publishes to hosts.
#[derive(Args, Debug, Default, Clone)]
pub struct RolloutArgs {
    /// Only these hosts (comma separated inventory ids).
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub hosts: Option<Vec<String>>,

    /// Show the plan without storing anything or touching hosts.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the job record as JSON.
    #[arg(long)]
    pub json: bool,

    /// Disable colored output.
    #[arg(long)]
    pub plain: bool,
}

/// Run a job for `identity` against its inventory hosts and report it.
pub async fn run_plan(
    app: &App,
    identity: BundleIdentity,
    plan: RotationPlan,
    rollout: &RolloutArgs,
    cancel: CancellationToken,
) -> Result<i32, SealError> {
    let hosts = app.hosts_for(&identity, rollout.hosts.as_deref())?;
    if hosts.is_empty() {
        info!(identity = %identity, "no inventory host requires this bundle");
    }
    let request = RotationRequest {
        identity,
        hosts,
        plan,
        dry_run: rollout.dry_run,
    };
    let outcome = app.orchestrator().run(request, cancel).await?;
    report(&outcome, rollout);
    Ok(outcome.exit_code())
}

fn report(outcome: &RotationOutcome, rollout: &RolloutArgs) {
    if rollout.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome.record).unwrap_or_else(|_| "{}".to_string())
        );
        return;
    }
    if rollout.dry_run {
        print_dry_run(&outcome.record);
    } else {
        output::print_job(&outcome.record, output::use_color(rollout.plain));
    }
}

fn print_dry_run(record: &JobRecord) {
    output::heading(
        &format!("sealfleet {} {} (dry run)", record.kind, record.identity),
        60,
    );
    println!(
        "    Would publish v{} to {} host(s):",
        record.target_version.unwrap_or_default(),
        record.hosts.len()
    );
    for (host, outcome) in &record.hosts {
        let current = record
            .backups
            .get(host)
            .and_then(|b| b.version)
            .map_or_else(|| "nothing".to_string(), |v| format!("v{v}"));
        match outcome.reason() {
            Some(reason) => println!("      {host}: unreachable ({reason})"),
            None => println!("      {host}: currently {current}"),
        }
    }
    println!();
}

/// Re-publish the current version, or seal the current values under a new
/// key with `rotate_key`. Hosts skipped by earlier jobs catch up here.
pub async fn run_rotate(
    app: &App,
    identity: BundleIdentity,
    rotate_key: bool,
    rollout: &RolloutArgs,
    cancel: CancellationToken,
) -> Result<i32, SealError> {
    let plan = if rotate_key {
        RotationPlan::RotateKey {
            changes: Default::default(),
        }
    } else {
        let version = app
            .store
            .current_version(&identity)
            .await?
            .ok_or_else(|| SealError::NotFound {
                what: format!("bundle `{identity}`"),
            })?;
        RotationPlan::Restore { version }
    };
    run_plan(app, identity, plan, rollout, cancel).await
}

pub async fn run_restore(
    app: &App,
    identity: BundleIdentity,
    version: u64,
    rollout: &RolloutArgs,
    cancel: CancellationToken,
) -> Result<i32, SealError> {
    run_plan(app, identity, RotationPlan::Restore { version }, rollout, cancel).await
}
