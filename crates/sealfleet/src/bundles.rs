// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sealfleet create`, `edit` and `view`.

use std::path::PathBuf;

use clap::Args;
use sealfleet_core::{BundleIdentity, SealError, StateStore, StrategyId};
use sealfleet_fleet::RotationPlan;
use sealfleet_vault::prompt::{parse_assignment, read_dotenv_file, read_secret_value};
use sealfleet_vault::{Bundle, BundleChanges, EncryptedArtifact, SecretValue};
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::rotate::{run_plan, RolloutArgs};

/// Where new secret values come from. Values are never read from an editor
/// temp file.
#[derive(Args, Debug, Default, Clone)]
pub struct SecretInput {
    /// Read `NAME=VALUE` lines from a dotenv-style file.
    #[arg(long = "from-file", value_name = "PATH")]
    pub from_file: Option<PathBuf>,

    /// Set one value inline (visible in the process list; prefer --prompt).
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Prompt for a value without echo.
    #[arg(long = "prompt", value_name = "NAME")]
    pub prompt: Vec<String>,
}

impl SecretInput {
    /// File entries first, then `--set`, then prompts.
    pub fn collect(&self) -> Result<Vec<(String, SecretValue)>, SealError> {
        let mut entries = match &self.from_file {
            Some(path) => read_dotenv_file(path)?,
            None => Vec::new(),
        };
        for arg in &self.set {
            entries.push(parse_assignment(arg)?);
        }
        for name in &self.prompt {
            entries.push((name.clone(), read_secret_value(name)?));
        }
        Ok(entries)
    }
}

pub async fn run_create(
    app: &App,
    identity: BundleIdentity,
    input: &SecretInput,
    strategy: Option<StrategyId>,
    rollout: &RolloutArgs,
    cancel: CancellationToken,
) -> Result<i32, SealError> {
    let secrets = input.collect()?;
    if secrets.is_empty() {
        return Err(SealError::Config(
            "no secrets given; use --from-file, --set or --prompt".into(),
        ));
    }
    run_plan(app, identity, RotationPlan::Create { secrets, strategy }, rollout, cancel).await
}

pub async fn run_edit(
    app: &App,
    identity: BundleIdentity,
    input: &SecretInput,
    unset: Vec<String>,
    rotate_key: bool,
    rollout: &RolloutArgs,
    cancel: CancellationToken,
) -> Result<i32, SealError> {
    let changes = BundleChanges {
        set: input.collect()?,
        unset,
    };
    if changes.is_empty() && !rotate_key {
        return Err(SealError::Config(
            "nothing to change; use --set, --prompt, --from-file or --unset".into(),
        ));
    }
    let plan = if rotate_key {
        RotationPlan::RotateKey { changes }
    } else {
        RotationPlan::Update { changes }
    };
    run_plan(app, identity, plan, rollout, cancel).await
}

/// Decrypt a stored version (the current one by default).
pub async fn open_stored(
    app: &App,
    identity: &BundleIdentity,
    version: Option<u64>,
) -> Result<Bundle, SealError> {
    let version = match version {
        Some(v) => v,
        None => app
            .store
            .current_version(identity)
            .await?
            .ok_or_else(|| SealError::NotFound {
                what: format!("bundle `{identity}`"),
            })?,
    };
    let stored = app
        .store
        .get_artifact(identity, version)
        .await?
        .ok_or_else(|| SealError::NotFound {
            what: format!("version {version} of bundle `{identity}`"),
        })?;
    let artifact = EncryptedArtifact::parse(&stored.bytes)?;
    let key = app
        .keys
        .get(artifact.strategy())?
        .resolve_key(identity, artifact.key_id())
        .await?;
    sealfleet_vault::open(&artifact, &key)
}

pub async fn run_view(
    app: &App,
    identity: BundleIdentity,
    version: Option<u64>,
    keys_only: bool,
) -> Result<i32, SealError> {
    let bundle = open_stored(app, &identity, version).await?;
    if keys_only {
        println!("# {} v{}", bundle.identity(), bundle.version());
        for (name, masked) in bundle.masked() {
            println!("{name}  {masked}");
        }
    } else {
        for (name, value) in bundle.iter() {
            println!("{name}={}", value.expose());
        }
    }
    Ok(sealfleet_core::EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_values_follow_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        std::fs::write(&path, "DB_PASSWORD=one\n").unwrap();
        let input = SecretInput {
            from_file: Some(path),
            set: vec!["API_KEY=two".into()],
            prompt: Vec::new(),
        };
        let entries = input.collect().unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["DB_PASSWORD", "API_KEY"]);
        assert_eq!(entries[1].1.expose(), "two");
    }

    #[test]
    fn malformed_assignment_is_rejected() {
        let input = SecretInput {
            set: vec!["NOVALUE".into()],
            ..SecretInput::default()
        };
        assert!(input.collect().is_err());
    }
}
