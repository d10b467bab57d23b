// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sealfleet backup` and `sealfleet prune`.

use std::path::Path;

use sealfleet_core::{BundleIdentity, SealError, StateStore, EXIT_OK};
use tracing::info;

use crate::app::App;

/// Copy the state store to `dest` while it stays usable.
///
/// The copy holds ciphertext, checksums and job history only; keys live in
/// their providers.
pub async fn run_backup(app: &App, dest: &Path) -> Result<i32, SealError> {
    if dest.exists() {
        return Err(SealError::Config(format!(
            "backup destination {} already exists",
            dest.display()
        )));
    }
    app.store.database().backup_to(dest).await?;
    let size = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    let size_mb = size as f64 / (1024.0 * 1024.0);
    eprintln!("Backup complete: {size_mb:.1} MB written to {}", dest.display());
    Ok(EXIT_OK)
}

/// Versions to delete so that the newest `keep` survive.
///
/// The current version and the highest stored version are never deleted;
/// the highest one is what the next version number is allocated from.
/// `versions` must be newest first.
pub fn prune_candidates(versions: &[u64], current: Option<u64>, keep: usize) -> Vec<u64> {
    let highest = versions.iter().copied().max();
    versions
        .iter()
        .skip(keep)
        .copied()
        .filter(|v| Some(*v) != current && Some(*v) != highest)
        .collect()
}

pub async fn run_prune(
    app: &App,
    identity: BundleIdentity,
    keep: usize,
    dry_run: bool,
) -> Result<i32, SealError> {
    let versions: Vec<u64> = app
        .store
        .list_artifacts(&identity)
        .await?
        .iter()
        .map(|a| a.version)
        .collect();
    let current = app.store.current_version(&identity).await?;
    let doomed = prune_candidates(&versions, current, keep);

    if doomed.is_empty() {
        println!("Nothing to prune for {identity}.");
        return Ok(EXIT_OK);
    }
    for version in &doomed {
        if dry_run {
            println!("would delete {identity} v{version}");
        } else {
            app.store.delete_artifact(&identity, *version).await?;
            println!("deleted {identity} v{version}");
        }
    }
    if !dry_run {
        info!(identity = %identity, deleted = doomed.len(), keep, "pruned stored versions");
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_and_current() {
        assert_eq!(prune_candidates(&[5, 4, 3, 2, 1], Some(5), 2), vec![3, 2, 1]);
        // A rolled-forward current older than the kept window survives.
        assert_eq!(prune_candidates(&[5, 4, 3, 2, 1], Some(2), 2), vec![3, 1]);
        assert!(prune_candidates(&[2, 1], Some(2), 5).is_empty());
    }

    #[test]
    fn highest_version_survives_keep_zero() {
        // v3 was rolled back; current is still v2.
        assert_eq!(prune_candidates(&[3, 2, 1], Some(2), 0), vec![1]);
        assert_eq!(prune_candidates(&[3, 2, 1], None, 0), vec![2, 1]);
        assert!(prune_candidates(&[1], Some(1), 0).is_empty());
    }
}
