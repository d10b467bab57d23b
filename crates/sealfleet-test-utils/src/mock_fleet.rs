// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory hosts for deterministic rotation tests.
//!
//! `MockFleet` implements [`HostApply`], [`HostVerifier`] and
//! [`ServiceHooks`] over per-host file maps. Individual hosts can be made
//! unreachable, slow, failing verification or unhealthy after restart, or
//! made to drop the connection partway through a push.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use sealfleet_core::{
    ApplyResult, BundleIdentity, CommandOutput, Digest, ExecOutput, ExpectedArtifact,
    FilePlacement, FileStat, HealthStatus, Host, HostApply, HostCommand, HostId, HostVerifier,
    SealError, ServiceHooks,
};
use sealfleet_vault::EncryptedArtifact;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct MockFile {
    contents: Vec<u8>,
    mode: u32,
}

#[derive(Debug, Default)]
struct HostState {
    files: BTreeMap<String, MockFile>,
    unreachable: bool,
    fail_verify: bool,
    unhealthy: bool,
    push_delay: Option<Duration>,
    /// Files placed before the connection drops, and how many pushes drop.
    drop_after: Option<(usize, usize)>,
    placements: usize,
    restarts: usize,
}

/// A fleet of in-memory hosts.
#[derive(Debug, Default)]
pub struct MockFleet {
    hosts: Mutex<HashMap<HostId, HostState>>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reachable, empty host.
    pub async fn add_host(&self, id: &str) -> Host {
        self.hosts
            .lock()
            .await
            .insert(HostId::from(id), HostState::default());
        Host::new(id, format!("mock://{id}"))
    }

    async fn with_host<T>(&self, id: &str, f: impl FnOnce(&mut HostState) -> T) -> Option<T> {
        let mut hosts = self.hosts.lock().await;
        hosts.get_mut(&HostId::from(id)).map(f)
    }

    pub async fn set_unreachable(&self, id: &str, unreachable: bool) {
        self.with_host(id, |h| h.unreachable = unreachable).await;
    }

    pub async fn fail_verification(&self, id: &str, fail: bool) {
        self.with_host(id, |h| h.fail_verify = fail).await;
    }

    pub async fn set_unhealthy(&self, id: &str, unhealthy: bool) {
        self.with_host(id, |h| h.unhealthy = unhealthy).await;
    }

    /// Delay every placement on `id`.
    pub async fn set_push_delay(&self, id: &str, delay: Option<Duration>) {
        self.with_host(id, |h| h.push_delay = delay).await;
    }

    /// For the next `pushes` pushes to `id`, place only the first `files`
    /// files, then fail with a transient connection error.
    pub async fn drop_connection_after(&self, id: &str, files: usize, pushes: usize) {
        self.with_host(id, |h| h.drop_after = (pushes > 0).then_some((files, pushes)))
            .await;
    }

    pub async fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.with_host(id, |h| h.files.get(path).map(|f| f.contents.clone()))
            .await
            .flatten()
    }

    pub async fn file_mode(&self, id: &str, path: &str) -> Option<u32> {
        self.with_host(id, |h| h.files.get(path).map(|f| f.mode))
            .await
            .flatten()
    }

    pub async fn set_file_mode(&self, id: &str, path: &str, mode: u32) {
        self.with_host(id, |h| {
            if let Some(f) = h.files.get_mut(path) {
                f.mode = mode;
            }
        })
        .await;
    }

    /// Version from the header of the artifact at `path`, if one is deployed.
    pub async fn deployed_version(&self, id: &str, path: &str) -> Option<u64> {
        let bytes = self.file(id, path).await?;
        EncryptedArtifact::parse(&bytes).ok().map(|a| a.version())
    }

    /// Number of `apply` calls on `id` that placed at least one file.
    pub async fn placements(&self, id: &str) -> usize {
        self.with_host(id, |h| h.placements).await.unwrap_or(0)
    }

    pub async fn restarts(&self, id: &str) -> usize {
        self.with_host(id, |h| h.restarts).await.unwrap_or(0)
    }
}

fn unreachable(host: &Host) -> SealError {
    SealError::DistributionError {
        host: host.id.to_string(),
        message: "connection refused".into(),
        transient: true,
    }
}

fn stat(state: &HostState, path: &str) -> Option<FileStat> {
    if let Some(file) = state.files.get(path) {
        return Some(FileStat {
            mode: file.mode,
            owner: "root".into(),
            group: "root".into(),
            is_dir: false,
        });
    }
    let prefix = format!("{}/", path.trim_end_matches('/'));
    state
        .files
        .keys()
        .any(|p| p.starts_with(&prefix))
        .then(|| FileStat {
            mode: 0o700,
            owner: "root".into(),
            group: "root".into(),
            is_dir: true,
        })
}

#[async_trait]
impl HostApply for MockFleet {
    async fn apply(
        &self,
        host: &Host,
        files: Vec<FilePlacement>,
        commands: Vec<HostCommand>,
    ) -> Result<ApplyResult, SealError> {
        let delay = {
            let hosts = self.hosts.lock().await;
            match hosts.get(&host.id) {
                Some(state) if !state.unreachable => state.push_delay,
                _ => return Err(unreachable(host)),
            }
        };
        if !files.is_empty()
            && let Some(delay) = delay
        {
            tokio::time::sleep(delay).await;
        }

        let mut hosts = self.hosts.lock().await;
        let state = hosts.get_mut(&host.id).ok_or_else(|| unreachable(host))?;
        if !files.is_empty() {
            state.placements += 1;
        }
        let drop_after = match state.drop_after {
            Some((after, pushes)) if after < files.len() => {
                state.drop_after = (pushes > 1).then_some((after, pushes - 1));
                Some(after)
            }
            _ => None,
        };
        for (placed, file) in files.into_iter().enumerate() {
            if drop_after == Some(placed) {
                return Err(SealError::DistributionError {
                    host: host.id.to_string(),
                    message: "connection reset".into(),
                    transient: true,
                });
            }
            state.files.insert(
                file.path,
                MockFile {
                    contents: file.contents.to_vec(),
                    mode: file.mode,
                },
            );
        }

        let outputs = commands
            .into_iter()
            .map(|command| match command {
                HostCommand::ReadFile { path } => {
                    CommandOutput::File(state.files.get(&path).map(|f| f.contents.clone()))
                }
                HostCommand::Digest { path } => CommandOutput::Digest(
                    state
                        .files
                        .get(&path)
                        .map(|f| Digest::sha256(&f.contents).hex().to_string()),
                ),
                HostCommand::Stat { path } => CommandOutput::Stat(stat(state, &path)),
                HostCommand::Remove { path } => {
                    state.files.remove(&path);
                    CommandOutput::Removed
                }
                HostCommand::Exec { .. } => CommandOutput::Exec(ExecOutput {
                    status: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
            })
            .collect();
        Ok(ApplyResult { outputs })
    }
}

#[async_trait]
impl HostVerifier for MockFleet {
    async fn verify(&self, host: &Host, expected: &ExpectedArtifact) -> Result<(), SealError> {
        let failed = |message: &str| SealError::VerificationFailed {
            host: host.id.to_string(),
            message: message.to_string(),
        };
        let hosts = self.hosts.lock().await;
        let state = hosts.get(&host.id).ok_or_else(|| unreachable(host))?;
        if state.unreachable {
            return Err(unreachable(host));
        }
        if state.fail_verify {
            return Err(failed("injected verification failure"));
        }
        let file = state
            .files
            .get(&expected.artifact_path)
            .ok_or_else(|| failed("artifact missing"))?;
        let artifact = EncryptedArtifact::parse(&file.contents)?;
        if artifact.checksum() != &expected.checksum {
            return Err(SealError::ChecksumMismatch {
                expected: expected.checksum.to_string(),
                actual: artifact.checksum().to_string(),
            });
        }
        if artifact.version() != expected.version || artifact.key_id() != &expected.key_id {
            return Err(failed("artifact header does not match"));
        }
        if let Some(key_path) = &expected.key_path
            && !state.files.contains_key(key_path)
        {
            return Err(failed("key file missing"));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceHooks for MockFleet {
    async fn restart(
        &self,
        host: &Host,
        _identity: &BundleIdentity,
    ) -> Result<HealthStatus, SealError> {
        let mut hosts = self.hosts.lock().await;
        let state = hosts.get_mut(&host.id).ok_or_else(|| unreachable(host))?;
        state.restarts += 1;
        if state.unhealthy {
            Ok(HealthStatus::Unhealthy("injected".into()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn places_and_reads_files() {
        let fleet = MockFleet::new();
        let host = fleet.add_host("a").await;
        let result = fleet
            .apply(
                &host,
                vec![FilePlacement::new("/etc/x", Arc::<[u8]>::from(&b"data"[..]), 0o600)],
                vec![
                    HostCommand::ReadFile {
                        path: "/etc/x".into(),
                    },
                    HostCommand::Stat {
                        path: "/etc".into(),
                    },
                ],
            )
            .await
            .unwrap();
        assert!(matches!(&result.outputs[0], CommandOutput::File(Some(b)) if b == b"data"));
        assert!(matches!(&result.outputs[1], CommandOutput::Stat(Some(s)) if s.is_dir));
        assert_eq!(fleet.placements("a").await, 1);
    }

    #[tokio::test]
    async fn dropped_connection_leaves_earlier_files() {
        let fleet = MockFleet::new();
        let host = fleet.add_host("a").await;
        fleet.drop_connection_after("a", 1, 1).await;
        let placement = |path: &str| FilePlacement::new(path, Arc::<[u8]>::from(&b"new"[..]), 0o600);
        let err = fleet
            .apply(&host, vec![placement("/etc/one"), placement("/etc/two")], Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(fleet.file("a", "/etc/one").await.as_deref(), Some(&b"new"[..]));
        assert!(fleet.file("a", "/etc/two").await.is_none());

        fleet
            .apply(&host, vec![placement("/etc/one"), placement("/etc/two")], Vec::new())
            .await
            .unwrap();
        assert!(fleet.file("a", "/etc/two").await.is_some());
    }

    #[tokio::test]
    async fn unreachable_host_fails_transiently() {
        let fleet = MockFleet::new();
        let host = fleet.add_host("a").await;
        fleet.set_unreachable("a", true).await;
        let err = fleet.apply(&host, Vec::new(), Vec::new()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
