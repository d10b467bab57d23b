// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pushing sealed artifacts (and local-strategy key files) to hosts.
//!
//! A push is idempotent: when the host already holds every file and sidecar
//! with the expected digests nothing is written. Otherwise every file is placed atomically and
//! the digests are read back from the host before the push counts as done.

use std::sync::Arc;

use sealfleet_core::{
    BackupSummary, BundleIdentity, CommandOutput, Digest, FilePlacement, Host, HostApply,
    HostCommand, HostId, SealError,
};
use sealfleet_resilience::{retry_transient, RetryPolicy};
use sealfleet_vault::integrity::render_sidecar;
use sealfleet_vault::EncryptedArtifact;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::layout::RemoteLayout;

/// Default mode of every placed file.
pub const FILE_MODE: u32 = 0o600;

/// One file to deliver, with its precomputed digest.
#[derive(Debug, Clone)]
struct DeliveryFile {
    path: String,
    contents: Arc<[u8]>,
    digest: Digest,
    sidecar_path: String,
    sidecar: Arc<[u8]>,
    sidecar_digest: Digest,
}

impl DeliveryFile {
    fn new(path: String, sidecar_path: String, contents: Arc<[u8]>) -> Self {
        let digest = Digest::sha256(&contents);
        let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let sidecar: Arc<[u8]> = render_sidecar(&digest, &file_name).into_bytes().into();
        let sidecar_digest = Digest::sha256(&sidecar);
        Self {
            path,
            contents,
            digest,
            sidecar_path,
            sidecar,
            sidecar_digest,
        }
    }
}

/// What a push delivers for one identity.
#[derive(Debug, Clone)]
pub struct Payload {
    identity: BundleIdentity,
    version: u64,
    artifact: DeliveryFile,
    key: Option<DeliveryFile>,
}

impl Payload {
    /// `artifact` is the rendered `<name>.enc` file; `key_file` the rendered
    /// key file for the local strategy.
    pub fn new(
        layout: &RemoteLayout,
        identity: BundleIdentity,
        version: u64,
        artifact: Arc<[u8]>,
        key_file: Option<Arc<[u8]>>,
    ) -> Self {
        let artifact = DeliveryFile::new(
            layout.artifact_path(&identity),
            layout.artifact_sidecar_path(&identity),
            artifact,
        );
        let key = key_file.map(|contents| {
            DeliveryFile::new(
                layout.key_path(&identity),
                layout.key_sidecar_path(&identity),
                contents,
            )
        });
        Self {
            identity,
            version,
            artifact,
            key,
        }
    }

    pub fn identity(&self) -> &BundleIdentity {
        &self.identity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Digest of the artifact file as a whole.
    pub fn artifact_digest(&self) -> &Digest {
        &self.artifact.digest
    }

    pub fn has_key_file(&self) -> bool {
        self.key.is_some()
    }

    fn files(&self) -> impl Iterator<Item = &DeliveryFile> {
        self.key.iter().chain(std::iter::once(&self.artifact))
    }
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The host already held the exact files.
    Unchanged,
    Delivered,
}

/// Exact bytes a host held at every managed path before a rotation.
///
/// Captured once during Building and never modified.
#[derive(Debug, Clone)]
pub struct HostBackup {
    host: HostId,
    files: Vec<(String, Option<Arc<[u8]>>)>,
    summary: BackupSummary,
}

impl HostBackup {
    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn summary(&self) -> &BackupSummary {
        &self.summary
    }

    /// True if the host held nothing for the identity.
    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|(_, contents)| contents.is_none())
    }
}

/// Pushes payloads to hosts through a [`HostApply`] transport.
pub struct Distributor {
    transport: Arc<dyn HostApply>,
    layout: RemoteLayout,
    retry: RetryPolicy,
    file_mode: u32,
}

impl Distributor {
    pub fn new(transport: Arc<dyn HostApply>, layout: RemoteLayout, retry: RetryPolicy) -> Self {
        Self {
            transport,
            layout,
            retry,
            file_mode: FILE_MODE,
        }
    }

    /// Override the mode placed files receive.
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn transport(&self) -> &Arc<dyn HostApply> {
        &self.transport
    }

    /// Read everything a host currently holds for `identity`.
    pub async fn capture(
        &self,
        host: &Host,
        identity: &BundleIdentity,
    ) -> Result<HostBackup, SealError> {
        let paths = self.layout.managed_paths(identity);
        let commands = paths
            .iter()
            .map(|path| HostCommand::ReadFile { path: path.clone() })
            .collect();
        let result = self.transport.apply(host, Vec::new(), commands).await?;
        if result.outputs.len() != paths.len() {
            return Err(protocol_error(host, "backup read returned the wrong number of outputs"));
        }

        let mut files = Vec::with_capacity(paths.len());
        for (path, output) in paths.into_iter().zip(result.outputs) {
            match output {
                CommandOutput::File(contents) => files.push((path, contents.map(Arc::from))),
                _ => return Err(protocol_error(host, "backup read returned a non-file output")),
            }
        }

        let summary = files
            .first()
            .and_then(|(_, contents)| contents.as_deref())
            .and_then(|bytes| EncryptedArtifact::parse(bytes).ok())
            .map(|artifact| BackupSummary {
                version: Some(artifact.version()),
                checksum: Some(artifact.checksum().clone()),
            })
            .unwrap_or_default();

        debug!(host = %host.id, identity = %identity, version = ?summary.version, "captured host backup");
        Ok(HostBackup {
            host: host.id.clone(),
            files,
            summary,
        })
    }

    /// Deliver `payload` to `host`, retrying transient failures.
    pub async fn push(
        &self,
        host: &Host,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome, SealError> {
        let label = format!("push {} to {}", payload.identity, host.id);
        let outcome = retry_transient(&self.retry, cancel, &label, |attempt| {
            self.push_once(host, payload, attempt)
        })
        .await?;
        match outcome {
            PushOutcome::Unchanged => debug!(
                host = %host.id,
                identity = %payload.identity,
                version = payload.version,
                "host already up to date"
            ),
            PushOutcome::Delivered => info!(
                host = %host.id,
                identity = %payload.identity,
                version = payload.version,
                "artifact delivered"
            ),
        }
        Ok(outcome)
    }

    async fn push_once(
        &self,
        host: &Host,
        payload: &Payload,
        attempt: u32,
    ) -> Result<PushOutcome, SealError> {
        // A missing or stale sidecar fails host-side checks, so it counts too.
        let expected: Vec<(&str, &Digest)> = payload
            .files()
            .flat_map(|f| {
                [
                    (f.sidecar_path.as_str(), &f.sidecar_digest),
                    (f.path.as_str(), &f.digest),
                ]
            })
            .collect();

        if self.digests_match(host, &expected).await? {
            return Ok(PushOutcome::Unchanged);
        }

        // Key before artifact, sidecar before its file.
        let mut files = Vec::new();
        for file in payload.files() {
            files.push(FilePlacement::new(
                file.sidecar_path.clone(),
                file.sidecar.clone(),
                self.file_mode,
            ));
            files.push(FilePlacement::new(
                file.path.clone(),
                file.contents.clone(),
                self.file_mode,
            ));
        }
        let commands = expected
            .iter()
            .map(|(path, _)| HostCommand::Digest {
                path: path.to_string(),
            })
            .collect();
        debug!(host = %host.id, identity = %payload.identity, attempt, "placing files");
        let result = self.transport.apply(host, files, commands).await?;
        check_digests(host, &expected, result.outputs)?;
        Ok(PushOutcome::Delivered)
    }

    /// True if every path already has the expected digest.
    async fn digests_match(
        &self,
        host: &Host,
        expected: &[(&str, &Digest)],
    ) -> Result<bool, SealError> {
        let commands = expected
            .iter()
            .map(|(path, _)| HostCommand::Digest {
                path: path.to_string(),
            })
            .collect();
        let result = self.transport.apply(host, Vec::new(), commands).await?;
        Ok(check_digests(host, expected, result.outputs).is_ok())
    }

    /// Put a host back to exactly what `backup` recorded.
    ///
    /// Paths that held nothing are removed.
    pub async fn restore(
        &self,
        host: &Host,
        backup: &HostBackup,
        cancel: &CancellationToken,
    ) -> Result<(), SealError> {
        let label = format!("restore {}", host.id);
        retry_transient(&self.retry, cancel, &label, |_| self.restore_once(host, backup)).await?;
        info!(host = %host.id, version = ?backup.summary.version, "host restored from backup");
        Ok(())
    }

    async fn restore_once(&self, host: &Host, backup: &HostBackup) -> Result<(), SealError> {
        let mut files = Vec::new();
        let mut commands = Vec::new();
        let mut expected = Vec::new();
        // Artifact files come first in the backup; restore key files first so
        // a restored artifact never sits next to a newer key.
        for (path, contents) in backup.files.iter().rev() {
            match contents {
                Some(bytes) => {
                    files.push(FilePlacement::new(path.clone(), bytes.clone(), self.file_mode));
                    expected.push((path.as_str(), Digest::sha256(bytes)));
                }
                None => commands.push(HostCommand::Remove { path: path.clone() }),
            }
        }
        let removals = commands.len();
        commands.extend(expected.iter().map(|(path, _)| HostCommand::Digest {
            path: path.to_string(),
        }));

        let result = self.transport.apply(host, files, commands).await?;
        let digests = result.outputs.into_iter().skip(removals).collect();
        let expected: Vec<(&str, &Digest)> = expected.iter().map(|(p, d)| (*p, d)).collect();
        check_digests(host, &expected, digests)
    }
}

/// Compare digests read back from a host with the expected ones.
fn check_digests(
    host: &Host,
    expected: &[(&str, &Digest)],
    outputs: Vec<CommandOutput>,
) -> Result<(), SealError> {
    if outputs.len() != expected.len() {
        return Err(protocol_error(host, "digest read returned the wrong number of outputs"));
    }
    for ((path, digest), output) in expected.iter().zip(outputs) {
        match output {
            CommandOutput::Digest(Some(hex)) if hex.eq_ignore_ascii_case(digest.hex()) => {}
            CommandOutput::Digest(Some(hex)) => {
                return Err(SealError::ChecksumMismatch {
                    expected: format!("{digest} ({path})"),
                    actual: format!("{}:{hex}", digest.algorithm()),
                });
            }
            CommandOutput::Digest(None) => {
                return Err(SealError::DistributionError {
                    host: host.id.to_string(),
                    message: format!("{path} is missing after placement"),
                    transient: true,
                });
            }
            _ => return Err(protocol_error(host, "digest read returned a non-digest output")),
        }
    }
    Ok(())
}

fn protocol_error(host: &Host, message: &str) -> SealError {
    SealError::DistributionError {
        host: host.id.to_string(),
        message: message.to_string(),
        transient: false,
    }
}
