// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Commands that run on a host: `sealfleet verify` and `sealfleet exec`.
//!
//! Both check the checksum sidecars before any decrypt attempt and never
//! write plaintext to disk. `--root` (or `SEALFLEET_ROOT`) maps remote paths
//! under a directory for directory-backed hosts.

use std::path::{Path, PathBuf};

use sealfleet_config::SealfleetConfig;
use sealfleet_core::{BundleIdentity, Digest, KeyId, KeyMaterial, SealError, StrategyId};
use sealfleet_fleet::{LocalDirTransport, RemoteLayout};
use sealfleet_keys::local::parse_key_file;
use sealfleet_keys::KeyRegistry;
use sealfleet_vault::integrity::{self, sidecar_name};
use sealfleet_vault::{Bundle, EncryptedArtifact};
use tracing::debug;
use zeroize::Zeroizing;

/// What the operator expects a host to hold.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub identity: BundleIdentity,
    pub version: u64,
    pub checksum: Digest,
    pub key_id: KeyId,
    pub artifact: String,
    pub key: Option<String>,
    pub root: Option<PathBuf>,
}

fn local_path(root: Option<&Path>, remote: &str) -> PathBuf {
    match root {
        Some(root) => LocalDirTransport::resolve(root, remote),
        None => PathBuf::from(remote),
    }
}

fn read(path: &Path) -> Result<Option<Vec<u8>>, SealError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SealError::Config(format!("cannot read {}: {e}", path.display()))),
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(sidecar_name(&name))
}

/// Read a deployed artifact and check it against its sidecar.
pub fn read_artifact(path: &Path) -> Result<EncryptedArtifact, SealError> {
    let bytes = read(path)?.ok_or_else(|| SealError::NotFound {
        what: format!("artifact {}", path.display()),
    })?;
    let sidecar = read(&sidecar_path(path))?.ok_or_else(|| {
        SealError::MalformedPayload(format!("checksum sidecar for {} is missing", path.display()))
    })?;
    let sidecar = String::from_utf8_lossy(&sidecar);
    let (digest, _) = integrity::parse_sidecar(&sidecar)?;
    integrity::ensure(&bytes, &digest)?;
    EncryptedArtifact::parse(&bytes)
}

/// Read a key file, checking its sidecar when present.
pub fn read_key_file(identity: &BundleIdentity, path: &Path) -> Result<KeyMaterial, SealError> {
    let contents = Zeroizing::new(read(path)?.ok_or_else(|| SealError::key_unavailable(identity))?);
    let sidecar = read(&sidecar_path(path))?.map(|s| String::from_utf8_lossy(&s).into_owned());
    parse_key_file(identity, &contents, sidecar.as_deref())
}

/// Key for `artifact`: the key file for the local strategy, the configured
/// backend otherwise.
async fn key_for(
    config: &SealfleetConfig,
    artifact: &EncryptedArtifact,
    key_file: Option<&Path>,
) -> Result<KeyMaterial, SealError> {
    let identity = artifact.identity();
    let key = match (artifact.strategy(), key_file) {
        (StrategyId::Local, Some(path)) => read_key_file(identity, path)?,
        (StrategyId::Local, None) => return Err(SealError::key_unavailable(identity)),
        (strategy, _) => {
            KeyRegistry::from_config(&config.keys)?
                .get(strategy)?
                .resolve_key(identity, artifact.key_id())
                .await?
        }
    };
    if key.key_id() != artifact.key_id() {
        return Err(SealError::key_unavailable(identity));
    }
    Ok(key)
}

/// Prove the host holds exactly the expected artifact and can open it.
pub async fn verify(config: &SealfleetConfig, request: &VerifyRequest) -> Result<(), SealError> {
    let root = request.root.as_deref();
    let artifact = read_artifact(&local_path(root, &request.artifact))?;

    let mismatch = |what: &str, expected: String, actual: String| SealError::VerificationFailed {
        host: "local".into(),
        message: format!("{what} is {actual}, expected {expected}"),
    };
    if artifact.identity() != &request.identity {
        return Err(mismatch(
            "identity",
            request.identity.to_string(),
            artifact.identity().to_string(),
        ));
    }
    if artifact.version() != request.version {
        return Err(mismatch(
            "version",
            request.version.to_string(),
            artifact.version().to_string(),
        ));
    }
    if artifact.checksum() != &request.checksum {
        return Err(SealError::ChecksumMismatch {
            expected: request.checksum.to_string(),
            actual: artifact.checksum().to_string(),
        });
    }
    if artifact.key_id() != &request.key_id {
        return Err(mismatch(
            "key id",
            request.key_id.to_string(),
            artifact.key_id().to_string(),
        ));
    }

    let key_file = request.key.as_deref().map(|k| local_path(root, k));
    let key = key_for(config, &artifact, key_file.as_deref()).await?;
    let bundle = sealfleet_vault::open(&artifact, &key)?;
    debug!(identity = %bundle.identity(), version = bundle.version(), secrets = bundle.len(), "artifact verified");
    Ok(())
}

/// Open the deployed bundle for `identity`.
pub async fn open_deployed(
    config: &SealfleetConfig,
    identity: &BundleIdentity,
    root: Option<&Path>,
) -> Result<Bundle, SealError> {
    let layout = RemoteLayout::from_config(&config.artifacts);
    let artifact = read_artifact(&local_path(root, &layout.artifact_path(identity)))?;
    if artifact.identity() != identity {
        return Err(SealError::MalformedPayload(format!(
            "artifact for `{identity}` carries identity `{}`",
            artifact.identity()
        )));
    }
    let key_file = local_path(root, &layout.key_path(identity));
    let key = key_for(config, &artifact, Some(&key_file)).await?;
    sealfleet_vault::open(&artifact, &key)
}

/// Replace this process with `command`, exporting each secret as an
/// environment variable.
pub async fn exec(
    config: &SealfleetConfig,
    identity: &BundleIdentity,
    root: Option<&Path>,
    command: &[String],
) -> Result<i32, SealError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| SealError::Config("no command given after `--`".into()))?;
    let bundle = open_deployed(config, identity, root).await?;

    let mut cmd = std::process::Command::new(program);
    cmd.args(args);
    for (name, value) in bundle.env_vars() {
        cmd.env(name, value);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        Err(SealError::Config(format!("failed to exec {program}: {err}")))
    }

    #[cfg(not(unix))]
    {
        let status = cmd
            .status()
            .map_err(|e| SealError::Config(format!("failed to run {program}: {e}")))?;
        Ok(status.code().unwrap_or(sealfleet_core::EXIT_OPERATIONAL))
    }
}
