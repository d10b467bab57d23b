// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local strategy: random keys in owner-only files, shipped separately from
//! the artifact.
//!
//! Layout under the key directory (mode 0700):
//!
//! ```text
//! api.key          current key, hex, mode 0600
//! api.key.sha256   sha256sum-style sidecar of api.key
//! api.key.next     staged key during a rollover
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sealfleet_core::{BundleIdentity, KeyId, KeyMaterial, KeyProvider, SealError, StrategyId};
use sealfleet_vault::{crypto, integrity};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::locks::IdentityLocks;

/// Mode of key files.
pub const KEY_FILE_MODE: u32 = 0o600;
/// Mode of the key directory.
pub const KEY_DIR_MODE: u32 = 0o700;

/// Name of the current key file for an identity.
pub fn key_file_name(identity: &BundleIdentity) -> String {
    format!("{identity}.key")
}

/// Contents of a key file: hex key and a trailing newline.
pub fn render_key_file(key: &KeyMaterial) -> Zeroizing<Vec<u8>> {
    let mut text = key.to_hex();
    text.push('\n');
    Zeroizing::new(text.as_bytes().to_vec())
}

/// Parse key file contents, checking them against a sidecar when one is given.
///
/// A sidecar mismatch is an integrity failure (`ChecksumMismatch`); anything
/// else that prevents producing a key is `KeyUnavailable`.
pub fn parse_key_file(
    identity: &BundleIdentity,
    contents: &[u8],
    sidecar: Option<&str>,
) -> Result<KeyMaterial, SealError> {
    if let Some(sidecar) = sidecar {
        let (digest, _) =
            integrity::parse_sidecar(sidecar).map_err(|_| SealError::key_unavailable(identity))?;
        integrity::ensure(contents, &digest)?;
    }
    let text = std::str::from_utf8(contents).map_err(|_| SealError::key_unavailable(identity))?;
    KeyMaterial::from_hex(StrategyId::Local, text).map_err(|_| SealError::key_unavailable(identity))
}

/// Key provider backed by files in a local directory.
#[derive(Debug, Clone)]
pub struct LocalKeyProvider {
    key_dir: PathBuf,
    locks: IdentityLocks,
}

impl LocalKeyProvider {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            locks: IdentityLocks::new(),
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Path of the current key file.
    pub fn key_path(&self, identity: &BundleIdentity) -> PathBuf {
        self.key_dir.join(key_file_name(identity))
    }

    fn staged_path(&self, identity: &BundleIdentity) -> PathBuf {
        self.key_dir.join(format!("{identity}.key.next"))
    }

    fn sidecar_path(&self, identity: &BundleIdentity) -> PathBuf {
        self.key_dir
            .join(integrity::sidecar_name(&key_file_name(identity)))
    }

    async fn read_key(
        &self,
        identity: &BundleIdentity,
        path: PathBuf,
        sidecar: Option<PathBuf>,
    ) -> Result<KeyMaterial, SealError> {
        let contents = Zeroizing::new(tokio::fs::read(&path).await.map_err(|e| {
            debug!(identity = %identity, path = %path.display(), error = %e, "key file unreadable");
            SealError::key_unavailable(identity)
        })?);
        let sidecar = match sidecar {
            Some(p) => tokio::fs::read_to_string(&p).await.ok(),
            None => None,
        };
        parse_key_file(identity, &contents, sidecar.as_deref())
    }

    async fn write_key(&self, path: PathBuf, key: &KeyMaterial) -> Result<(), SealError> {
        let dir = self.key_dir.clone();
        let contents = render_key_file(key);
        tokio::task::spawn_blocking(move || write_private_file(&dir, &path, &contents))
            .await
            .map_err(|e| SealError::Internal(format!("key write task failed: {e}")))?
    }
}

/// Atomically write an owner-only file: temp file in the same directory,
/// fsync, rename.
pub fn write_private_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), SealError> {
    let io_err = |e: std::io::Error| SealError::storage(format!("{}: {e}", path.display()));
    create_private_dir(dir).map_err(io_err)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".sealfleet-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    set_mode(tmp.path(), KEY_FILE_MODE).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(KEY_DIR_MODE)
            .create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, SealError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SealError::storage(format!("{}: {e}", path.display()))),
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    fn strategy_id(&self) -> StrategyId {
        StrategyId::Local
    }

    async fn resolve(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        self.read_key(
            identity,
            self.key_path(identity),
            Some(self.sidecar_path(identity)),
        )
        .await
    }

    async fn resolve_key(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<KeyMaterial, SealError> {
        if let Ok(current) = self.resolve(identity).await
            && current.key_id() == key_id
        {
            return Ok(current);
        }
        match self.read_key(identity, self.staged_path(identity), None).await {
            Ok(staged) if staged.key_id() == key_id => Ok(staged),
            _ => Err(SealError::key_unavailable(identity)),
        }
    }

    async fn rotate(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        let _guard = self.locks.lock(identity).await;
        let key = KeyMaterial::new(StrategyId::Local, crypto::generate_random_key()?);
        self.write_key(self.staged_path(identity), &key)
            .await
            .map_err(|e| {
                warn!(identity = %identity, error = %e, "failed to stage local key");
                SealError::key_unavailable(identity)
            })?;
        info!(identity = %identity, key_id = %key.key_id(), "staged local key");
        Ok(key)
    }

    async fn confirm_rollover(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        let staged = self.read_key(identity, self.staged_path(identity), None).await?;
        if staged.key_id() != key_id {
            return Err(SealError::key_unavailable(identity));
        }
        self.write_key(self.key_path(identity), &staged).await?;
        let contents = render_key_file(&staged);
        let sidecar = integrity::render_sidecar(
            &integrity::checksum(&contents),
            &key_file_name(identity),
        );
        let dir = self.key_dir.clone();
        let sidecar_path = self.sidecar_path(identity);
        tokio::task::spawn_blocking(move || {
            write_private_file(&dir, &sidecar_path, sidecar.as_bytes())
        })
        .await
        .map_err(|e| SealError::Internal(format!("sidecar write task failed: {e}")))??;
        remove_if_present(&self.staged_path(identity)).await?;
        info!(identity = %identity, key_id = %key_id, "promoted staged local key");
        Ok(())
    }

    async fn abort_rollover(&self, identity: &BundleIdentity) -> Result<(), SealError> {
        let _guard = self.locks.lock(identity).await;
        if remove_if_present(&self.staged_path(identity)).await? {
            info!(identity = %identity, "discarded staged local key");
        }
        Ok(())
    }
}
