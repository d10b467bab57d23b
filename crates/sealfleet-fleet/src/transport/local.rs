// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A host that is a directory on the operator machine.
//!
//! `host.address` is the directory standing in for the host's `/`. Used for
//! staging deployments and for tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sealfleet_core::{
    ApplyResult, CommandOutput, Digest, ExecOutput, FilePlacement, FileStat, Host, HostApply,
    HostCommand, SealError,
};
use tracing::debug;

use super::HOST_ROOT_ENV;

/// Mode of directories created for placed files.
const DIR_MODE: u32 = 0o700;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDirTransport;

impl LocalDirTransport {
    /// Map a remote absolute path under the host root.
    pub fn resolve(root: &Path, remote: &str) -> PathBuf {
        root.join(remote.trim_start_matches('/'))
    }
}

fn io_error(host: &Host, what: &str, e: std::io::Error) -> SealError {
    SealError::DistributionError {
        host: host.id.to_string(),
        message: format!("{what}: {e}"),
        transient: false,
    }
}

#[async_trait]
impl HostApply for LocalDirTransport {
    async fn apply(
        &self,
        host: &Host,
        files: Vec<FilePlacement>,
        commands: Vec<HostCommand>,
    ) -> Result<ApplyResult, SealError> {
        let root = PathBuf::from(&host.address);
        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            return Err(SealError::DistributionError {
                host: host.id.to_string(),
                message: format!("host root {} does not exist", root.display()),
                transient: true,
            });
        }

        if !files.is_empty() {
            let place_root = root.clone();
            let place_host = host.clone();
            tokio::task::spawn_blocking(move || -> Result<(), SealError> {
                for file in &files {
                    let path = LocalDirTransport::resolve(&place_root, &file.path);
                    place(&path, &file.contents, file.mode)
                        .map_err(|e| io_error(&place_host, &format!("placing {}", file.path), e))?;
                }
                Ok(())
            })
            .await
            .map_err(|e| SealError::Internal(format!("placement task failed: {e}")))??;
        }

        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(run(host, &root, command).await?);
        }
        Ok(ApplyResult { outputs })
    }
}

/// Write `contents` to `path` through a temp file and rename.
fn place(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
    create_dir(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".sealfleet-")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    set_mode(tmp.path(), mode)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn create_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
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

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn run(host: &Host, root: &Path, command: HostCommand) -> Result<CommandOutput, SealError> {
    match command {
        HostCommand::ReadFile { path } => {
            let bytes = read_optional(&LocalDirTransport::resolve(root, &path))
                .await
                .map_err(|e| io_error(host, &format!("reading {path}"), e))?;
            Ok(CommandOutput::File(bytes))
        }
        HostCommand::Digest { path } => {
            let bytes = read_optional(&LocalDirTransport::resolve(root, &path))
                .await
                .map_err(|e| io_error(host, &format!("reading {path}"), e))?;
            Ok(CommandOutput::Digest(
                bytes.map(|b| Digest::sha256(&b).hex().to_string()),
            ))
        }
        HostCommand::Stat { path } => {
            let full = LocalDirTransport::resolve(root, &path);
            match tokio::fs::metadata(&full).await {
                Ok(meta) => Ok(CommandOutput::Stat(Some(file_stat(&meta)))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CommandOutput::Stat(None)),
                Err(e) => Err(io_error(host, &format!("stat {path}"), e)),
            }
        }
        HostCommand::Remove { path } => {
            match tokio::fs::remove_file(LocalDirTransport::resolve(root, &path)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(host, &format!("removing {path}"), e)),
            }
            Ok(CommandOutput::Removed)
        }
        HostCommand::Exec { program, args } => {
            debug!(host = %host.id, %program, "running command");
            let output = tokio::process::Command::new(&program)
                .args(&args)
                .current_dir(root)
                .env(HOST_ROOT_ENV, root)
                .stdin(std::process::Stdio::null())
                .output()
                .await
                .map_err(|e| io_error(host, &format!("running {program}"), e))?;
            Ok(CommandOutput::Exec(ExecOutput {
                status: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }))
        }
    }
}

#[cfg(unix)]
fn file_stat(meta: &std::fs::Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt;
    FileStat {
        mode: meta.mode() & 0o7777,
        owner: lookup_name("/etc/passwd", meta.uid()).unwrap_or_else(|| meta.uid().to_string()),
        group: lookup_name("/etc/group", meta.gid()).unwrap_or_else(|| meta.gid().to_string()),
        is_dir: meta.is_dir(),
    }
}

#[cfg(not(unix))]
fn file_stat(meta: &std::fs::Metadata) -> FileStat {
    FileStat {
        mode: if meta.permissions().readonly() { 0o400 } else { 0o600 },
        owner: String::new(),
        group: String::new(),
        is_dir: meta.is_dir(),
    }
}

/// Name for a numeric id from a passwd/group style file.
#[cfg(unix)]
fn lookup_name(file: &str, id: u32) -> Option<String> {
    let text = std::fs::read_to_string(file).ok()?;
    let id = id.to_string();
    text.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let _password = fields.next()?;
        (fields.next()? == id).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn host(dir: &Path) -> Host {
        Host::new("local-1", dir.display().to_string())
    }

    #[tokio::test]
    async fn places_files_and_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let contents: Arc<[u8]> = Arc::from(&b"sealed"[..]);
        let result = LocalDirTransport
            .apply(
                &host,
                vec![FilePlacement::new("/etc/sealfleet/api.enc", contents, 0o600)],
                vec![
                    HostCommand::ReadFile {
                        path: "/etc/sealfleet/api.enc".into(),
                    },
                    HostCommand::Digest {
                        path: "/etc/sealfleet/api.enc".into(),
                    },
                    HostCommand::Digest {
                        path: "/etc/sealfleet/missing".into(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.outputs[0], CommandOutput::File(Some(b"sealed".to_vec())));
        assert_eq!(
            result.outputs[1],
            CommandOutput::Digest(Some(Digest::sha256(b"sealed").hex().to_string()))
        );
        assert_eq!(result.outputs[2], CommandOutput::Digest(None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn placed_files_get_requested_mode() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        LocalDirTransport
            .apply(
                &host,
                vec![FilePlacement::new("/keys/api.key", Arc::<[u8]>::from(&b"k"[..]), 0o600)],
                Vec::new(),
            )
            .await
            .unwrap();
        let stat = LocalDirTransport
            .stat_all(&host, &["/keys/api.key".to_string(), "/keys".to_string()])
            .await
            .unwrap();
        let file = stat[0].as_ref().unwrap();
        assert_eq!(file.mode, 0o600);
        assert!(!file.is_dir);
        let keys_dir = stat[1].as_ref().unwrap();
        assert_eq!(keys_dir.mode, 0o700);
        assert!(keys_dir.is_dir);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let result = LocalDirTransport
            .apply(
                &host,
                Vec::new(),
                vec![HostCommand::Remove {
                    path: "/nothing/here".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(result.outputs, vec![CommandOutput::Removed]);
    }

    #[tokio::test]
    async fn missing_root_is_a_transient_failure() {
        let host = Host::new("gone", "/nonexistent/sealfleet-host-root");
        let err = LocalDirTransport
            .read_file(&host, "/etc/x")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
