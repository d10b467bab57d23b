// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hosts reached by shelling out to the system `ssh` client.
//!
//! Each placement streams the file over stdin into a temp file next to the
//! destination, fixes its mode, then renames it into place.

use std::process::Stdio;

use async_trait::async_trait;
use sealfleet_core::{
    ApplyResult, CommandOutput, ExecOutput, FilePlacement, FileStat, Host, HostApply, HostCommand,
    SealError,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Exit status `ssh` uses for its own (connection) failures.
const SSH_CONNECTION_FAILURE: i32 = 255;
/// Exit status the remote snippets use for "path does not exist".
const ABSENT: i32 = 3;

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    options: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            program: "ssh".into(),
            options: vec![
                "-o".into(),
                "BatchMode=yes".into(),
                "-o".into(),
                "ConnectTimeout=10".into(),
            ],
        }
    }
}

struct RawOutput {
    status: i32,
    stdout: Vec<u8>,
    stderr: String,
}

impl SshTransport {
    pub fn new(program: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            program: program.into(),
            options,
        }
    }

    async fn ssh(
        &self,
        host: &Host,
        script: &str,
        stdin: Option<&[u8]>,
    ) -> Result<RawOutput, SealError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.options)
            .arg(&host.address)
            .arg("--")
            .arg(script)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SealError::DistributionError {
                host: host.id.to_string(),
                message: format!("cannot start {}: {e}", self.program),
                transient: false,
            })?;

        if let Some(bytes) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(bytes)
                .await
                .map_err(|e| connection_error(host, format!("writing to ssh: {e}")))?;
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| connection_error(host, format!("waiting for ssh: {e}")))?;
        let status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if status == SSH_CONNECTION_FAILURE {
            return Err(connection_error(host, stderr));
        }
        Ok(RawOutput {
            status,
            stdout: output.stdout,
            stderr,
        })
    }

    async fn place(&self, host: &Host, file: &FilePlacement) -> Result<(), SealError> {
        let path = shell_quote(&file.path);
        let script = format!(
            "set -e; umask 077; d=$(dirname {path}); mkdir -p \"$d\"; \
             t=$(mktemp \"$d/.sealfleet-XXXXXX\"); cat > \"$t\"; \
             chmod {mode:o} \"$t\"; mv -f \"$t\" {path}",
            mode = file.mode
        );
        let out = self.ssh(host, &script, Some(&file.contents)).await?;
        if out.status != 0 {
            return Err(SealError::DistributionError {
                host: host.id.to_string(),
                message: format!("placing {} failed: {}", file.path, out.stderr),
                transient: false,
            });
        }
        Ok(())
    }

    /// Run `command` on `path` if it exists, yielding `None` otherwise.
    async fn if_exists(
        &self,
        host: &Host,
        path: &str,
        command: &str,
    ) -> Result<Option<Vec<u8>>, SealError> {
        let path = shell_quote(path);
        let script = format!("if [ -e {path} ]; then {command} {path}; else exit {ABSENT}; fi");
        let out = self.ssh(host, &script, None).await?;
        match out.status {
            0 => Ok(Some(out.stdout)),
            ABSENT => Ok(None),
            _ => Err(SealError::DistributionError {
                host: host.id.to_string(),
                message: format!("`{command}` failed: {}", out.stderr),
                transient: false,
            }),
        }
    }

    async fn run(&self, host: &Host, command: HostCommand) -> Result<CommandOutput, SealError> {
        match command {
            HostCommand::ReadFile { path } => {
                Ok(CommandOutput::File(self.if_exists(host, &path, "cat").await?))
            }
            HostCommand::Digest { path } => {
                let out = self.if_exists(host, &path, "sha256sum").await?;
                let hex = out.map(|bytes| {
                    String::from_utf8_lossy(&bytes)
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_ascii_lowercase()
                });
                Ok(CommandOutput::Digest(hex))
            }
            HostCommand::Stat { path } => {
                let out = self
                    .if_exists(host, &path, "stat -c '%a %U %G %F'")
                    .await?;
                let stat = out
                    .map(|bytes| parse_stat(&String::from_utf8_lossy(&bytes)))
                    .transpose()
                    .map_err(|message| SealError::DistributionError {
                        host: host.id.to_string(),
                        message,
                        transient: false,
                    })?;
                Ok(CommandOutput::Stat(stat))
            }
            HostCommand::Remove { path } => {
                let out = self
                    .ssh(host, &format!("rm -f {}", shell_quote(&path)), None)
                    .await?;
                if out.status != 0 {
                    return Err(SealError::DistributionError {
                        host: host.id.to_string(),
                        message: format!("removing {path} failed: {}", out.stderr),
                        transient: false,
                    });
                }
                Ok(CommandOutput::Removed)
            }
            HostCommand::Exec { program, args } => {
                let script = std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .map(shell_quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                let out = self.ssh(host, &script, None).await?;
                Ok(CommandOutput::Exec(ExecOutput {
                    status: out.status,
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: out.stderr,
                }))
            }
        }
    }
}

fn connection_error(host: &Host, message: String) -> SealError {
    SealError::DistributionError {
        host: host.id.to_string(),
        message,
        transient: true,
    }
}

/// Parse `stat -c '%a %U %G %F'` output.
fn parse_stat(text: &str) -> Result<FileStat, String> {
    let mut parts = text.trim().splitn(4, ' ');
    let (Some(mode), Some(owner), Some(group), Some(kind)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("unexpected stat output `{}`", text.trim()));
    };
    let mode = u32::from_str_radix(mode, 8).map_err(|_| format!("bad mode `{mode}`"))?;
    Ok(FileStat {
        mode,
        owner: owner.to_string(),
        group: group.to_string(),
        is_dir: kind == "directory",
    })
}

#[async_trait]
impl HostApply for SshTransport {
    async fn apply(
        &self,
        host: &Host,
        files: Vec<FilePlacement>,
        commands: Vec<HostCommand>,
    ) -> Result<ApplyResult, SealError> {
        for file in &files {
            debug!(host = %host.id, path = %file.path, "placing file over ssh");
            self.place(host, file).await?;
        }
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(self.run(host, command).await?);
        }
        Ok(ApplyResult { outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_leaves_plain_words_alone() {
        assert_eq!(shell_quote("/etc/sealfleet/api.enc"), "/etc/sealfleet/api.enc");
        assert_eq!(shell_quote("sha256:abc"), "sha256:abc");
    }

    #[test]
    fn quoting_wraps_specials() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn stat_output_is_parsed() {
        let stat = parse_stat("600 root root regular file\n").unwrap();
        assert_eq!(stat.mode, 0o600);
        assert_eq!(stat.owner, "root");
        assert!(!stat.is_dir);
        assert!(parse_stat("755 app app directory").unwrap().is_dir);
        assert!(parse_stat("garbage").is_err());
    }
}
