// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The host-apply primitive consumed from the orchestration layer.
//!
//! sealfleet never implements remote execution in its core; it only calls
//! [`HostApply::apply`] with files to place and commands to run.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SealError;
use crate::types::{FileStat, Host};

/// A file to place on a host.
///
/// Implementations must place it atomically (write a temporary file, then
/// rename) so a host never observes a partially written artifact or key.
#[derive(Clone)]
pub struct FilePlacement {
    pub path: String,
    pub contents: Arc<[u8]>,
    /// Permission bits of the file; parent directories are created with 0700.
    pub mode: u32,
}

impl FilePlacement {
    pub fn new(path: impl Into<String>, contents: impl Into<Arc<[u8]>>, mode: u32) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            mode,
        }
    }
}

impl fmt::Debug for FilePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePlacement")
            .field("path", &self.path)
            .field("len", &self.contents.len())
            .field("mode", &format_args!("{:o}", self.mode))
            .finish()
    }
}

/// A read-only or removal command to run on a host after files are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Read a file's bytes; yields `None` if absent.
    ReadFile { path: String },
    /// SHA-256 of a file as computed on the host; yields `None` if absent.
    Digest { path: String },
    /// Permission bits and ownership of a path; yields `None` if absent.
    Stat { path: String },
    /// Remove a file if present.
    Remove { path: String },
    /// Run a program with arguments.
    Exec { program: String, args: Vec<String> },
}

/// Captured output of [`HostCommand::Exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Output of one [`HostCommand`], in the same position as the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    File(Option<Vec<u8>>),
    /// Lowercase hex SHA-256.
    Digest(Option<String>),
    Stat(Option<FileStat>),
    Removed,
    Exec(ExecOutput),
}

/// Result of an `apply` call: one output per command, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub outputs: Vec<CommandOutput>,
}

/// Places files and runs commands on a host.
///
/// Errors reaching the host map to [`SealError::DistributionError`] with
/// `transient: true`; permission problems with `transient: false`.
#[async_trait]
pub trait HostApply: Send + Sync + 'static {
    /// Place `files` (atomically, in order), then run `commands` in order.
    async fn apply(
        &self,
        host: &Host,
        files: Vec<FilePlacement>,
        commands: Vec<HostCommand>,
    ) -> Result<ApplyResult, SealError>;

    /// Read one file, `None` if absent.
    async fn read_file(&self, host: &Host, path: &str) -> Result<Option<Vec<u8>>, SealError> {
        let result = self
            .apply(
                host,
                Vec::new(),
                vec![HostCommand::ReadFile {
                    path: path.to_string(),
                }],
            )
            .await?;
        match result.outputs.into_iter().next() {
            Some(CommandOutput::File(contents)) => Ok(contents),
            other => Err(unexpected_output(host, "read", other)),
        }
    }

    /// Hex SHA-256 of one file as computed on the host, `None` if absent.
    async fn digest(&self, host: &Host, path: &str) -> Result<Option<String>, SealError> {
        let result = self
            .apply(
                host,
                Vec::new(),
                vec![HostCommand::Digest {
                    path: path.to_string(),
                }],
            )
            .await?;
        match result.outputs.into_iter().next() {
            Some(CommandOutput::Digest(hex)) => Ok(hex),
            other => Err(unexpected_output(host, "digest", other)),
        }
    }

    /// Stat several paths in one round-trip.
    async fn stat_all(
        &self,
        host: &Host,
        paths: &[String],
    ) -> Result<Vec<Option<FileStat>>, SealError> {
        let commands = paths
            .iter()
            .map(|p| HostCommand::Stat { path: p.clone() })
            .collect();
        let result = self.apply(host, Vec::new(), commands).await?;
        if result.outputs.len() != paths.len() {
            return Err(unexpected_output(host, "stat", None));
        }
        result
            .outputs
            .into_iter()
            .map(|out| match out {
                CommandOutput::Stat(stat) => Ok(stat),
                other => Err(unexpected_output(host, "stat", Some(other))),
            })
            .collect()
    }
}

// File contents may be key material, so only the output kind is reported.
fn unexpected_output(host: &Host, op: &str, got: Option<CommandOutput>) -> SealError {
    let kind = match got {
        None => "nothing",
        Some(CommandOutput::File(_)) => "file",
        Some(CommandOutput::Digest(_)) => "digest",
        Some(CommandOutput::Stat(_)) => "stat",
        Some(CommandOutput::Removed) => "removed",
        Some(CommandOutput::Exec(_)) => "exec",
    };
    SealError::DistributionError {
        host: host.id.to_string(),
        message: format!("transport returned {kind} output for {op}"),
        transient: false,
    }
}
