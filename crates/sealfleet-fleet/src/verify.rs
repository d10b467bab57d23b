// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host-side verification and service restarts, run through the transport.

use std::sync::Arc;

use async_trait::async_trait;
use sealfleet_config::model::HooksConfig;
use sealfleet_core::{
    BundleIdentity, CommandOutput, ExecOutput, ExpectedArtifact, HealthStatus, Host, HostApply,
    HostCommand, HostVerifier, SealError, ServiceHooks,
};
use tracing::{debug, warn};

/// Placeholder replaced by the bundle identity in configured commands.
pub const IDENTITY_PLACEHOLDER: &str = "{identity}";

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 240;

async fn exec(
    transport: &dyn HostApply,
    host: &Host,
    program: String,
    args: Vec<String>,
) -> Result<ExecOutput, SealError> {
    let result = transport
        .apply(host, Vec::new(), vec![HostCommand::Exec { program, args }])
        .await?;
    match result.outputs.into_iter().next() {
        Some(CommandOutput::Exec(out)) => Ok(out),
        _ => Err(SealError::DistributionError {
            host: host.id.to_string(),
            message: "transport returned no exec output".into(),
            transient: false,
        }),
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn substitute(command: &[String], identity: &BundleIdentity) -> Option<(String, Vec<String>)> {
    let mut parts = command
        .iter()
        .map(|part| part.replace(IDENTITY_PLACEHOLDER, identity.as_str()));
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Runs `sealfleet verify` on the host.
///
/// The host checks the sidecar and embedded checksums, resolves the key,
/// opens the artifact and compares the version. Exit code 2 means an
/// integrity failure.
pub struct CommandVerifier {
    transport: Arc<dyn HostApply>,
    program: String,
}

impl CommandVerifier {
    pub fn new(transport: Arc<dyn HostApply>, program: impl Into<String>) -> Self {
        Self {
            transport,
            program: program.into(),
        }
    }

    /// Arguments of the host-side `verify` invocation.
    pub fn arguments(expected: &ExpectedArtifact) -> Vec<String> {
        let mut args = vec![
            "verify".to_string(),
            expected.identity.to_string(),
            "--version".into(),
            expected.version.to_string(),
            "--checksum".into(),
            expected.checksum.to_string(),
            "--key-id".into(),
            expected.key_id.to_string(),
            "--artifact".into(),
            expected.artifact_path.clone(),
        ];
        if let Some(key_path) = &expected.key_path {
            args.push("--key".into());
            args.push(key_path.clone());
        }
        args
    }
}

#[async_trait]
impl HostVerifier for CommandVerifier {
    async fn verify(&self, host: &Host, expected: &ExpectedArtifact) -> Result<(), SealError> {
        let out = exec(
            self.transport.as_ref(),
            host,
            self.program.clone(),
            Self::arguments(expected),
        )
        .await?;
        if out.success() {
            debug!(host = %host.id, identity = %expected.identity, version = expected.version, "host verified artifact");
            return Ok(());
        }
        let message = if out.status == sealfleet_core::EXIT_INTEGRITY {
            format!("integrity check failed: {}", excerpt(&out.stderr))
        } else {
            format!("verify exited with {}: {}", out.status, excerpt(&out.stderr))
        };
        Err(SealError::VerificationFailed {
            host: host.id.to_string(),
            message,
        })
    }
}

/// Restarts dependent services with configured commands.
pub struct CommandServiceHooks {
    transport: Arc<dyn HostApply>,
    restart: Vec<String>,
    health: Vec<String>,
}

impl CommandServiceHooks {
    pub fn new(transport: Arc<dyn HostApply>, config: &HooksConfig) -> Self {
        Self {
            transport,
            restart: config.restart_command.clone(),
            health: config.health_command.clone(),
        }
    }
}

#[async_trait]
impl ServiceHooks for CommandServiceHooks {
    async fn restart(
        &self,
        host: &Host,
        identity: &BundleIdentity,
    ) -> Result<HealthStatus, SealError> {
        if let Some((program, args)) = substitute(&self.restart, identity) {
            let out = exec(self.transport.as_ref(), host, program, args).await?;
            if !out.success() {
                warn!(host = %host.id, identity = %identity, status = out.status, "restart command failed");
                return Ok(HealthStatus::Unhealthy(format!(
                    "restart exited with {}: {}",
                    out.status,
                    excerpt(&out.stderr)
                )));
            }
        }

        let Some((program, args)) = substitute(&self.health, identity) else {
            return Ok(HealthStatus::Healthy);
        };
        let out = exec(self.transport.as_ref(), host, program, args).await?;
        Ok(match out.status {
            0 if out.stderr.trim().is_empty() => HealthStatus::Healthy,
            0 => HealthStatus::Degraded(excerpt(&out.stderr)),
            status => HealthStatus::Unhealthy(format!(
                "health check exited with {status}: {}",
                excerpt(&out.stderr)
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealfleet_core::{Digest, KeyId, StrategyId};

    #[test]
    fn identity_is_substituted_in_commands() {
        let api = BundleIdentity::new("api").unwrap();
        let command = vec!["systemctl".to_string(), "restart".into(), "{identity}.service".into()];
        let (program, args) = substitute(&command, &api).unwrap();
        assert_eq!(program, "systemctl");
        assert_eq!(args, vec!["restart", "api.service"]);
        assert!(substitute(&[], &api).is_none());
    }

    #[test]
    fn verify_arguments_include_key_only_when_shipped() {
        let expected = ExpectedArtifact {
            identity: BundleIdentity::new("api").unwrap(),
            version: 3,
            checksum: Digest::sha256(b"x"),
            strategy: StrategyId::Cloud,
            key_id: KeyId::fingerprint(&[0u8; 32]),
            artifact_path: "/etc/sealfleet/artifacts/api.enc".into(),
            key_path: None,
        };
        let args = CommandVerifier::arguments(&expected);
        assert_eq!(args[0], "verify");
        assert_eq!(args[1], "api");
        assert!(!args.contains(&"--identity".to_string()));
        assert!(!args.contains(&"--key".to_string()));
        assert!(args.contains(&"3".to_string()));
    }

    #[test]
    fn long_stderr_is_cut() {
        let long = "e".repeat(1000);
        assert!(excerpt(&long).len() < 300);
        assert_eq!(excerpt(" short \n"), "short");
    }
}
