// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-host verification and service restart capabilities.

use async_trait::async_trait;

use crate::digest::Digest;
use crate::error::SealError;
use crate::key::KeyId;
use crate::types::{BundleIdentity, HealthStatus, Host, StrategyId};

/// What a host must prove it can open during the Verifying phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedArtifact {
    pub identity: BundleIdentity,
    pub version: u64,
    pub checksum: Digest,
    pub strategy: StrategyId,
    pub key_id: KeyId,
    /// Remote path of the `<name>.enc` file.
    pub artifact_path: String,
    /// Remote path of the key file, for the local strategy.
    pub key_path: Option<String>,
}

/// Proves that a host's runtime can decrypt a freshly distributed artifact.
#[async_trait]
pub trait HostVerifier: Send + Sync + 'static {
    /// Succeeds only if the host opened the artifact and found the expected version.
    async fn verify(&self, host: &Host, expected: &ExpectedArtifact) -> Result<(), SealError>;
}

/// Restarts the services that consume a bundle and reports their health.
///
/// Invoked after a successful decrypt verification and again after a
/// rollback, decoupled from how files reach the host.
#[async_trait]
pub trait ServiceHooks: Send + Sync + 'static {
    async fn restart(
        &self,
        host: &Host,
        identity: &BundleIdentity,
    ) -> Result<HealthStatus, SealError>;
}

/// Hooks that do nothing and report healthy, for hosts without managed services.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServiceHooks;

#[async_trait]
impl ServiceHooks for NoopServiceHooks {
    async fn restart(
        &self,
        _host: &Host,
        _identity: &BundleIdentity,
    ) -> Result<HealthStatus, SealError> {
        Ok(HealthStatus::Healthy)
    }
}
