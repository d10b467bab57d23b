// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common identifiers and host types used across sealfleet.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::SealError;
use crate::key::KeyId;

/// Name of a bundle of secrets, e.g. `api` or `billing-oauth`.
///
/// Identities become file names on hosts and path segments in key backends,
/// so only lowercase ASCII letters, digits, `-`, `_` and `.` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleIdentity(String);

impl BundleIdentity {
    /// Validate and wrap a bundle identity.
    pub fn new(name: impl Into<String>) -> Result<Self, SealError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(name))
        } else {
            Err(SealError::InvalidIdentity(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BundleIdentity {
    type Error = SealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BundleIdentity> for String {
    fn from(value: BundleIdentity) -> Self {
        value.0
    }
}

impl std::str::FromStr for BundleIdentity {
    type Err = SealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of a host in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifies which key material strategy produced or owns a key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StrategyId {
    /// Random key in a file shipped separately from the artifact.
    Local,
    /// Key fetched at decrypt time from a cloud provider's secret manager.
    Cloud,
    /// Key fetched from a central vault service with per-request authorization.
    Vault,
}

/// Health status reported by service hooks after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Services are fully operational.
    Healthy,
    /// Services are operational but experiencing issues.
    Degraded(String),
    /// Services are not operational.
    Unhealthy(String),
}

/// Last known reachability of a host, as tracked by the state store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HostHealth {
    Healthy,
    /// Retries were exhausted during the last push.
    Degraded,
    Unreachable,
}

/// A host from the inventory supplied by the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// Transport-specific address (`user@host` for ssh, a directory for local).
    pub address: String,
    /// Bundle identities this host requires.
    pub bundles: Vec<BundleIdentity>,
}

impl Host {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: HostId(id.into()),
            address: address.into(),
            bundles: Vec::new(),
        }
    }

    /// Builder-style helper to declare a required bundle.
    pub fn with_bundle(mut self, identity: BundleIdentity) -> Self {
        self.bundles.push(identity);
        self
    }

    pub fn requires(&self, identity: &BundleIdentity) -> bool {
        self.bundles.iter().any(|b| b == identity)
    }
}

/// Tracked state of a host for one bundle identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host: HostId,
    pub identity: BundleIdentity,
    pub last_version: Option<u64>,
    pub last_key_id: Option<KeyId>,
    pub health: HostHealth,
    pub updated_at: DateTime<Utc>,
}

/// Observed metadata of a file on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Permission bits, e.g. `0o600`.
    pub mode: u32,
    /// Owner name, or the numeric uid when the name is unknown.
    pub owner: String,
    pub group: String,
    pub is_dir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn identity_accepts_simple_names() {
        assert!(BundleIdentity::new("api").is_ok());
        assert!(BundleIdentity::new("billing-oauth_v2.prod").is_ok());
    }

    #[test]
    fn identity_rejects_path_traversal_and_uppercase() {
        for bad in ["", "../etc", "a/b", "API", ".hidden", "with space"] {
            assert!(
                matches!(BundleIdentity::new(bad), Err(SealError::InvalidIdentity(_))),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn strategy_id_round_trips_through_strings() {
        for s in [StrategyId::Local, StrategyId::Cloud, StrategyId::Vault] {
            assert_eq!(StrategyId::from_str(&s.to_string()).unwrap(), s);
        }
        assert_eq!(StrategyId::Local.to_string(), "local");
    }

    #[test]
    fn identity_deserialization_validates() {
        let ok: BundleIdentity = serde_json::from_str("\"api\"").unwrap();
        assert_eq!(ok.as_str(), "api");
        assert!(serde_json::from_str::<BundleIdentity>("\"../x\"").is_err());
    }

    #[test]
    fn host_requires_declared_bundles() {
        let api = BundleIdentity::new("api").unwrap();
        let host = Host::new("a", "/srv/a").with_bundle(api.clone());
        assert!(host.requires(&api));
        assert!(!host.requires(&BundleIdentity::new("billing").unwrap()));
    }
}
