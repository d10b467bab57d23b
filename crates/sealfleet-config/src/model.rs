// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for sealfleet.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

use sealfleet_core::StrategyId;

/// Top-level sealfleet configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SealfleetConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// State store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Where artifacts live on hosts.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Key material strategies.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Push retry and timeout settings.
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Rotation job settings.
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Permission policy checked by the auditor.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Host-side verification and service restart commands.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Host inventory.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl Default for SealfleetConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            artifacts: ArtifactsConfig::default(),
            keys: KeysConfig::default(),
            distribution: DistributionConfig::default(),
            rotation: RotationConfig::default(),
            audit: AuditConfig::default(),
            hooks: HooksConfig::default(),
            hosts: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// State store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("sealfleet").join("sealfleet.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("sealfleet.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Remote artifact layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsConfig {
    /// Directory on each host holding `<name>.enc` and `<name>.enc.sha256`.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Directory on each host holding key files for the local strategy.
    #[serde(default = "default_remote_key_dir")]
    pub remote_key_dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            remote_dir: default_remote_dir(),
            remote_key_dir: default_remote_key_dir(),
        }
    }
}

fn default_remote_dir() -> String {
    "/etc/sealfleet/artifacts".to_string()
}

fn default_remote_key_dir() -> String {
    "/etc/sealfleet/keys".to_string()
}

/// Key material strategy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeysConfig {
    /// Strategy used when creating a new bundle.
    #[serde(default = "default_strategy")]
    pub default_strategy: StrategyId,

    #[serde(default)]
    pub local: LocalKeysConfig,

    #[serde(default)]
    pub cloud: CloudKeysConfig,

    #[serde(default)]
    pub vault: VaultKeysConfig,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            local: LocalKeysConfig::default(),
            cloud: CloudKeysConfig::default(),
            vault: VaultKeysConfig::default(),
        }
    }
}

fn default_strategy() -> StrategyId {
    StrategyId::Local
}

/// Local key file strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LocalKeysConfig {
    /// Operator-side directory holding `<identity>.key` files.
    #[serde(default = "default_key_dir")]
    pub key_dir: String,
}

impl Default for LocalKeysConfig {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
        }
    }
}

fn default_key_dir() -> String {
    dirs::config_dir()
        .map(|d| d.join("sealfleet").join("keys"))
        .unwrap_or_else(|| std::path::PathBuf::from(".sealfleet/keys"))
        .display()
        .to_string()
}

/// Cloud secret manager strategy (Google Secret Manager REST API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CloudKeysConfig {
    /// API base URL.
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,

    /// Project holding the key secrets. Required when the strategy is used.
    #[serde(default)]
    pub project: Option<String>,

    /// Prefix prepended to the bundle identity to form the secret id.
    #[serde(default = "default_cloud_prefix")]
    pub secret_prefix: String,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_cloud_token_env")]
    pub token_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CloudKeysConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cloud_endpoint(),
            project: None,
            secret_prefix: default_cloud_prefix(),
            token_env: default_cloud_token_env(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_cloud_endpoint() -> String {
    "https://secretmanager.googleapis.com/v1".to_string()
}

fn default_cloud_prefix() -> String {
    "sealfleet-".to_string()
}

fn default_cloud_token_env() -> String {
    "SEALFLEET_CLOUD_TOKEN".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    10
}

/// Central vault strategy (HashiCorp Vault KV v2).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultKeysConfig {
    /// Vault address. Falls back to `VAULT_ADDR` when unset.
    #[serde(default)]
    pub address: Option<String>,

    /// KV v2 mount.
    #[serde(default = "default_vault_mount")]
    pub mount: String,

    /// Path prefix under the mount; keys live at `<path_prefix>/<identity>`.
    #[serde(default = "default_vault_path_prefix")]
    pub path_prefix: String,

    /// Environment variable holding the vault token.
    #[serde(default = "default_vault_token_env")]
    pub token_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VaultKeysConfig {
    fn default() -> Self {
        Self {
            address: None,
            mount: default_vault_mount(),
            path_prefix: default_vault_path_prefix(),
            token_env: default_vault_token_env(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

fn default_vault_path_prefix() -> String {
    "sealfleet".to_string()
}

fn default_vault_token_env() -> String {
    "VAULT_TOKEN".to_string()
}

/// Push retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    /// Attempts per host before it is marked degraded.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between retries, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

/// Fraction of hosts that must verify before a rotation commits.
///
/// `"all"` requires every targeted host, including skipped ones. A number in
/// `(0, 1]` is a fraction of the hosts that received the update.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum QuorumSetting {
    Keyword(QuorumKeyword),
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumKeyword {
    All,
}

/// Rotation job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    /// Maximum hosts worked on concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_quorum")]
    pub quorum: QuorumSetting,

    /// Per-host bound on the Distributing phase, in seconds.
    #[serde(default = "default_distribute_timeout_secs")]
    pub distribute_timeout_secs: u64,

    /// Per-host bound on the Verifying phase, in seconds.
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            quorum: default_quorum(),
            distribute_timeout_secs: default_distribute_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}

fn default_quorum() -> QuorumSetting {
    QuorumSetting::Keyword(QuorumKeyword::All)
}

fn default_distribute_timeout_secs() -> u64 {
    120
}

fn default_verify_timeout_secs() -> u64 {
    60
}

/// Permission policy for deployed files.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Expected mode of artifact and key files (TOML accepts `0o600`).
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Expected mode of the artifact and key directories.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,

    /// Expected owner; `None` skips the ownership check.
    #[serde(default)]
    pub owner: Option<String>,

    /// Expected group; `None` skips the group check.
    #[serde(default)]
    pub group: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
            owner: None,
            group: None,
        }
    }
}

fn default_file_mode() -> u32 {
    0o600
}

fn default_dir_mode() -> u32 {
    0o700
}

/// Commands run on hosts during verification.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    /// Program on the host that opens an artifact (`sealfleet verify ...`).
    #[serde(default = "default_verify_program")]
    pub verify_program: String,

    /// Command restarting the services of a bundle; `{identity}` is substituted.
    /// Empty disables restarts.
    #[serde(default)]
    pub restart_command: Vec<String>,

    /// Command whose exit status reports service health; `{identity}` is substituted.
    #[serde(default)]
    pub health_command: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            verify_program: default_verify_program(),
            restart_command: Vec::new(),
            health_command: Vec::new(),
        }
    }
}

fn default_verify_program() -> String {
    "sealfleet".to_string()
}

/// How a host is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `address` is `user@host` (or an ssh config alias).
    Ssh,
    /// `address` is a directory on the operator machine standing in for the host root.
    Local,
}

/// One inventory entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub id: String,

    pub address: String,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// Bundle identities this host requires.
    #[serde(default)]
    pub bundles: Vec<String>,
}

fn default_transport() -> TransportKind {
    TransportKind::Ssh
}

impl SealfleetConfig {
    /// Inventory entries that require a bundle identity.
    pub fn hosts_for(&self, identity: &str) -> impl Iterator<Item = &HostConfig> {
        self.hosts
            .iter()
            .filter(move |h| h.bundles.iter().any(|b| b == identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_accepts_keyword_and_fraction() {
        let all: RotationConfig = toml::from_str("quorum = \"all\"").unwrap();
        assert_eq!(all.quorum, QuorumSetting::Keyword(QuorumKeyword::All));
        let frac: RotationConfig = toml::from_str("quorum = 0.75").unwrap();
        assert_eq!(frac.quorum, QuorumSetting::Fraction(0.75));
    }

    #[test]
    fn octal_modes_parse() {
        let audit: AuditConfig = toml::from_str("file_mode = 0o640").unwrap();
        assert_eq!(audit.file_mode, 0o640);
        assert_eq!(audit.dir_mode, 0o700);
    }

    #[test]
    fn hosts_for_filters_by_bundle() {
        let config: SealfleetConfig = toml::from_str(
            r#"
[[hosts]]
id = "a"
address = "root@a"
bundles = ["api"]

[[hosts]]
id = "b"
address = "root@b"
bundles = ["billing"]
"#,
        )
        .unwrap();
        let ids: Vec<_> = config.hosts_for("api").map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
