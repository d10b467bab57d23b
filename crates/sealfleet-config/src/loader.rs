// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./sealfleet.toml` > `~/.config/sealfleet/sealfleet.toml` >
//! `/etc/sealfleet/sealfleet.toml` with environment variable overrides via `SEALFLEET_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::SealfleetConfig;

/// System-wide config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sealfleet/sealfleet.toml";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sealfleet.toml";

/// Per-user config file under the XDG config directory.
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("sealfleet/sealfleet.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/sealfleet/sealfleet.toml` (system-wide)
/// 3. `~/.config/sealfleet/sealfleet.toml` (user XDG config)
/// 4. `./sealfleet.toml` (local directory)
/// 5. `SEALFLEET_*` environment variables
pub fn load_config() -> Result<SealfleetConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<SealfleetConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SealfleetConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SealfleetConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SealfleetConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SealfleetConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Sections whose keys may contain underscores, longest first so that
/// `keys_local_` wins over `keys_`.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("keys_local_", "keys.local."),
    ("keys_cloud_", "keys.cloud."),
    ("keys_vault_", "keys.vault."),
    ("keys_", "keys."),
    ("storage_", "storage."),
    ("artifacts_", "artifacts."),
    ("distribution_", "distribution."),
    ("rotation_", "rotation."),
    ("audit_", "audit."),
    ("hooks_", "hooks."),
];

/// Map a lowercased, prefix-stripped env var name to a config key path.
///
/// `rotation_verify_timeout_secs` -> `rotation.verify_timeout_secs`,
/// `keys_cloud_project` -> `keys.cloud.project`, `log_level` -> `log_level`.
pub fn map_env_key(key: &str) -> String {
    for (prefix, section) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{section}{rest}");
        }
    }
    key.to_string()
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")`, since key names contain
/// underscores: `SEALFLEET_ROTATION_VERIFY_TIMEOUT_SECS` must map to
/// `rotation.verify_timeout_secs`, not `rotation.verify.timeout.secs`.
/// The inventory (`[[hosts]]`) cannot be set from the environment.
fn env_provider() -> Env {
    // SEALFLEET_CLOUD_TOKEN is the default cloud bearer token, not a config key.
    Env::prefixed("SEALFLEET_")
        .ignore(&["cloud_token"])
        .map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_key_sections_map_before_parent() {
        assert_eq!(map_env_key("keys_local_key_dir"), "keys.local.key_dir");
        assert_eq!(map_env_key("keys_default_strategy"), "keys.default_strategy");
        assert_eq!(map_env_key("keys_vault_path_prefix"), "keys.vault.path_prefix");
    }

    #[test]
    fn top_level_keys_are_untouched() {
        assert_eq!(map_env_key("log_level"), "log_level");
    }

    #[test]
    fn underscored_field_names_survive() {
        assert_eq!(
            map_env_key("rotation_verify_timeout_secs"),
            "rotation.verify_timeout_secs"
        );
    }
}
