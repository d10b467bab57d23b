// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as owner-only permission modes, bounded quorum fractions, and a
//! well-formed host inventory.

use std::collections::HashSet;

use sealfleet_core::{BundleIdentity, StrategyId};

use crate::diagnostic::ConfigError;
use crate::model::{QuorumSetting, SealfleetConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &SealfleetConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        invalid(format!(
            "log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.log_level
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        invalid("storage.database_path must not be empty".to_string());
    }

    for (key, dir) in [
        ("artifacts.remote_dir", &config.artifacts.remote_dir),
        ("artifacts.remote_key_dir", &config.artifacts.remote_key_dir),
    ] {
        if !dir.starts_with('/') {
            invalid(format!("{key} must be an absolute path, got `{dir}`"));
        }
    }
    if config.artifacts.remote_dir == config.artifacts.remote_key_dir {
        invalid("artifacts.remote_key_dir must differ from artifacts.remote_dir".to_string());
    }

    if config.keys.default_strategy == StrategyId::Cloud && config.keys.cloud.project.is_none() {
        invalid("keys.cloud.project is required when keys.default_strategy = \"cloud\"".to_string());
    }
    if config.keys.local.key_dir.trim().is_empty() {
        invalid("keys.local.key_dir must not be empty".to_string());
    }

    if config.distribution.max_attempts < 1 {
        invalid("distribution.max_attempts must be at least 1".to_string());
    }
    if config.distribution.initial_backoff_ms > config.distribution.max_backoff_ms {
        invalid(format!(
            "distribution.initial_backoff_ms ({}) must not exceed distribution.max_backoff_ms ({})",
            config.distribution.initial_backoff_ms, config.distribution.max_backoff_ms
        ));
    }

    if config.rotation.concurrency < 1 {
        invalid("rotation.concurrency must be at least 1".to_string());
    }
    if let QuorumSetting::Fraction(f) = config.rotation.quorum
        && !(f > 0.0 && f <= 1.0)
    {
        invalid(format!("rotation.quorum must be \"all\" or in (0, 1], got {f}"));
    }
    if config.rotation.distribute_timeout_secs == 0 || config.rotation.verify_timeout_secs == 0 {
        invalid("rotation timeouts must be greater than zero".to_string());
    }

    for (key, mode) in [
        ("audit.file_mode", config.audit.file_mode),
        ("audit.dir_mode", config.audit.dir_mode),
    ] {
        if mode & 0o077 != 0 {
            invalid(format!(
                "{key} must not grant group or other access, got {mode:04o}"
            ));
        }
        if mode & !0o777 != 0 {
            invalid(format!("{key} must be a permission mode, got {mode:o}"));
        }
    }

    if !config.hooks.restart_command.is_empty()
        && config.hooks.restart_command[0].trim().is_empty()
    {
        invalid("hooks.restart_command must start with a program".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (i, host) in config.hosts.iter().enumerate() {
        if host.id.trim().is_empty() {
            invalid(format!("hosts[{i}].id must not be empty"));
        } else if !seen_ids.insert(host.id.as_str()) {
            invalid(format!("duplicate host id `{}` in [[hosts]] array", host.id));
        }
        if host.address.trim().is_empty() {
            invalid(format!("hosts[{i}].address must not be empty"));
        }
        for bundle in &host.bundles {
            if let Err(e) = BundleIdentity::new(bundle.as_str()) {
                invalid(format!("hosts[{i}].bundles: {e}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostConfig, TransportKind};

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    fn host(id: &str, bundles: &[&str]) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            address: format!("root@{id}"),
            transport: TransportKind::Ssh,
            bundles: bundles.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&SealfleetConfig::default()).is_ok());
    }

    #[test]
    fn group_readable_file_mode_fails() {
        let mut config = SealfleetConfig::default();
        config.audit.file_mode = 0o640;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "audit.file_mode"));
    }

    #[test]
    fn quorum_fraction_out_of_range_fails() {
        let mut config = SealfleetConfig::default();
        config.rotation.quorum = QuorumSetting::Fraction(1.5);
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "rotation.quorum"));
    }

    #[test]
    fn cloud_default_requires_project() {
        let mut config = SealfleetConfig::default();
        config.keys.default_strategy = StrategyId::Cloud;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "keys.cloud.project"));
        config.keys.cloud.project = Some("ops-prod".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn duplicate_host_ids_and_bad_bundles_collected_together() {
        let mut config = SealfleetConfig::default();
        config.hosts = vec![host("a", &["api"]), host("a", &["../etc"])];
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "duplicate host id `a`"));
        assert!(has_error(&errors, "hosts[1].bundles"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn relative_remote_dir_fails() {
        let mut config = SealfleetConfig::default();
        config.artifacts.remote_dir = "artifacts".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "artifacts.remote_dir"));
    }
}
