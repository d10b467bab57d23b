// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret bundles: named, versioned sets of secret values.
//!
//! Bundles are immutable. Changing a value produces a new bundle with the
//! next version; the previous one stays available as a backup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use sealfleet_core::{BundleIdentity, SealError};
use zeroize::Zeroizing;

/// Prefix stripped from secret names when exporting them to the environment.
pub const ENV_STRIP_PREFIX: &str = "vault_";

/// A secret value. Zeroed on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// The plaintext value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Preview safe for listings, see [`mask_secret`].
    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Mask a secret for display: first 4 and last 4 characters, or `****` when
/// the value is shorter than 10 characters.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 10 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}...{suffix}")
}

/// Check that a secret name can be exported as an environment variable.
pub fn validate_secret_name(name: &str) -> Result<(), SealError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SealError::InvalidSecretName(name.to_string()))
    }
}

/// Environment variable name for a secret: `vault_api_key` -> `API_KEY`,
/// `db_password` -> `DB_PASSWORD`.
pub fn env_var_name(name: &str) -> String {
    name.strip_prefix(ENV_STRIP_PREFIX)
        .filter(|rest| !rest.is_empty())
        .unwrap_or(name)
        .to_ascii_uppercase()
}

/// Changes applied by [`Bundle::next_version`].
#[derive(Debug, Clone, Default)]
pub struct BundleChanges {
    /// Names to add or overwrite.
    pub set: Vec<(String, SecretValue)>,
    /// Names to remove.
    pub unset: Vec<String>,
}

impl BundleChanges {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

/// A versioned set of named secrets for one bundle identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    identity: BundleIdentity,
    version: u64,
    created_at: DateTime<Utc>,
    secrets: BTreeMap<String, SecretValue>,
}

impl Bundle {
    /// First version of a bundle.
    ///
    /// Fails with `DuplicateSecretName` if a name repeats, or if two names
    /// would export to the same environment variable.
    pub fn create(
        identity: BundleIdentity,
        entries: impl IntoIterator<Item = (String, SecretValue)>,
    ) -> Result<Self, SealError> {
        Self::from_parts(identity, 1, Utc::now(), entries)
    }

    /// Rebuild a bundle from decoded parts, applying every construction check.
    pub fn from_parts(
        identity: BundleIdentity,
        version: u64,
        created_at: DateTime<Utc>,
        entries: impl IntoIterator<Item = (String, SecretValue)>,
    ) -> Result<Self, SealError> {
        if version == 0 {
            return Err(SealError::MalformedPayload(
                "bundle versions start at 1".into(),
            ));
        }
        let mut secrets = BTreeMap::new();
        for (name, value) in entries {
            validate_secret_name(&name)?;
            if secrets.contains_key(&name) {
                return Err(SealError::DuplicateSecretName(name));
            }
            secrets.insert(name, value);
        }
        check_env_collisions(secrets.keys())?;
        Ok(Self {
            identity,
            version,
            created_at,
            secrets,
        })
    }

    /// The next version: unchanged names are copied forward, `changes.set`
    /// overlays values, `changes.unset` removes names.
    pub fn next_version(&self, changes: &BundleChanges) -> Result<Self, SealError> {
        let mut secrets = self.secrets.clone();
        for name in &changes.unset {
            if secrets.remove(name).is_none() {
                return Err(SealError::NotFound {
                    what: format!("secret `{name}` in bundle `{}`", self.identity),
                });
            }
        }
        let mut seen = BTreeSet::new();
        for (name, value) in &changes.set {
            validate_secret_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(SealError::DuplicateSecretName(name.clone()));
            }
            secrets.insert(name.clone(), value.clone());
        }
        check_env_collisions(secrets.keys())?;
        let version = self
            .version
            .checked_add(1)
            .ok_or_else(|| SealError::Internal("bundle version overflow".into()))?;
        Ok(Self {
            identity: self.identity.clone(),
            version,
            created_at: Utc::now(),
            secrets,
        })
    }

    pub fn identity(&self) -> &BundleIdentity {
        &self.identity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.secrets.get(name)
    }

    /// Secret names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    /// Name/value pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.secrets.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names with masked previews, for `view --keys-only`.
    pub fn masked(&self) -> Vec<(String, String)> {
        self.secrets
            .iter()
            .map(|(k, v)| (k.clone(), v.masked()))
            .collect()
    }

    /// Environment variables exported to a consuming process.
    pub fn env_vars(&self) -> impl Iterator<Item = (String, &str)> {
        self.secrets
            .iter()
            .map(|(k, v)| (env_var_name(k), v.expose()))
    }
}

fn check_env_collisions<'a>(names: impl Iterator<Item = &'a String>) -> Result<(), SealError> {
    let mut seen = BTreeSet::new();
    for name in names {
        let env = env_var_name(name);
        if !seen.insert(env.clone()) {
            return Err(SealError::DuplicateSecretName(env));
        }
    }
    Ok(())
}

/// Names added, removed, or whose value differs between two bundles.
pub fn diff(a: &Bundle, b: &Bundle) -> BTreeSet<String> {
    let names: BTreeSet<&String> = a.secrets.keys().chain(b.secrets.keys()).collect();
    names
        .into_iter()
        .filter(|name| a.secrets.get(*name) != b.secrets.get(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> BundleIdentity {
        BundleIdentity::new("api").unwrap()
    }

    fn entry(name: &str, value: &str) -> (String, SecretValue) {
        (name.to_string(), SecretValue::from(value))
    }

    #[test]
    fn create_starts_at_version_one() {
        let b = Bundle::create(api(), [entry("A", "1"), entry("B", "2")]).unwrap();
        assert_eq!(b.version(), 1);
        assert_eq!(b.names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let err = Bundle::create(api(), [entry("A", "1"), entry("A", "2")]).unwrap_err();
        assert!(matches!(err, SealError::DuplicateSecretName(n) if n == "A"));
    }

    #[test]
    fn create_rejects_names_colliding_in_environment() {
        let err =
            Bundle::create(api(), [entry("vault_token", "1"), entry("TOKEN", "2")]).unwrap_err();
        assert!(matches!(err, SealError::DuplicateSecretName(n) if n == "TOKEN"));
    }

    #[test]
    fn create_rejects_invalid_names() {
        for bad in ["", "1ABC", "WITH-DASH", "a b"] {
            let err = Bundle::create(api(), [entry(bad, "x")]).unwrap_err();
            assert!(matches!(err, SealError::InvalidSecretName(_)), "{bad}");
        }
    }

    #[test]
    fn next_version_copies_forward_and_overlays() {
        let v1 = Bundle::create(api(), [entry("A", "1"), entry("B", "2")]).unwrap();
        let v2 = v1
            .next_version(&BundleChanges {
                set: vec![entry("B", "3"), entry("C", "4")],
                unset: vec![],
            })
            .unwrap();
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.get("A").unwrap().expose(), "1");
        assert_eq!(v2.get("B").unwrap().expose(), "3");
        assert_eq!(v2.get("C").unwrap().expose(), "4");
        assert_eq!(v1.get("B").unwrap().expose(), "2");
    }

    #[test]
    fn next_version_unset_removes_name() {
        let v1 = Bundle::create(api(), [entry("A", "1"), entry("B", "2")]).unwrap();
        let v2 = v1
            .next_version(&BundleChanges {
                set: vec![],
                unset: vec!["A".into()],
            })
            .unwrap();
        assert!(v2.get("A").is_none());

        let err = v2
            .next_version(&BundleChanges {
                set: vec![],
                unset: vec!["A".into()],
            })
            .unwrap_err();
        assert!(matches!(err, SealError::NotFound { .. }));
    }

    #[test]
    fn diff_reports_added_removed_and_modified() {
        let a = Bundle::create(api(), [entry("A", "1"), entry("B", "2"), entry("C", "3")]).unwrap();
        let b = a
            .next_version(&BundleChanges {
                set: vec![entry("B", "20"), entry("D", "4")],
                unset: vec!["C".into()],
            })
            .unwrap();
        let changed: Vec<_> = diff(&a, &b).into_iter().collect();
        assert_eq!(changed, vec!["B", "C", "D"]);
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn env_var_names_strip_vault_prefix() {
        assert_eq!(env_var_name("vault_api_key"), "API_KEY");
        assert_eq!(env_var_name("db_password"), "DB_PASSWORD");
        assert_eq!(env_var_name("vault_"), "VAULT_");
    }

    #[test]
    fn mask_secret_long_value() {
        assert_eq!(mask_secret("sk-live-abcdefghijklmnop"), "sk-l...mnop");
    }

    #[test]
    fn mask_secret_short_value() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("1234567890"), "1234...7890");
    }

    #[test]
    fn mask_secret_handles_multibyte() {
        assert_eq!(mask_secret("ééééxxxxxxüüüü"), "éééé...üüüü");
    }

    #[test]
    fn debug_never_prints_values() {
        let b = Bundle::create(api(), [entry("TOKEN", "hunter2-very-secret")]).unwrap();
        let debug = format!("{b:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
