// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expected modes and ownership.

use sealfleet_config::model::AuditConfig;
use sealfleet_core::FileStat;
use serde::Serialize;

use crate::record::{PathKind, Verdict};

/// What every managed path should look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPolicy {
    pub file_mode: u32,
    pub dir_mode: u32,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            file_mode: 0o600,
            dir_mode: 0o700,
            owner: None,
            group: None,
        }
    }
}

impl From<&AuditConfig> for AccessPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self {
            file_mode: config.file_mode,
            dir_mode: config.dir_mode,
            owner: config.owner.clone(),
            group: config.group.clone(),
        }
    }
}

impl AccessPolicy {
    pub fn mode_for(&self, kind: PathKind) -> u32 {
        match kind {
            PathKind::File => self.file_mode,
            PathKind::Directory => self.dir_mode,
        }
    }

    /// Human form of the expectation, e.g. `0600 root:root`.
    pub fn describe(&self, kind: PathKind) -> String {
        let mut text = format!("{:04o}", self.mode_for(kind));
        if self.owner.is_some() || self.group.is_some() {
            text.push_str(&format!(
                " {}:{}",
                self.owner.as_deref().unwrap_or("*"),
                self.group.as_deref().unwrap_or("*")
            ));
        }
        text
    }

    /// Judge one observed path.
    ///
    /// A mode drifts when it grants any bit the policy does not; stricter
    /// modes such as `0400` pass. Mode is checked before ownership, so a path
    /// with both problems reports the mode.
    pub fn judge(&self, kind: PathKind, observed: Option<&FileStat>) -> Verdict {
        let Some(stat) = observed else {
            return Verdict::Missing;
        };
        if stat.is_dir != (kind == PathKind::Directory) {
            return Verdict::WrongType;
        }
        if (stat.mode & !self.mode_for(kind)) != 0 {
            return Verdict::PermissionDrift;
        }
        let owner_ok = self.owner.as_ref().is_none_or(|o| *o == stat.owner);
        let group_ok = self.group.as_ref().is_none_or(|g| *g == stat.group);
        if owner_ok && group_ok {
            Verdict::Ok
        } else {
            Verdict::OwnerMismatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn file(mode: u32) -> FileStat {
        FileStat {
            mode,
            owner: "app".into(),
            group: "app".into(),
            is_dir: false,
        }
    }

    #[test]
    fn private_file_passes() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.judge(PathKind::File, Some(&file(0o600))), Verdict::Ok);
    }

    #[test]
    fn stricter_mode_passes() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.judge(PathKind::File, Some(&file(0o400))), Verdict::Ok);
        assert_eq!(
            policy.judge(PathKind::File, Some(&file(0o640))),
            Verdict::PermissionDrift
        );
        let mut dir = file(0o500);
        dir.is_dir = true;
        assert_eq!(policy.judge(PathKind::Directory, Some(&dir)), Verdict::Ok);
        dir.mode = 0o755;
        assert_eq!(
            policy.judge(PathKind::Directory, Some(&dir)),
            Verdict::PermissionDrift
        );
    }

    #[test]
    fn missing_and_wrong_type() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.judge(PathKind::File, None), Verdict::Missing);
        let mut dir = file(0o700);
        dir.is_dir = true;
        assert_eq!(policy.judge(PathKind::File, Some(&dir)), Verdict::WrongType);
    }

    #[test]
    fn owner_checked_only_when_configured() {
        let mut policy = AccessPolicy::default();
        assert_eq!(policy.judge(PathKind::File, Some(&file(0o600))), Verdict::Ok);
        policy.owner = Some("root".into());
        assert_eq!(
            policy.judge(PathKind::File, Some(&file(0o600))),
            Verdict::OwnerMismatch
        );
        assert_eq!(policy.describe(PathKind::File), "0600 root:*");
    }

    proptest! {
        #[test]
        fn any_group_or_other_access_is_drift(owner in 0u32..8, rest in 1u32..0o100) {
            let mode = (owner << 6) | rest;
            let policy = AccessPolicy::default();
            prop_assert_eq!(
                policy.judge(PathKind::File, Some(&file(mode))),
                Verdict::PermissionDrift
            );
        }

        #[test]
        fn owner_only_subsets_pass(owner in 0u32..8) {
            let policy = AccessPolicy { file_mode: 0o700, ..AccessPolicy::default() };
            prop_assert_eq!(
                policy.judge(PathKind::File, Some(&file(owner << 6))),
                Verdict::Ok
            );
        }
    }
}
