// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! How many verified hosts a rotation needs before it may commit.

use sealfleet_config::model::{QuorumKeyword, QuorumSetting};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Quorum {
    /// Every target host must verify; skipped hosts count against the job.
    #[default]
    All,
    /// At least this fraction of the hosts that were reachable must verify.
    Fraction(f64),
}

impl From<&QuorumSetting> for Quorum {
    fn from(setting: &QuorumSetting) -> Self {
        match setting {
            QuorumSetting::Keyword(QuorumKeyword::All) => Self::All,
            QuorumSetting::Fraction(f) => Self::Fraction(*f),
        }
    }
}

impl Quorum {
    /// Verified hosts required out of `targets`, of which `skipped` never
    /// received the update.
    pub fn required(self, targets: usize, skipped: usize) -> usize {
        if targets == 0 {
            return 0;
        }
        match self {
            Self::All => targets,
            Self::Fraction(fraction) => {
                let reachable = targets.saturating_sub(skipped);
                let needed = (fraction.clamp(0.0, 1.0) * reachable as f64).ceil() as usize;
                needed.clamp(1, targets)
            }
        }
    }

    pub fn is_met(self, targets: usize, skipped: usize, verified: usize) -> bool {
        verified >= self.required(targets, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_counts_skipped_hosts() {
        assert_eq!(Quorum::All.required(5, 1), 5);
        assert!(!Quorum::All.is_met(5, 1, 4));
        assert!(Quorum::All.is_met(5, 0, 5));
    }

    #[test]
    fn fraction_excludes_skipped_hosts() {
        let q = Quorum::Fraction(0.5);
        assert_eq!(q.required(10, 4), 3);
        assert!(q.is_met(10, 4, 3));
        assert!(!q.is_met(10, 4, 2));
    }

    #[test]
    fn fraction_never_commits_with_nobody_verified() {
        assert_eq!(Quorum::Fraction(0.5).required(3, 3), 1);
        assert!(!Quorum::Fraction(0.5).is_met(3, 3, 0));
    }

    #[test]
    fn empty_host_set_needs_nothing() {
        assert!(Quorum::All.is_met(0, 0, 0));
    }
}
