// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for sealfleet.
//!
//! This crate provides the error taxonomy, identifiers, key material type,
//! rotation job records, and the trait seams (key providers, host transport,
//! verification hooks, state store) used throughout the workspace.

pub mod digest;
pub mod error;
pub mod job;
pub mod key;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use digest::{Digest, HashAlgorithm};
pub use error::{SealError, EXIT_INTEGRITY, EXIT_OK, EXIT_OPERATIONAL};
pub use job::{BackupSummary, HostOutcome, JobKind, JobRecord, JobState, StoredArtifact};
pub use key::{KeyId, KeyMaterial, KEY_LEN};
pub use types::{
    BundleIdentity, FileStat, HealthStatus, Host, HostHealth, HostId, HostRecord, StrategyId,
};

pub use traits::{
    ApplyResult, CommandOutput, ExecOutput, ExpectedArtifact, FilePlacement, HostApply,
    HostCommand, HostVerifier, KeyProvider, NoopServiceHooks, ServiceHooks, StateStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_error_has_all_taxonomy_variants() {
        let _dup = SealError::DuplicateSecretName("A".into());
        let _malformed = SealError::MalformedPayload("x".into());
        let _key = SealError::key_unavailable("api");
        let _auth = SealError::AuthenticationFailed;
        let _sum = SealError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        let _dist = SealError::DistributionError {
            host: "h".into(),
            message: "m".into(),
            transient: true,
        };
        let _timeout = SealError::VerificationTimeout {
            host: "h".into(),
            duration: std::time::Duration::from_secs(1),
        };
        let _quorum = SealError::QuorumNotMet {
            verified: 1,
            required: 2,
        };
        let _drift = SealError::PermissionDrift {
            host: "h".into(),
            path: "/p".into(),
            expected: "0600".into(),
            actual: "0644".into(),
        };
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_key_provider<T: KeyProvider>() {}
        fn _assert_host_apply<T: HostApply>() {}
        fn _assert_host_verifier<T: HostVerifier>() {}
        fn _assert_service_hooks<T: ServiceHooks>() {}
        fn _assert_state_store<T: StateStore>() {}
        _assert_service_hooks::<NoopServiceHooks>();
    }

    #[tokio::test]
    async fn noop_hooks_report_healthy() {
        let host = Host::new("a", "/srv/a");
        let identity = BundleIdentity::new("api").unwrap();
        let status = NoopServiceHooks.restart(&host, &identity).await.unwrap();
        assert_eq!(status, HealthStatus::Healthy);
    }
}
