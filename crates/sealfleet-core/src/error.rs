// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for sealfleet.

use std::time::Duration;

use thiserror::Error;

/// Process exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Process exit code for operational failures (network, host, storage, config).
pub const EXIT_OPERATIONAL: i32 = 1;
/// Process exit code for integrity failures (checksum or authentication mismatch).
pub const EXIT_INTEGRITY: i32 = 2;

/// The primary error type used across all sealfleet crates.
#[derive(Debug, Error)]
pub enum SealError {
    /// A secret name appears more than once in a bundle.
    #[error("duplicate secret name `{0}`")]
    DuplicateSecretName(String),

    /// A secret name cannot be exported as an environment variable.
    #[error("invalid secret name `{0}`: names must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidSecretName(String),

    /// A bundle identity contains characters unsafe for file names and backend paths.
    #[error("invalid bundle identity `{0}`: use lowercase letters, digits, `-`, `_` or `.`")]
    InvalidIdentity(String),

    /// Bytes did not decode to the expected shape (bundle, artifact header, key file).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Key backend unreachable, caller unauthorized, or key absent.
    ///
    /// The three causes share one message so callers cannot probe for existence.
    #[error("key material unavailable for bundle `{identity}`")]
    KeyUnavailable { identity: String },

    /// AEAD tag check failed: wrong key or tampered ciphertext/header.
    #[error("authentication failed -- wrong key or tampered artifact")]
    AuthenticationFailed,

    /// Received bytes do not hash to the recorded checksum (transport corruption).
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A host could not receive or report files.
    #[error("distribution to host `{host}` failed: {message}")]
    DistributionError {
        host: String,
        message: String,
        /// Whether retrying may succeed (unreachable host, transfer timeout).
        transient: bool,
    },

    /// A host did not finish its decrypt-and-health round-trip in time.
    #[error("verification on host `{host}` timed out after {duration:?}")]
    VerificationTimeout { host: String, duration: Duration },

    /// A host could not prove it opens the new artifact, or reported unhealthy services.
    #[error("verification failed on host `{host}`: {message}")]
    VerificationFailed { host: String, message: String },

    /// Fewer hosts verified than the quorum requires.
    #[error("quorum not met: {verified} of {required} required hosts verified")]
    QuorumNotMet { verified: usize, required: usize },

    /// A deployed file is readable by principals the policy excludes.
    #[error("permission drift on `{host}:{path}`: expected {expected}, found {actual}")]
    PermissionDrift {
        host: String,
        path: String,
        expected: String,
        actual: String,
    },

    /// A bundle identity already has a committed version.
    #[error("bundle `{identity}` already exists")]
    AlreadyExists { identity: String },

    /// A requested entity (bundle, version, job, host) does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The job was cancelled before it touched any host.
    #[error("rotation cancelled")]
    Cancelled,

    /// Configuration errors (invalid TOML, bad inventory, unknown strategy).
    #[error("configuration error: {0}")]
    Config(String),

    /// State store errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SealError {
    /// Shorthand for [`SealError::KeyUnavailable`].
    pub fn key_unavailable(identity: impl std::fmt::Display) -> Self {
        Self::KeyUnavailable {
            identity: identity.to_string(),
        }
    }

    /// Shorthand for a storage error from any error source.
    pub fn storage<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Storage {
            source: source.into(),
        }
    }

    /// True for checksum and authentication failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::AuthenticationFailed
        )
    }

    /// True when retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DistributionError { transient, .. } => *transient,
            Self::Timeout { .. } | Self::ChecksumMismatch { .. } => true,
            _ => false,
        }
    }

    /// Exit code for the CLI: 2 for integrity failures, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        if self.is_integrity_failure() {
            EXIT_INTEGRITY
        } else {
            EXIT_OPERATIONAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures_exit_with_two() {
        assert_eq!(SealError::AuthenticationFailed.exit_code(), EXIT_INTEGRITY);
        let mismatch = SealError::ChecksumMismatch {
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        };
        assert_eq!(mismatch.exit_code(), EXIT_INTEGRITY);
    }

    #[test]
    fn operational_failures_exit_with_one() {
        let err = SealError::DistributionError {
            host: "a".into(),
            message: "connection refused".into(),
            transient: true,
        };
        assert_eq!(err.exit_code(), EXIT_OPERATIONAL);
        assert_eq!(SealError::key_unavailable("api").exit_code(), EXIT_OPERATIONAL);
    }

    #[test]
    fn key_unavailable_message_does_not_reveal_cause() {
        let msg = SealError::key_unavailable("api").to_string();
        assert_eq!(msg, "key material unavailable for bundle `api`");
    }

    #[test]
    fn transient_classification() {
        let permanent = SealError::DistributionError {
            host: "a".into(),
            message: "permission denied".into(),
            transient: false,
        };
        assert!(!permanent.is_transient());
        assert!(SealError::Timeout {
            duration: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!SealError::AuthenticationFailed.is_transient());
    }
}
