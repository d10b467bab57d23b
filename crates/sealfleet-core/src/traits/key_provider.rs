// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key material provider strategy interface.

use async_trait::async_trait;

use crate::error::SealError;
use crate::key::{KeyId, KeyMaterial};
use crate::types::{BundleIdentity, StrategyId};

/// A pluggable backend that supplies and rotates symmetric keys.
///
/// Every failure to produce a key (backend down, caller unauthorized, key
/// absent) must surface as [`SealError::KeyUnavailable`] so callers cannot
/// distinguish "missing" from "forbidden".
///
/// Rotation is two-phase: [`rotate`](Self::rotate) stages a new key next to
/// the current one, and the old key stays current until the caller confirms
/// it has re-encrypted with [`confirm_rollover`](Self::confirm_rollover).
#[async_trait]
pub trait KeyProvider: Send + Sync + 'static {
    /// The strategy this provider implements.
    fn strategy_id(&self) -> StrategyId;

    /// Return the current key for a bundle identity.
    async fn resolve(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError>;

    /// Return the current or staged key with the given fingerprint.
    ///
    /// Hosts use this to open artifacts sealed during a rollover.
    async fn resolve_key(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<KeyMaterial, SealError> {
        let key = self.resolve(identity).await?;
        if key.key_id() == key_id {
            Ok(key)
        } else {
            Err(SealError::key_unavailable(identity))
        }
    }

    /// Generate and persist a new staged key for the identity.
    async fn rotate(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError>;

    /// Promote the staged key with `key_id` to current, invalidating the old key.
    async fn confirm_rollover(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<(), SealError>;

    /// Discard a staged key, leaving the current key untouched.
    async fn abort_rollover(&self, identity: &BundleIdentity) -> Result<(), SealError>;
}
