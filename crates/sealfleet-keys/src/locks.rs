// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-identity async locks.

use std::sync::Arc;

use dashmap::DashMap;
use sealfleet_core::BundleIdentity;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work per bundle identity while letting different identities
/// proceed concurrently.
#[derive(Debug, Default, Clone)]
pub struct IdentityLocks {
    inner: Arc<DashMap<BundleIdentity, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `identity`.
    pub async fn lock(&self, identity: &BundleIdentity) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, identity: &BundleIdentity) -> Option<OwnedMutexGuard<()>> {
        let mutex = self
            .inner
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_identity_is_exclusive() {
        let locks = IdentityLocks::new();
        let api = BundleIdentity::new("api").unwrap();
        let guard = locks.lock(&api).await;
        assert!(locks.try_lock(&api).is_none());
        drop(guard);
        assert!(locks.try_lock(&api).is_some());
    }

    #[tokio::test]
    async fn different_identities_do_not_contend() {
        let locks = IdentityLocks::new();
        let _api = locks.lock(&BundleIdentity::new("api").unwrap()).await;
        assert!(locks.try_lock(&BundleIdentity::new("billing").unwrap()).is_some());
    }
}
