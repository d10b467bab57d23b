// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key provider that keeps keys in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sealfleet_core::{BundleIdentity, KeyId, KeyMaterial, KeyProvider, SealError, StrategyId};
use sealfleet_vault::crypto::generate_random_key;
use tokio::sync::Mutex;

#[derive(Default)]
struct Slot {
    current: Option<KeyMaterial>,
    staged: Option<KeyMaterial>,
}

/// Two-phase rotation over a map, posing as any strategy.
pub struct InMemoryKeyProvider {
    strategy: StrategyId,
    slots: Mutex<HashMap<BundleIdentity, Slot>>,
    fail_confirm: AtomicBool,
}

impl InMemoryKeyProvider {
    pub fn new(strategy: StrategyId) -> Self {
        Self {
            strategy,
            slots: Mutex::new(HashMap::new()),
            fail_confirm: AtomicBool::new(false),
        }
    }

    /// Make every `confirm_rollover` fail with `KeyUnavailable`.
    pub fn set_fail_confirm(&self, fail: bool) {
        self.fail_confirm.store(fail, Ordering::SeqCst);
    }

    pub async fn current_key_id(&self, identity: &BundleIdentity) -> Option<KeyId> {
        let slots = self.slots.lock().await;
        slots
            .get(identity)
            .and_then(|s| s.current.as_ref())
            .map(|k| k.key_id().clone())
    }

    pub async fn has_staged(&self, identity: &BundleIdentity) -> bool {
        let slots = self.slots.lock().await;
        slots.get(identity).is_some_and(|s| s.staged.is_some())
    }
}

impl Default for InMemoryKeyProvider {
    fn default() -> Self {
        Self::new(StrategyId::Local)
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    fn strategy_id(&self) -> StrategyId {
        self.strategy
    }

    async fn resolve(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        let slots = self.slots.lock().await;
        slots
            .get(identity)
            .and_then(|s| s.current.clone())
            .ok_or_else(|| SealError::key_unavailable(identity))
    }

    async fn resolve_key(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<KeyMaterial, SealError> {
        let slots = self.slots.lock().await;
        slots
            .get(identity)
            .and_then(|s| {
                [s.current.as_ref(), s.staged.as_ref()]
                    .into_iter()
                    .flatten()
                    .find(|k| k.key_id() == key_id)
                    .cloned()
            })
            .ok_or_else(|| SealError::key_unavailable(identity))
    }

    async fn rotate(&self, identity: &BundleIdentity) -> Result<KeyMaterial, SealError> {
        let key = KeyMaterial::new(self.strategy, generate_random_key()?);
        let mut slots = self.slots.lock().await;
        slots.entry(identity.clone()).or_default().staged = Some(key.clone());
        Ok(key)
    }

    async fn confirm_rollover(
        &self,
        identity: &BundleIdentity,
        key_id: &KeyId,
    ) -> Result<(), SealError> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(SealError::key_unavailable(identity));
        }
        let mut slots = self.slots.lock().await;
        let slot = slots
            .get_mut(identity)
            .ok_or_else(|| SealError::key_unavailable(identity))?;
        match slot.staged.take() {
            Some(staged) if staged.key_id() == key_id => {
                slot.current = Some(staged);
                Ok(())
            }
            other => {
                slot.staged = other;
                Err(SealError::key_unavailable(identity))
            }
        }
    }

    async fn abort_rollover(&self, identity: &BundleIdentity) -> Result<(), SealError> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(identity) {
            slot.staged = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_key_becomes_current_on_confirm() {
        let provider = InMemoryKeyProvider::default();
        let api = BundleIdentity::new("api").unwrap();
        assert!(provider.resolve(&api).await.is_err());

        let key = provider.rotate(&api).await.unwrap();
        assert!(provider.resolve(&api).await.is_err());
        assert!(provider.resolve_key(&api, key.key_id()).await.is_ok());

        provider.confirm_rollover(&api, key.key_id()).await.unwrap();
        assert_eq!(provider.current_key_id(&api).await.as_ref(), Some(key.key_id()));
        assert!(!provider.has_staged(&api).await);
    }

    #[tokio::test]
    async fn abort_keeps_current_key() {
        let provider = InMemoryKeyProvider::default();
        let api = BundleIdentity::new("api").unwrap();
        let first = provider.rotate(&api).await.unwrap();
        provider.confirm_rollover(&api, first.key_id()).await.unwrap();

        provider.rotate(&api).await.unwrap();
        provider.abort_rollover(&api).await.unwrap();
        assert_eq!(
            provider.resolve(&api).await.unwrap().key_id(),
            first.key_id()
        );
    }
}
