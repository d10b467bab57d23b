// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lookup of key providers by strategy.

use std::collections::HashMap;
use std::sync::Arc;

use sealfleet_config::model::KeysConfig;
use sealfleet_core::{KeyProvider, SealError, StrategyId};
use tracing::debug;

use crate::central::VaultKeyProvider;
use crate::cloud::CloudKeyProvider;
use crate::local::LocalKeyProvider;

/// The set of configured key providers plus the strategy used for new bundles.
#[derive(Clone)]
pub struct KeyRegistry {
    providers: HashMap<StrategyId, Arc<dyn KeyProvider>>,
    default_strategy: StrategyId,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut strategies: Vec<_> = self.providers.keys().map(|s| s.to_string()).collect();
        strategies.sort();
        f.debug_struct("KeyRegistry")
            .field("strategies", &strategies)
            .field("default_strategy", &self.default_strategy)
            .finish()
    }
}

impl KeyRegistry {
    pub fn new(default_strategy: StrategyId) -> Self {
        Self {
            providers: HashMap::new(),
            default_strategy,
        }
    }

    /// Build every provider the configuration enables.
    ///
    /// The local provider is always present. Cloud and vault providers are
    /// only built when configured; failing to build the default strategy is
    /// an error, failing to build any other one is not.
    pub fn from_config(config: &KeysConfig) -> Result<Self, SealError> {
        let mut registry = Self::new(config.default_strategy);
        registry.register(Arc::new(LocalKeyProvider::new(&config.local.key_dir)));

        let wants_cloud =
            config.default_strategy == StrategyId::Cloud || config.cloud.project.is_some();
        if wants_cloud {
            match CloudKeyProvider::from_config(&config.cloud) {
                Ok(provider) => registry.register(Arc::new(provider)),
                Err(e) if config.default_strategy == StrategyId::Cloud => return Err(e),
                Err(e) => debug!(error = %e, "cloud key provider not configured"),
            }
        }

        match VaultKeyProvider::from_config(&config.vault) {
            Ok(provider) => registry.register(Arc::new(provider)),
            Err(e) if config.default_strategy == StrategyId::Vault => return Err(e),
            Err(e) => debug!(error = %e, "vault key provider not configured"),
        }

        Ok(registry)
    }

    /// Add or replace the provider for its strategy.
    pub fn register(&mut self, provider: Arc<dyn KeyProvider>) {
        self.providers.insert(provider.strategy_id(), provider);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_provider(mut self, provider: Arc<dyn KeyProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn default_strategy(&self) -> StrategyId {
        self.default_strategy
    }

    pub fn get(&self, strategy: StrategyId) -> Result<Arc<dyn KeyProvider>, SealError> {
        self.providers
            .get(&strategy)
            .cloned()
            .ok_or_else(|| SealError::Config(format!("key strategy `{strategy}` is not configured")))
    }

    /// Provider for the default strategy.
    pub fn default_provider(&self) -> Result<Arc<dyn KeyProvider>, SealError> {
        self.get(self.default_strategy)
    }

    pub fn strategies(&self) -> Vec<StrategyId> {
        let mut s: Vec<_> = self.providers.keys().copied().collect();
        s.sort_by_key(|id| id.to_string());
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_config(dir: &std::path::Path) -> KeysConfig {
        let mut config = KeysConfig::default();
        config.local.key_dir = dir.display().to_string();
        config.vault.address = None;
        config
    }

    #[test]
    fn local_is_always_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = KeyRegistry::from_config(&keys_config(dir.path())).unwrap();
        assert_eq!(registry.default_strategy(), StrategyId::Local);
        assert_eq!(
            registry.default_provider().unwrap().strategy_id(),
            StrategyId::Local
        );
    }

    #[test]
    fn cloud_default_without_project_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = keys_config(dir.path());
        config.default_strategy = StrategyId::Cloud;
        assert!(matches!(
            KeyRegistry::from_config(&config),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn cloud_with_project_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = keys_config(dir.path());
        config.cloud.project = Some("demo".into());
        let registry = KeyRegistry::from_config(&config).unwrap();
        assert!(registry.strategies().contains(&StrategyId::Cloud));
    }

    #[test]
    fn unknown_strategy_lookup_fails() {
        let registry = KeyRegistry::new(StrategyId::Local);
        let err = registry.get(StrategyId::Vault).err().unwrap();
        assert!(err.to_string().contains("vault"));
    }
}
