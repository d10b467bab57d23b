// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring of configured components for operator commands.

use std::sync::Arc;

use sealfleet_audit::{AccessPolicy, Auditor};
use sealfleet_config::SealfleetConfig;
use sealfleet_core::{BundleIdentity, Host, HostApply, HostId, SealError, StateStore};
use sealfleet_fleet::{
    CommandServiceHooks, CommandVerifier, Distributor, InventoryTransport, Orchestrator,
    RemoteLayout, RotationSettings, SshTransport,
};
use sealfleet_keys::KeyRegistry;
use sealfleet_resilience::RetryPolicy;
use sealfleet_storage::SqliteStateStore;

/// Components shared by operator commands.
pub struct App {
    pub config: SealfleetConfig,
    pub store: Arc<SqliteStateStore>,
    pub keys: Arc<KeyRegistry>,
    pub transport: Arc<dyn HostApply>,
    pub layout: RemoteLayout,
}

impl App {
    pub async fn open(config: SealfleetConfig) -> Result<Self, SealError> {
        let store = Arc::new(SqliteStateStore::open(&config.storage).await?);
        let keys = Arc::new(KeyRegistry::from_config(&config.keys)?);
        let transport: Arc<dyn HostApply> = Arc::new(InventoryTransport::new(
            config
                .hosts
                .iter()
                .map(|h| (HostId(h.id.clone()), h.transport)),
            SshTransport::default(),
        ));
        let layout = RemoteLayout::from_config(&config.artifacts);
        Ok(Self {
            config,
            store,
            keys,
            transport,
            layout,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let distributor = Distributor::new(
            self.transport.clone(),
            self.layout.clone(),
            RetryPolicy::from(&self.config.distribution),
        );
        Orchestrator::new(
            self.store.clone(),
            self.keys.clone(),
            Arc::new(distributor),
            Arc::new(CommandVerifier::new(
                self.transport.clone(),
                self.config.hooks.verify_program.clone(),
            )),
            Arc::new(CommandServiceHooks::new(
                self.transport.clone(),
                &self.config.hooks,
            )),
            RotationSettings::from(&self.config.rotation),
        )
    }

    /// Auditor that expects key files for bundles currently sealed with the
    /// local strategy.
    pub async fn auditor(&self) -> Result<Auditor, SealError> {
        let mut auditor = Auditor::new(
            self.transport.clone(),
            self.layout.clone(),
            AccessPolicy::from(&self.config.audit),
        )
        .with_concurrency(self.config.rotation.concurrency);
        for identity in self.store.list_identities().await? {
            let Some(version) = self.store.current_version(&identity).await? else {
                continue;
            };
            if let Some(stored) = self.store.get_artifact(&identity, version).await?
                && stored.strategy == sealfleet_core::StrategyId::Local
            {
                auditor = auditor.expect_key_file(identity);
            }
        }
        Ok(auditor)
    }

    /// Inventory hosts requiring `identity`, optionally narrowed to `filter`.
    pub fn hosts_for(
        &self,
        identity: &BundleIdentity,
        filter: Option<&[String]>,
    ) -> Result<Vec<Host>, SealError> {
        let hosts = inventory(&self.config)?;
        select_hosts(
            hosts.into_iter().filter(|h| h.requires(identity)).collect(),
            filter,
        )
    }

    /// Every inventory host, optionally narrowed to `filter`.
    pub fn all_hosts(&self, filter: Option<&[String]>) -> Result<Vec<Host>, SealError> {
        select_hosts(inventory(&self.config)?, filter)
    }
}

/// Convert inventory entries into hosts.
pub fn inventory(config: &SealfleetConfig) -> Result<Vec<Host>, SealError> {
    config
        .hosts
        .iter()
        .map(|entry| -> Result<Host, SealError> {
            let mut host = Host::new(&entry.id, &entry.address);
            for bundle in &entry.bundles {
                host = host.with_bundle(BundleIdentity::new(bundle.as_str())?);
            }
            Ok(host)
        })
        .collect()
}

/// Narrow `hosts` to the ids in `filter`, rejecting ids not among them.
pub fn select_hosts(hosts: Vec<Host>, filter: Option<&[String]>) -> Result<Vec<Host>, SealError> {
    let Some(filter) = filter else {
        return Ok(hosts);
    };
    if let Some(unknown) = filter
        .iter()
        .find(|id| !hosts.iter().any(|h| h.id.as_str() == id.as_str()))
    {
        return Err(SealError::Config(format!(
            "host `{unknown}` is not in the inventory for this operation"
        )));
    }
    Ok(hosts
        .into_iter()
        .filter(|h| filter.iter().any(|id| id == h.id.as_str()))
        .collect())
}
