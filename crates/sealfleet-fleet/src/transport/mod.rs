// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin [`HostApply`](sealfleet_core::HostApply) adapters: a local directory
//! per host and plain `ssh`.

pub mod local;
pub mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use sealfleet_config::model::TransportKind;
use sealfleet_core::{ApplyResult, FilePlacement, Host, HostApply, HostCommand, SealError};

pub use local::LocalDirTransport;
pub use ssh::SshTransport;

/// Environment variable carrying the host root for commands run by
/// [`LocalDirTransport`].
pub const HOST_ROOT_ENV: &str = "SEALFLEET_ROOT";

/// Dispatches each host to the transport its inventory entry names.
pub struct InventoryTransport {
    kinds: std::collections::HashMap<sealfleet_core::HostId, TransportKind>,
    local: Arc<LocalDirTransport>,
    ssh: Arc<SshTransport>,
}

impl InventoryTransport {
    pub fn new(
        kinds: impl IntoIterator<Item = (sealfleet_core::HostId, TransportKind)>,
        ssh: SshTransport,
    ) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            local: Arc::new(LocalDirTransport),
            ssh: Arc::new(ssh),
        }
    }

    fn pick(&self, host: &Host) -> &dyn HostApply {
        match self.kinds.get(&host.id).copied().unwrap_or(TransportKind::Ssh) {
            TransportKind::Local => self.local.as_ref(),
            TransportKind::Ssh => self.ssh.as_ref(),
        }
    }
}

#[async_trait]
impl HostApply for InventoryTransport {
    async fn apply(
        &self,
        host: &Host,
        files: Vec<FilePlacement>,
        commands: Vec<HostCommand>,
    ) -> Result<ApplyResult, SealError> {
        self.pick(host).apply(host, files, commands).await
    }
}
