// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Getting sealed artifacts onto hosts and keeping the fleet consistent.
//!
//! [`Distributor`] moves files with backups and read-back checks,
//! [`Orchestrator`] drives a rotation job through distribution, verification
//! and quorum to a commit or a fleet-wide rollback.

pub mod distributor;
pub mod layout;
pub mod orchestrator;
pub mod quorum;
pub mod transport;
pub mod verify;

pub use distributor::{Distributor, HostBackup, Payload, PushOutcome};
pub use layout::RemoteLayout;
pub use orchestrator::{
    Orchestrator, RotationOutcome, RotationPlan, RotationRequest, RotationSettings,
};
pub use quorum::Quorum;
pub use transport::{InventoryTransport, LocalDirTransport, SshTransport, HOST_ROOT_ENV};
pub use verify::{CommandServiceHooks, CommandVerifier};
