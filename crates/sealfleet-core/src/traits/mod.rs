// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the sealfleet core and its collaborators.
//!
//! All traits use `#[async_trait]` for dynamic dispatch compatibility, so
//! implementations can be held as `Arc<dyn Trait>`.

pub mod hooks;
pub mod host;
pub mod key_provider;
pub mod state;

pub use hooks::{ExpectedArtifact, HostVerifier, NoopServiceHooks, ServiceHooks};
pub use host::{ApplyResult, CommandOutput, ExecOutput, FilePlacement, HostApply, HostCommand};
pub use key_provider::KeyProvider;
pub use state::StateStore;
