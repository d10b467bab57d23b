// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key material strategies for sealfleet.
//!
//! Each strategy implements [`sealfleet_core::KeyProvider`]: produce the
//! current key for a bundle identity, stage a new one during rotation, and
//! promote or discard the staged key when the rotation commits or rolls back.

pub mod central;
pub mod cloud;
pub mod local;
pub mod locks;
pub mod registry;

pub use central::VaultKeyProvider;
pub use cloud::CloudKeyProvider;
pub use local::{write_private_file, LocalKeyProvider};
pub use locks::IdentityLocks;
pub use registry::KeyRegistry;
