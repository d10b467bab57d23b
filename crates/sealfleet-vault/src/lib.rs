// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret bundles and sealed artifacts for sealfleet.
//!
//! A [`Bundle`] is encoded canonically ([`codec`]), encrypted with
//! AES-256-GCM under a key from a key provider ([`artifact::seal`]), and
//! shipped as an armored `<identity>.enc` file whose payload checksum is
//! verified ([`integrity`]) before any decrypt is attempted.

pub mod artifact;
pub mod bundle;
pub mod codec;
pub mod crypto;
pub mod integrity;
pub mod prompt;

pub use artifact::{artifact_file_name, open, seal, ArtifactHeader, EncryptedArtifact};
pub use bundle::{diff, env_var_name, mask_secret, Bundle, BundleChanges, SecretValue};
pub use integrity::{checksum, verify};
