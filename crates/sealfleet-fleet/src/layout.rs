// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where artifacts and key files live on a host.

use sealfleet_config::model::ArtifactsConfig;
use sealfleet_core::BundleIdentity;
use sealfleet_keys::local::key_file_name;
use sealfleet_vault::artifact_file_name;
use sealfleet_vault::integrity::sidecar_name;

/// Remote directory layout shared by the distributor, verifier and auditor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    artifact_dir: String,
    key_dir: String,
}

impl RemoteLayout {
    pub fn new(artifact_dir: impl Into<String>, key_dir: impl Into<String>) -> Self {
        Self {
            artifact_dir: trim_dir(artifact_dir.into()),
            key_dir: trim_dir(key_dir.into()),
        }
    }

    pub fn from_config(config: &ArtifactsConfig) -> Self {
        Self::new(&config.remote_dir, &config.remote_key_dir)
    }

    pub fn artifact_dir(&self) -> &str {
        &self.artifact_dir
    }

    pub fn key_dir(&self) -> &str {
        &self.key_dir
    }

    pub fn artifact_path(&self, identity: &BundleIdentity) -> String {
        join(&self.artifact_dir, &artifact_file_name(identity))
    }

    pub fn artifact_sidecar_path(&self, identity: &BundleIdentity) -> String {
        join(&self.artifact_dir, &sidecar_name(&artifact_file_name(identity)))
    }

    pub fn key_path(&self, identity: &BundleIdentity) -> String {
        join(&self.key_dir, &key_file_name(identity))
    }

    pub fn key_sidecar_path(&self, identity: &BundleIdentity) -> String {
        join(&self.key_dir, &sidecar_name(&key_file_name(identity)))
    }

    /// Every path sealfleet may write for an identity, artifact files first.
    pub fn managed_paths(&self, identity: &BundleIdentity) -> [String; 4] {
        [
            self.artifact_path(identity),
            self.artifact_sidecar_path(identity),
            self.key_path(identity),
            self.key_sidecar_path(identity),
        ]
    }
}

fn trim_dir(dir: String) -> String {
    if dir.len() > 1 {
        dir.trim_end_matches('/').to_string()
    } else {
        dir
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
