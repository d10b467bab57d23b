// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned content digests, rendered as `<algorithm>:<hex>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use strum::{Display, EnumString};

use crate::error::SealError;

/// Hash algorithm identifier carried with every digest.
///
/// Changing algorithms means adding a variant, never silently reinterpreting
/// existing checksums.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    /// Length of the hex rendering of a digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
        }
    }
}

/// A checksum together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: HashAlgorithm,
    hex: String,
}

impl Digest {
    /// Wrap a hex digest, validating its length for the algorithm.
    pub fn from_hex(algorithm: HashAlgorithm, hex: &str) -> Result<Self, SealError> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SealError::MalformedPayload(format!(
                "invalid {algorithm} digest `{hex}`"
            )));
        }
        Ok(Self { algorithm, hex })
    }

    /// SHA-256 of `bytes`.
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Short prefix for display in tables and logs.
    pub fn fingerprint(&self) -> &str {
        &self.hex[..16]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = SealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, hex) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| SealError::MalformedPayload(format!("digest `{s}` lacks algorithm")))?;
        let algorithm = HashAlgorithm::from_str(alg)
            .map_err(|_| SealError::MalformedPayload(format!("unknown hash algorithm `{alg}`")))?;
        Self::from_hex(algorithm, hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = SealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}
