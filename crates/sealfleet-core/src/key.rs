// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key material and key fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroizing;

use crate::error::SealError;
use crate::types::StrategyId;

/// Length in bytes of every symmetric key (AES-256).
pub const KEY_LEN: usize = 32;

/// Length in hex characters of a key fingerprint.
const KEY_ID_LEN: usize = 16;

/// Public fingerprint of a key: the first 16 hex chars of SHA-256 over the key bytes.
///
/// Safe to log, store and embed in artifact headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Compute the fingerprint of raw key bytes.
    pub fn fingerprint(key: &[u8]) -> Self {
        let hash = Sha256::digest(key);
        let mut hex = hex::encode(hash);
        hex.truncate(KEY_ID_LEN);
        Self(hex)
    }

    /// Parse a fingerprint read from a header or backend record.
    pub fn parse(s: &str) -> Result<Self, SealError> {
        let s = s.trim();
        if s.len() == KEY_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(SealError::MalformedPayload(format!("invalid key id `{s}`")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symmetric key bytes plus the strategy that owns them.
///
/// Debug output intentionally omits the key bytes.
#[derive(Clone)]
pub struct KeyMaterial {
    strategy: StrategyId,
    key_id: KeyId,
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl KeyMaterial {
    pub fn new(strategy: StrategyId, bytes: [u8; KEY_LEN]) -> Self {
        let key_id = KeyId::fingerprint(&bytes);
        Self {
            strategy,
            key_id,
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Decode key bytes from their hex text form (key files, backend payloads).
    pub fn from_hex(strategy: StrategyId, text: &str) -> Result<Self, SealError> {
        let decoded = Zeroizing::new(
            hex::decode(text.trim())
                .map_err(|_| SealError::MalformedPayload("key material is not valid hex".into()))?,
        );
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            SealError::MalformedPayload(format!(
                "key material must be {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::new(strategy, bytes))
    }

    /// Hex text form, zeroed on drop.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(*self.bytes))
    }

    pub fn strategy(&self) -> StrategyId {
        self.strategy
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Raw key bytes. Callers must not log or persist them.
    pub fn expose_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("strategy", &self.strategy)
            .field("key_id", &self.key_id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = KeyId::fingerprint(&[7u8; KEY_LEN]);
        let b = KeyId::fingerprint(&[7u8; KEY_LEN]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, KeyId::fingerprint(&[8u8; KEY_LEN]));
    }

    #[test]
    fn hex_round_trip_keeps_key_id() {
        let key = KeyMaterial::new(StrategyId::Local, [42u8; KEY_LEN]);
        let parsed = KeyMaterial::from_hex(StrategyId::Local, &key.to_hex()).unwrap();
        assert_eq!(parsed.key_id(), key.key_id());
        assert_eq!(parsed.expose_bytes(), key.expose_bytes());
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = KeyMaterial::from_hex(StrategyId::Local, "abcd").unwrap_err();
        assert!(matches!(err, SealError::MalformedPayload(_)));
    }

    #[test]
    fn debug_redacts_bytes() {
        let key = KeyMaterial::new(StrategyId::Cloud, [1u8; KEY_LEN]);
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("0101"));
    }

    #[test]
    fn key_id_parse_validates() {
        assert!(KeyId::parse("0123456789abcdef").is_ok());
        assert!(KeyId::parse("xyz").is_err());
    }
}
