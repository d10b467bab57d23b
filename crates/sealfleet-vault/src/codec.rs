// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical serialization of bundles.
//!
//! The encoding is JSON with a fixed field order and names sorted, so equal
//! bundles always encode to identical bytes:
//!
//! ```text
//! {"format":1,"identity":"api","version":2,"created_at":"...","secrets":{"A":"...","B":"..."}}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sealfleet_core::{BundleIdentity, SealError};
use zeroize::Zeroizing;

use crate::bundle::{Bundle, SecretValue};

/// Current encoding format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EncodedBundle<'a> {
    format: u32,
    identity: &'a str,
    version: u64,
    created_at: DateTime<Utc>,
    secrets: BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DecodedBundle {
    format: u32,
    identity: String,
    version: u64,
    created_at: DateTime<Utc>,
    secrets: Entries,
}

/// Secret entries in document order, keeping duplicates so they can be rejected.
struct Entries(Vec<(String, SecretValue)>);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of secret names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, String>()? {
                    entries.push((name, SecretValue::new(value)));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Encode a bundle to its canonical bytes. The buffer is zeroed on drop.
pub fn encode(bundle: &Bundle) -> Result<Zeroizing<Vec<u8>>, SealError> {
    let encoded = EncodedBundle {
        format: FORMAT_VERSION,
        identity: bundle.identity().as_str(),
        version: bundle.version(),
        created_at: bundle.created_at(),
        secrets: bundle.iter().map(|(k, v)| (k, v.expose())).collect(),
    };
    serde_json::to_vec(&encoded)
        .map(Zeroizing::new)
        .map_err(|e| SealError::Internal(format!("bundle encoding failed: {e}")))
}

/// Decode canonical bytes back into a bundle.
///
/// Any parse or shape error, unknown format, invalid identity, duplicate or
/// invalid name is reported as `MalformedPayload`.
pub fn decode(bytes: &[u8]) -> Result<Bundle, SealError> {
    let decoded: DecodedBundle = serde_json::from_slice(bytes)
        // serde_json errors carry positions, never the offending value
        .map_err(|e| SealError::MalformedPayload(format!("bundle does not decode: {e}")))?;
    if decoded.format != FORMAT_VERSION {
        return Err(SealError::MalformedPayload(format!(
            "unsupported bundle format {}",
            decoded.format
        )));
    }
    let identity = BundleIdentity::new(decoded.identity)
        .map_err(|e| SealError::MalformedPayload(e.to_string()))?;
    Bundle::from_parts(identity, decoded.version, decoded.created_at, decoded.secrets.0)
        .map_err(|e| match e {
            SealError::MalformedPayload(_) => e,
            other => SealError::MalformedPayload(other.to_string()),
        })
}
