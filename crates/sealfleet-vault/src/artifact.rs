// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealed artifacts: the `<identity>.enc` files shipped to hosts.
//!
//! ```text
//! $SEALFLEET;1
//! algorithm: aes-256-gcm
//! identity: api
//! version: 2
//! strategy: local
//! key-id: 3f9a0c1d2b4e5f60
//! created: 2026-10-19T12:00:00Z
//! checksum: sha256:<hex of payload>
//!
//! <hex of nonce || ciphertext || tag, wrapped at 80 columns>
//! ```
//!
//! Every header line except `checksum` is bound to the ciphertext as AEAD
//! associated data, so editing the header fails authentication.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sealfleet_core::{BundleIdentity, Digest, KeyId, KeyMaterial, SealError, StrategyId};
use tracing::debug;

use crate::bundle::Bundle;
use crate::codec;
use crate::crypto::{self, NONCE_LEN, TAG_LEN};
use crate::integrity;

/// First line of every artifact.
pub const MAGIC: &str = "$SEALFLEET;1";

/// The only supported cipher.
pub const ALGORITHM: &str = "aes-256-gcm";

const LINE_WIDTH: usize = 80;

const HEADER_KEYS: &[&str] = &[
    "algorithm",
    "identity",
    "version",
    "strategy",
    "key-id",
    "created",
    "checksum",
];

/// File name of the artifact for an identity on a host.
pub fn artifact_file_name(identity: &BundleIdentity) -> String {
    format!("{identity}.enc")
}

/// Authenticated metadata describing a sealed bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub identity: BundleIdentity,
    pub version: u64,
    pub strategy: StrategyId,
    pub key_id: KeyId,
    /// Sealing time, whole seconds.
    pub created_at: DateTime<Utc>,
}

impl ArtifactHeader {
    fn render_authenticated(&self) -> String {
        format!(
            "{MAGIC}\nalgorithm: {ALGORITHM}\nidentity: {}\nversion: {}\nstrategy: {}\nkey-id: {}\ncreated: {}\n",
            self.identity,
            self.version,
            self.strategy,
            self.key_id,
            self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

/// An encrypted bundle with its header and payload checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedArtifact {
    header: ArtifactHeader,
    checksum: Digest,
    /// `nonce || ciphertext || tag`
    payload: Vec<u8>,
}

impl EncryptedArtifact {
    pub fn header(&self) -> &ArtifactHeader {
        &self.header
    }

    pub fn identity(&self) -> &BundleIdentity {
        &self.header.identity
    }

    pub fn version(&self) -> u64 {
        self.header.version
    }

    pub fn strategy(&self) -> StrategyId {
        self.header.strategy
    }

    pub fn key_id(&self) -> &KeyId {
        &self.header.key_id
    }

    /// Checksum of the payload, as recorded in the header.
    pub fn checksum(&self) -> &Digest {
        &self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn file_name(&self) -> String {
        artifact_file_name(&self.header.identity)
    }

    /// Render the file contents.
    pub fn render(&self) -> Vec<u8> {
        let mut out = self.header.render_authenticated();
        out.push_str(&format!("checksum: {}\n\n", self.checksum));
        let body = hex::encode(&self.payload);
        for chunk in body.as_bytes().chunks(LINE_WIDTH) {
            // hex output is ASCII, so every chunk boundary is a char boundary
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Parse file contents. Any deviation from the format is `MalformedPayload`.
    ///
    /// Parsing checks shape only; checksum and authentication are checked by [`open`].
    pub fn parse(bytes: &[u8]) -> Result<Self, SealError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| malformed("artifact is not ASCII text"))?;
        let (head, body) = text
            .split_once("\n\n")
            .ok_or_else(|| malformed("artifact lacks a header/body separator"))?;

        let mut lines = head.lines();
        if lines.next() != Some(MAGIC) {
            return Err(malformed("not a sealfleet artifact"));
        }
        let mut fields = BTreeMap::new();
        for line in lines {
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| malformed(format!("bad header line `{line}`")))?;
            if !HEADER_KEYS.contains(&key) {
                return Err(malformed(format!("unknown header `{key}`")));
            }
            if fields.insert(key, value.trim()).is_some() {
                return Err(malformed(format!("repeated header `{key}`")));
            }
        }
        let field = |key: &str| {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| malformed(format!("missing header `{key}`")))
        };

        let algorithm = field("algorithm")?;
        if algorithm != ALGORITHM {
            return Err(malformed(format!("unsupported algorithm `{algorithm}`")));
        }
        let header = ArtifactHeader {
            identity: BundleIdentity::new(field("identity")?)
                .map_err(|e| malformed(e.to_string()))?,
            version: field("version")?
                .parse()
                .map_err(|_| malformed("version is not a number"))?,
            strategy: StrategyId::from_str(field("strategy")?)
                .map_err(|_| malformed("unknown key strategy"))?,
            key_id: KeyId::parse(field("key-id")?)?,
            created_at: DateTime::parse_from_rfc3339(field("created")?)
                .map_err(|_| malformed("created is not an RFC 3339 timestamp"))?
                .with_timezone(&Utc),
        };
        let checksum = Digest::from_str(field("checksum")?)?;

        let hex_body: String = body.split_whitespace().collect();
        let payload =
            hex::decode(hex_body).map_err(|_| malformed("artifact body is not valid hex"))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(malformed("artifact body is truncated"));
        }

        Ok(Self {
            header,
            checksum,
            payload,
        })
    }
}

fn malformed(message: impl Into<String>) -> SealError {
    SealError::MalformedPayload(message.into())
}

/// Encode and encrypt a bundle under `key`, stamping version and checksum.
pub fn seal(bundle: &Bundle, key: &KeyMaterial) -> Result<EncryptedArtifact, SealError> {
    let header = ArtifactHeader {
        identity: bundle.identity().clone(),
        version: bundle.version(),
        strategy: key.strategy(),
        key_id: key.key_id().clone(),
        created_at: Utc::now().trunc_subsecs(0),
    };
    let plaintext = codec::encode(bundle)?;
    let aad = header.render_authenticated();
    let (ciphertext, nonce) = crypto::seal(key.expose_bytes(), aad.as_bytes(), &plaintext)?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    let checksum = integrity::checksum(&payload);

    debug!(
        identity = %header.identity,
        version = header.version,
        key_id = %header.key_id,
        checksum = checksum.fingerprint(),
        "sealed bundle"
    );
    Ok(EncryptedArtifact {
        header,
        checksum,
        payload,
    })
}

/// Verify and decrypt an artifact.
///
/// Fails with `ChecksumMismatch` if the payload does not match the recorded
/// checksum, `AuthenticationFailed` on a wrong key or tampered
/// header/ciphertext, and `MalformedPayload` if the plaintext is not a bundle
/// matching the header.
pub fn open(artifact: &EncryptedArtifact, key: &KeyMaterial) -> Result<Bundle, SealError> {
    integrity::ensure(&artifact.payload, &artifact.checksum)?;

    if artifact.payload.len() < NONCE_LEN + TAG_LEN {
        return Err(malformed("artifact body is truncated"));
    }
    let (nonce, ciphertext) = artifact.payload.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| malformed("artifact nonce is truncated"))?;
    let aad = artifact.header.render_authenticated();
    let plaintext = crypto::open(key.expose_bytes(), &nonce, aad.as_bytes(), ciphertext)?;

    let bundle = codec::decode(&plaintext)?;
    if bundle.identity() != artifact.identity() || bundle.version() != artifact.version() {
        return Err(malformed("bundle does not match artifact header"));
    }
    Ok(bundle)
}
