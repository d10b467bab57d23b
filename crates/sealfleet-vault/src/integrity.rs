// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content checksums and `sha256sum`-compatible sidecar files.
//!
//! Checksums detect transport corruption before any decrypt is attempted;
//! tampering is the AEAD tag's job.

use sealfleet_core::{Digest, HashAlgorithm, SealError};

/// Checksum of `bytes` under the current algorithm.
pub fn checksum(bytes: &[u8]) -> Digest {
    Digest::sha256(bytes)
}

/// True if `bytes` hash to `expected`. Comparison is constant-time.
pub fn verify(bytes: &[u8], expected: &Digest) -> bool {
    let actual = match expected.algorithm() {
        HashAlgorithm::Sha256 => checksum(bytes),
    };
    #[allow(deprecated)]
    let equal = ring::constant_time::verify_slices_are_equal(
        actual.hex().as_bytes(),
        expected.hex().as_bytes(),
    );
    equal.is_ok()
}

/// Like [`verify`], reporting a mismatch as `ChecksumMismatch`.
pub fn ensure(bytes: &[u8], expected: &Digest) -> Result<(), SealError> {
    if verify(bytes, expected) {
        Ok(())
    } else {
        Err(SealError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: checksum(bytes).to_string(),
        })
    }
}

/// Sidecar file name for a deployed file: `api.enc` -> `api.enc.sha256`.
pub fn sidecar_name(file_name: &str) -> String {
    format!("{file_name}.sha256")
}

/// Render a sidecar line: `<hex>  <file name>\n`.
pub fn render_sidecar(digest: &Digest, file_name: &str) -> String {
    format!("{}  {file_name}\n", digest.hex())
}

/// Parse a sidecar written by [`render_sidecar`] or `sha256sum`.
///
/// Returns the digest and the file name it describes.
pub fn parse_sidecar(text: &str) -> Result<(Digest, String), SealError> {
    let line = text
        .lines()
        .next()
        .ok_or_else(|| SealError::MalformedPayload("empty checksum sidecar".into()))?;
    let (hex, name) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| SealError::MalformedPayload("checksum sidecar lacks a file name".into()))?;
    // sha256sum marks binary mode with a leading `*`
    let name = name.trim_start().trim_start_matches('*').trim_end();
    if name.is_empty() {
        return Err(SealError::MalformedPayload(
            "checksum sidecar lacks a file name".into(),
        ));
    }
    Ok((Digest::from_hex(HashAlgorithm::Sha256, hex)?, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_known_vector() {
        assert_eq!(
            checksum(b"test").to_string(),
            "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn verify_detects_single_bit_flip() {
        let digest = checksum(b"payload");
        assert!(verify(b"payload", &digest));
        assert!(!verify(b"paylaod", &digest));
    }

    #[test]
    fn ensure_reports_both_digests() {
        let digest = checksum(b"a");
        match ensure(b"b", &digest) {
            Err(SealError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, digest.to_string());
                assert_eq!(actual, checksum(b"b").to_string());
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn sidecar_round_trips_and_accepts_sha256sum_output() {
        let digest = checksum(b"x");
        let line = render_sidecar(&digest, "api.enc");
        assert_eq!(line, format!("{}  api.enc\n", digest.hex()));
        assert_eq!(parse_sidecar(&line).unwrap(), (digest.clone(), "api.enc".into()));

        let binary_mode = format!("{} *api.enc\n", digest.hex());
        assert_eq!(parse_sidecar(&binary_mode).unwrap().1, "api.enc");
    }

    #[test]
    fn sidecar_rejects_garbage() {
        assert!(parse_sidecar("").is_err());
        assert!(parse_sidecar("abcd  api.enc").is_err());
        assert!(parse_sidecar(&checksum(b"x").hex().to_string()).is_err());
    }
}
