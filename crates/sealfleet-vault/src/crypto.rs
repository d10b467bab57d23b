// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level AES-256-GCM seal/open operations.
//!
//! Every call to [`seal`] generates a fresh random 96-bit nonce via the system
//! CSPRNG. Nonce reuse would be catastrophic for GCM security.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sealfleet_core::{SealError, KEY_LEN};
use zeroize::Zeroizing;

/// Length of the GCM authentication tag appended to ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of the random nonce prefixed to every sealed payload.
pub use ring::aead::NONCE_LEN;

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, SealError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| SealError::Internal("failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt plaintext with AES-256-GCM, authenticating `aad` alongside it.
///
/// Returns `(ciphertext_with_tag, nonce_bytes)`.
pub fn seal(
    key: &[u8; KEY_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), SealError> {
    let key = aead_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| SealError::Internal("failed to generate random nonce".to_string()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| SealError::Internal("AES-256-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

/// Decrypt ciphertext with AES-256-GCM.
///
/// `ciphertext` must include the tag appended by [`seal`], and `aad` must be
/// byte-identical to what was sealed. A wrong key, altered ciphertext, or
/// altered `aad` all fail with `AuthenticationFailed`.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce_bytes: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, SealError> {
    let key = aead_key(key)?;
    let nonce = Nonce::assume_unique_for_key(*nonce_bytes);

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| SealError::AuthenticationFailed)?
        .len();
    in_out.truncate(plaintext_len);

    Ok(in_out)
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
pub fn generate_random_key() -> Result<[u8; KEY_LEN], SealError> {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| SealError::Internal("failed to generate random key".to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"header", b"secret api key value").unwrap();
        let decrypted = open(&key, &nonce, b"header", &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), b"secret api key value");
    }

    #[test]
    fn seal_produces_different_ciphertext_for_same_plaintext() {
        let key = generate_random_key().unwrap();
        let (ct1, nonce1) = seal(&key, b"", b"same input twice").unwrap();
        let (ct2, nonce2) = seal(&key, b"", b"same input twice").unwrap();
        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn open_with_wrong_key_fails_authentication() {
        let key1 = generate_random_key().unwrap();
        let key2 = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key1, b"", b"secret data").unwrap();
        assert!(matches!(
            open(&key2, &nonce, b"", &ciphertext),
            Err(SealError::AuthenticationFailed)
        ));
    }

    #[test]
    fn altered_aad_fails_authentication() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"version: 2", b"secret").unwrap();
        assert!(matches!(
            open(&key, &nonce, b"version: 1", &ciphertext),
            Err(SealError::AuthenticationFailed)
        ));
    }

    #[test]
    fn ciphertext_carries_tag() {
        let key = generate_random_key().unwrap();
        let (ciphertext, _) = seal(&key, b"", b"hello").unwrap();
        assert_eq!(ciphertext.len(), 5 + TAG_LEN);
    }
}
