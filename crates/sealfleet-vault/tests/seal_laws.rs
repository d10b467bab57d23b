// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seal/open laws over arbitrary bundles and keys.

use proptest::prelude::*;
use sealfleet_core::{BundleIdentity, KeyMaterial, SealError, StrategyId, KEY_LEN};
use sealfleet_vault::{open, seal, Bundle, EncryptedArtifact, SecretValue};

fn arb_bundle() -> impl Strategy<Value = Bundle> {
    (
        "[a-z][a-z0-9-]{0,15}",
        prop::collection::btree_map("[A-Z_][A-Z0-9_]{0,10}", ".{0,64}", 0..6),
    )
        .prop_map(|(identity, entries)| {
            Bundle::create(
                BundleIdentity::new(identity).unwrap(),
                entries.into_iter().map(|(k, v)| (k, SecretValue::new(v))),
            )
            .unwrap()
        })
}

fn arb_key() -> impl Strategy<Value = KeyMaterial> {
    prop::array::uniform32(any::<u8>()).prop_map(|bytes| KeyMaterial::new(StrategyId::Local, bytes))
}

proptest! {
    #[test]
    fn open_of_seal_is_identity(bundle in arb_bundle(), key in arb_key()) {
        let artifact = seal(&bundle, &key).unwrap();
        let reparsed = EncryptedArtifact::parse(&artifact.render()).unwrap();
        prop_assert_eq!(open(&reparsed, &key).unwrap(), bundle);
    }

    #[test]
    fn any_flipped_payload_bit_is_detected(
        bundle in arb_bundle(),
        key in arb_key(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let rendered = String::from_utf8(seal(&bundle, &key).unwrap().render()).unwrap();
        let (head, body) = rendered.split_once("\n\n").unwrap();
        let mut payload = hex::decode(body.split_whitespace().collect::<String>()).unwrap();
        let i = index.index(payload.len());
        payload[i] ^= 1 << bit;
        let tampered = format!("{head}\n\n{}\n", hex::encode(&payload));
        let artifact = EncryptedArtifact::parse(tampered.as_bytes()).unwrap();
        let err = open(&artifact, &key).unwrap_err();
        prop_assert!(matches!(err, SealError::ChecksumMismatch { .. }), "expected ChecksumMismatch, got {:?}", err);
    }
}

#[test]
fn restamped_tamper_is_an_authentication_failure() {
    let key = KeyMaterial::new(StrategyId::Local, [9u8; KEY_LEN]);
    let bundle = Bundle::create(
        BundleIdentity::new("api").unwrap(),
        [("TOKEN".to_string(), SecretValue::from("abc"))],
    )
    .unwrap();
    let rendered = String::from_utf8(seal(&bundle, &key).unwrap().render()).unwrap();
    let (head, body) = rendered.split_once("\n\n").unwrap();
    let mut payload = hex::decode(body.split_whitespace().collect::<String>()).unwrap();
    let mid = payload.len() / 2;
    payload[mid] ^= 0xff;

    let old_sum = head
        .lines()
        .find_map(|l| l.strip_prefix("checksum: "))
        .unwrap()
        .to_string();
    let new_sum = sealfleet_vault::checksum(&payload).to_string();
    let forged = format!(
        "{}\n\n{}\n",
        head.replace(&old_sum, &new_sum),
        hex::encode(&payload)
    );

    let artifact = EncryptedArtifact::parse(forged.as_bytes()).unwrap();
    assert!(matches!(
        open(&artifact, &key),
        Err(SealError::AuthenticationFailed)
    ));
}
