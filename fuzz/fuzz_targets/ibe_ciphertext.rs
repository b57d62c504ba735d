//! Fuzz target for IBE encryption and ciphertext parsing
//!
//! The derived public key is the G2 generator, so the VetKey of an identity
//! is its augmented hash point and decryption can be checked end to end.
//!
//! # Strategy
//!
//! - Arbitrary identities, messages and seeds
//! - Single-byte corruption of the serialized ciphertext
//! - Raw arbitrary bytes through `deserialize`
//!
//! # Invariants
//!
//! - Encrypt/decrypt roundtrip succeeds
//! - Serialization roundtrips and has the advertised size
//! - Any corrupted ciphertext fails to parse or to decrypt
//! - A different identity's key cannot decrypt
//! - Parsing never panics

#![no_main]

use arbitrary::Arbitrary;
use ic_bls12_381::G2Affine;
use libfuzzer_sys::fuzz_target;
use vetkeys_crypto::{
    DerivedPublicKey, IbeCiphertext, IbeIdentity, IbeSeed, VetKey, augmented_hash_to_g1,
};

#[derive(Debug, Arbitrary)]
struct IbeScenario {
    identity: Vec<u8>,
    message: Vec<u8>,
    seed: [u8; 32],
    /// Byte to corrupt (taken modulo the ciphertext length) and XOR mask
    corrupt_at: u16,
    corrupt_mask: u8,
    /// Raw bytes for the parser
    raw: Vec<u8>,
}

fn vetkey_for(dpk: &DerivedPublicKey, identity: &[u8]) -> VetKey {
    let point = augmented_hash_to_g1(dpk.point(), identity);
    VetKey::deserialize_and_verify(&point.to_compressed(), dpk, identity)
        .expect("generator key signs with secret 1")
}

fuzz_target!(|scenario: IbeScenario| {
    // INVARIANT 5: Parsing never panics
    let _ = IbeCiphertext::deserialize(&scenario.raw);

    let dpk = DerivedPublicKey::from_point(G2Affine::generator());
    let identity = IbeIdentity::from_bytes(&scenario.identity);
    let seed = IbeSeed::from_bytes(&scenario.seed).expect("32-byte seed");

    let ciphertext = IbeCiphertext::encrypt(&dpk, &identity, &scenario.message, &seed);
    let vetkey = vetkey_for(&dpk, &scenario.identity);

    // INVARIANT 1: Roundtrip
    let decrypted = ciphertext.decrypt(&vetkey).expect("valid ciphertext must decrypt");
    assert_eq!(decrypted, scenario.message);

    // INVARIANT 2: Serialization
    let bytes = ciphertext.serialize();
    assert_eq!(bytes.len(), IbeCiphertext::ciphertext_size(scenario.message.len()));
    let parsed = IbeCiphertext::deserialize(&bytes).expect("serialized ciphertext must parse");
    assert_eq!(parsed, ciphertext);

    // INVARIANT 3: Corruption is detected
    if scenario.corrupt_mask != 0 {
        let mut corrupted = bytes.clone();
        let at = scenario.corrupt_at as usize % corrupted.len();
        corrupted[at] ^= scenario.corrupt_mask;
        if let Ok(parsed) = IbeCiphertext::deserialize(&corrupted) {
            assert!(parsed.decrypt(&vetkey).is_err(), "corrupted ciphertext must not decrypt");
        }
    }

    // INVARIANT 4: Identity binding
    let mut other = scenario.identity.clone();
    other.push(0);
    let other_key = vetkey_for(&dpk, &other);
    assert!(ciphertext.decrypt(&other_key).is_err(), "other identity must not decrypt");
});
