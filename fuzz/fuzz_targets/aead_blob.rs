//! Fuzz target for domain-separated AES-GCM blobs
//!
//! # Strategy
//!
//! - Arbitrary key material, separators and plaintexts
//! - Nonces drawn from a seeded ChaCha20 stream
//! - Truncation and bit flips of valid blobs
//! - Raw arbitrary blobs
//!
//! # Invariants
//!
//! - Encrypt/decrypt roundtrip succeeds
//! - Blob size is nonce + plaintext + tag
//! - A different separator, truncation or any bit flip fails decryption
//! - Decrypting arbitrary bytes never panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use vetkeys_crypto::{
    DerivedKeyMaterial,
    key_material::{NONCE_SIZE, TAG_SIZE},
};

#[derive(Debug, Arbitrary)]
struct AeadScenario {
    key: Vec<u8>,
    domain_sep: Vec<u8>,
    plaintext: Vec<u8>,
    rng_seed: [u8; 32],
    flip_at: u16,
    truncate_by: u8,
    raw: Vec<u8>,
}

fuzz_target!(|scenario: AeadScenario| {
    let material = DerivedKeyMaterial::from_raw_key(&scenario.key);
    let mut rng = ChaCha20Rng::from_seed(scenario.rng_seed);

    // INVARIANT 4: Arbitrary bytes are rejected, not panicked on
    let _ = material.decrypt(&scenario.raw, &scenario.domain_sep);

    let blob = material.encrypt(&scenario.plaintext, &scenario.domain_sep, &mut rng);

    // INVARIANT 2: Size
    assert_eq!(blob.len(), NONCE_SIZE + scenario.plaintext.len() + TAG_SIZE);

    // INVARIANT 1: Roundtrip
    let decrypted = material.decrypt(&blob, &scenario.domain_sep).expect("roundtrip");
    assert_eq!(decrypted, scenario.plaintext);

    // INVARIANT 3: Separator binding
    let mut other_sep = scenario.domain_sep.clone();
    other_sep.push(0x01);
    assert!(material.decrypt(&blob, &other_sep).is_err(), "other separator must fail");

    // INVARIANT 3: Truncation
    if scenario.truncate_by > 0 {
        let keep = blob.len().saturating_sub(scenario.truncate_by as usize);
        assert!(material.decrypt(&blob[..keep], &scenario.domain_sep).is_err());
    }

    // INVARIANT 3: Bit flips
    let mut flipped = blob.clone();
    let at = scenario.flip_at as usize % flipped.len();
    flipped[at] ^= 0x01;
    assert!(material.decrypt(&flipped, &scenario.domain_sep).is_err(), "bit flip must fail");
});
