//! Fuzz target for transport-encrypted VetKey parsing
//!
//! Feeds arbitrary bytes to `EncryptedVetKey::deserialize` and, when they
//! parse, to `decrypt_and_verify`.
//!
//! # Strategy
//!
//! - Raw bytes of any length (the valid length is 192)
//! - Parsed keys are decrypted under a fixed transport key and derived
//!   public key
//!
//! # Invariants
//!
//! - Parsing never panics; wrong lengths and off-curve points are errors
//! - Anything that parses re-serializes to the same bytes
//! - Decryption never panics

#![no_main]

use ic_bls12_381::G2Affine;
use libfuzzer_sys::fuzz_target;
use vetkeys_crypto::{DerivedPublicKey, EncryptedVetKey, TransportSecretKey};

fuzz_target!(|data: &[u8]| {
    let Ok(encrypted) = EncryptedVetKey::deserialize(data) else {
        return;
    };

    // INVARIANT 1: Canonical encoding
    assert_eq!(data.len(), EncryptedVetKey::BYTES, "only 192-byte inputs may parse");
    assert_eq!(encrypted.serialize(), data, "parsed key must re-serialize identically");

    // INVARIANT 2: Decryption never panics
    let tsk = TransportSecretKey::from_seed([7u8; 32]);
    let dpk = DerivedPublicKey::from_point(G2Affine::generator());
    let _ = encrypted.decrypt_and_verify(&tsk, &dpk, &data[..16]);
});
