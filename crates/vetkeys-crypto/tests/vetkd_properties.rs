//! Property-based tests for VetKD delivery, derivation and IBE
//!
//! These tests drive the public API against an in-test issuer that holds a
//! master secret:
//!
//! 1. **Derivation**: public derivation agrees with secret-side offsets, is
//!    deterministic, and an empty context is the identity
//! 2. **Delivery**: decrypt-and-verify accepts exactly the issued key
//! 3. **IBE round-trip**: any message decrypts under the identity's VetKey
//! 4. **Tamper detection**: any bit flip is rejected

use ic_bls12_381::{G1Affine, G2Affine, Scalar};
use pairing::group::Curve;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use vetkeys_crypto::{
    CryptoError, DerivedPublicKey, EncryptedVetKey, IbeCiphertext, IbeIdentity, IbeSeed,
    MasterPublicKey, TransportSecretKey, VetKey, augmented_hash_to_g1,
};

const CANISTER_ID: &[u8] = b"chat-canister";

// Issuer holding the secret for one derived key
struct Issuer {
    secret: Scalar,
    dpk: DerivedPublicKey,
}

impl Issuer {
    fn derive(master_secret: u64, context: &[u8]) -> Self {
        let msk = Scalar::from(master_secret);
        let mpk = MasterPublicKey::from_point(G2Affine::from(G2Affine::generator() * msk));

        let canister_key = mpk.derive_canister_key(CANISTER_ID);
        let secret = msk + mpk.canister_offset(CANISTER_ID) + canister_key.context_offset(context);
        Self { secret, dpk: canister_key.derive_sub_key(context) }
    }

    fn encrypted_vetkey(&self, tpk: &[u8; 48], input: &[u8], r: u64) -> Vec<u8> {
        let r = Scalar::from(r);
        let tpk = G1Affine::from_compressed(tpk).unwrap();
        let sig = augmented_hash_to_g1(self.dpk.point(), input) * self.secret;

        let mut out = Vec::with_capacity(EncryptedVetKey::BYTES);
        out.extend_from_slice(&(G1Affine::generator() * r).to_affine().to_compressed());
        out.extend_from_slice(&(G2Affine::generator() * r).to_affine().to_compressed());
        out.extend_from_slice(&(tpk * r + sig).to_affine().to_compressed());
        out
    }

    fn vetkey(&self, input: &[u8]) -> VetKey {
        let tsk = TransportSecretKey::from_seed([9u8; 32]);
        let encrypted = self.encrypted_vetkey(&tsk.public_key_bytes(), input, 5);
        EncryptedVetKey::deserialize(&encrypted)
            .unwrap()
            .decrypt_and_verify(&tsk, &self.dpk, input)
            .unwrap()
    }
}

#[test]
fn scenario_deliver_then_encrypt() {
    let issuer = Issuer::derive(42, b"ctx");
    let tsk = TransportSecretKey::random(&mut ChaCha20Rng::seed_from_u64(1));

    let encrypted = issuer.encrypted_vetkey(&tsk.public_key_bytes(), b"hello", 77);
    let vetkey = EncryptedVetKey::deserialize(&encrypted)
        .unwrap()
        .decrypt_and_verify(&tsk, &issuer.dpk, b"hello")
        .unwrap();

    let material = vetkey.as_derived_key_material();
    let blob = material.encrypt(b"secret", b"test", &mut ChaCha20Rng::seed_from_u64(2));
    assert_eq!(material.decrypt(&blob, b"test").unwrap(), b"secret");
}

#[test]
fn scenario_ibe_empty_and_large_messages() {
    let issuer = Issuer::derive(7, b"ibe");
    let identity = IbeIdentity::from_string("alice");
    let vetkey = issuer.vetkey(identity.value());
    let mut rng = ChaCha20Rng::seed_from_u64(3);

    for len in [0usize, 10_000] {
        let msg = vec![0xa5u8; len];
        let seed = IbeSeed::random(&mut rng);
        let ct = IbeCiphertext::encrypt(&issuer.dpk, &identity, &msg, &seed);

        let bytes = ct.serialize();
        assert_eq!(bytes.len(), 8 + 96 + 32 + len);
        assert_eq!(IbeCiphertext::ciphertext_size(len), bytes.len());

        let parsed = IbeCiphertext::deserialize(&bytes).unwrap();
        assert_eq!(parsed.decrypt(&vetkey).unwrap(), msg);
    }
}

#[test]
fn verification_rejects_other_context() {
    let issuer = Issuer::derive(42, b"ctx");
    let other = Issuer::derive(42, b"other");
    let tsk = TransportSecretKey::from_seed([1u8; 32]);

    let encrypted = issuer.encrypted_vetkey(&tsk.public_key_bytes(), b"hello", 3);
    let err = EncryptedVetKey::deserialize(&encrypted)
        .unwrap()
        .decrypt_and_verify(&tsk, &other.dpk, b"hello")
        .unwrap_err();
    assert_eq!(err, CryptoError::InvalidSignature);
    assert!(err.is_security_failure());
}

#[test]
fn reshared_bytes_verify_only_under_their_key() {
    let issuer = Issuer::derive(11, b"chat/1");
    let vetkey = issuer.vetkey(b"");

    let restored =
        VetKey::deserialize_and_verify(vetkey.signature_bytes(), &issuer.dpk, b"").unwrap();
    assert_eq!(restored.signature_bytes(), vetkey.signature_bytes());

    let other = Issuer::derive(11, b"chat/2");
    assert!(matches!(
        VetKey::deserialize_and_verify(vetkey.signature_bytes(), &other.dpk, b""),
        Err(CryptoError::InvalidVetKey { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_public_derivation_matches_secret(
        master_secret in 1u64..u64::MAX,
        context in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let issuer = Issuer::derive(master_secret, &context);
        let expected = G2Affine::from(G2Affine::generator() * issuer.secret);
        prop_assert_eq!(issuer.dpk.point(), &expected);
    }

    #[test]
    fn prop_derivation_deterministic(
        master_secret in 1u64..u64::MAX,
        context in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let mpk = MasterPublicKey::from_point(
            G2Affine::from(G2Affine::generator() * Scalar::from(master_secret)),
        );
        let a = mpk.derive_canister_key(CANISTER_ID).derive_sub_key(&context);
        let b = mpk.derive_canister_key(CANISTER_ID).derive_sub_key(&context);
        prop_assert_eq!(a.serialize(), b.serialize());

        let canister_key = mpk.derive_canister_key(CANISTER_ID);
        prop_assert_eq!(canister_key.derive_sub_key(b""), canister_key);
    }

    #[test]
    fn prop_ibe_roundtrip(
        msg in prop::collection::vec(any::<u8>(), 0..512),
        identity in prop::collection::vec(any::<u8>(), 0..32),
        seed in prop::array::uniform32(any::<u8>()),
    ) {
        let issuer = Issuer::derive(99, b"ibe");
        let identity = IbeIdentity::from_bytes(&identity);
        let vetkey = issuer.vetkey(identity.value());

        let seed = IbeSeed::from_bytes(&seed).unwrap();
        let ct = IbeCiphertext::encrypt(&issuer.dpk, &identity, &msg, &seed);
        prop_assert_eq!(ct.decrypt(&vetkey).unwrap(), msg);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    #[test]
    fn prop_ibe_bit_flip_detected(
        msg in prop::collection::vec(any::<u8>(), 1..64),
        flip in any::<prop::sample::Index>(),
    ) {
        let issuer = Issuer::derive(5, b"ibe");
        let identity = IbeIdentity::from_string("bob");
        let vetkey = issuer.vetkey(identity.value());

        let seed = IbeSeed::random(&mut ChaCha20Rng::seed_from_u64(4));
        let mut bytes = IbeCiphertext::encrypt(&issuer.dpk, &identity, &msg, &seed).serialize();
        let bit = flip.index(bytes.len() * 8);
        bytes[bit / 8] ^= 1 << (bit % 8);

        // Either the header/point no longer parses, or decryption rejects it
        let outcome = IbeCiphertext::deserialize(&bytes).and_then(|ct| ct.decrypt(&vetkey));
        prop_assert!(outcome.is_err(), "bit {} flip undetected", bit);
    }

    #[test]
    fn prop_wrong_transport_key_rejected(r in 1u64..1_000_000) {
        let issuer = Issuer::derive(3, b"ctx");
        let tsk = TransportSecretKey::from_seed([1u8; 32]);
        let wrong = TransportSecretKey::from_seed([2u8; 32]);

        let encrypted = issuer.encrypted_vetkey(&tsk.public_key_bytes(), b"input", r);
        let result = EncryptedVetKey::deserialize(&encrypted)
            .unwrap()
            .decrypt_and_verify(&wrong, &issuer.dpk, b"input");
        prop_assert_eq!(result.unwrap_err(), CryptoError::InvalidSignature);
    }
}
