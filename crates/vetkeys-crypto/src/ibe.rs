//! Identity-based encryption
//!
//! Encrypt to any byte-string identity under a derived public key. Only the
//! holder of the VetKey for `(dpk, identity)` can decrypt.
//!
//! ```text
//! t    = H(header || seed || msg)                 hash-to-scalar
//! pt   = H_aug(dpk, identity)                      hash-to-G1
//! tsig = e(pt, dpk) ^ t
//! c1   = G2 * t
//! c2   = seed XOR HKDF(tsig)
//! c3   = msg  XOR SHAKE256(HKDF(seed))
//! ```
//!
//! Decryption recovers `tsig` as `e(vetkey, c1)`, unmasks seed and message,
//! and accepts only if `G2 * H(header || seed || msg) == c1`. That equation
//! is the only integrity check; there is no sender authentication.

use ic_bls12_381::{G2Affine, Gt, Scalar};
use rand::{CryptoRng, RngCore};
use sha3::{
    Shake256,
    digest::{ExtendableOutput, Update, XofReader},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    derivation::DerivedPublicKey,
    encoding::{G2_BYTES, ct_eq, decode_g2},
    error::CryptoError,
    hashing::{augmented_hash_to_g1, derive_key_32, hash_to_scalar},
    transport::VetKey,
};

/// Size of the one-time seed
const SEED_BYTES: usize = 32;

/// Minimum input accepted by [`IbeSeed::from_bytes`]
const MIN_SEED_INPUT: usize = 16;

/// "IC IBE" plus a two-byte version
const HEADER: [u8; 8] = [b'I', b'C', b' ', b'I', b'B', b'E', 0x00, 0x01];

/// Fixed ciphertext overhead: header + c1 + c2
const OVERHEAD: usize = HEADER.len() + G2_BYTES + SEED_BYTES;

const DST_HASH_TO_MASK: &str = "ic-vetkd-bls12-381-ibe-hash-to-mask";
const DST_MASK_SEED: &[u8] = b"ic-vetkd-bls12-381-ibe-mask-seed";
const DST_HASH_SEED: &[u8] = b"ic-vetkd-bls12-381-ibe-hash-seed";

/// Message mask separator; the length is zero-padded to 20 digits so every
/// separator has the same size.
fn mask_msg_dst(len: usize) -> String {
    format!("ic-vetkd-bls12-381-ibe-mask-msg-{len:020}")
}

/// An IBE identity: an opaque byte string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IbeIdentity {
    val: Vec<u8>,
}

impl IbeIdentity {
    /// Identity from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { val: bytes.to_vec() }
    }

    /// Identity from a UTF-8 string.
    pub fn from_string(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Identity bytes.
    pub fn value(&self) -> &[u8] {
        &self.val
    }
}

/// Single-use encryption randomness.
///
/// Reusing a seed fixes `t` and breaks confidentiality.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IbeSeed {
    val: Box<[u8; SEED_BYTES]>,
}

impl IbeSeed {
    /// Sample a random seed.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut val = Box::new([0u8; SEED_BYTES]);
        rng.fill_bytes(&mut val[..]);
        Self { val }
    }

    /// Seed from caller-provided randomness.
    ///
    /// Requires at least 16 bytes. Exactly 32 bytes are used directly; any
    /// other length is hashed with HKDF.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_SEED_INPUT {
            return Err(CryptoError::malformed(
                "ibe seed",
                format!("need at least {MIN_SEED_INPUT} bytes, got {}", bytes.len()),
            ));
        }

        let mut val = Box::new([0u8; SEED_BYTES]);
        if bytes.len() == SEED_BYTES {
            val.copy_from_slice(bytes);
        } else {
            val.copy_from_slice(derive_key_32(bytes, DST_HASH_SEED).as_ref());
        }
        Ok(Self { val })
    }

    fn value(&self) -> &[u8; SEED_BYTES] {
        &self.val
    }
}

/// An IBE ciphertext: `header (8) || c1 (96) || c2 (32) || c3 (len(msg))`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IbeCiphertext {
    c1: G2Affine,
    c2: [u8; SEED_BYTES],
    c3: Vec<u8>,
}

impl IbeCiphertext {
    /// Encrypt `msg` to `identity` under `dpk`.
    ///
    /// Allocates buffers proportional to the message; for large payloads
    /// encrypt a symmetric key instead.
    pub fn encrypt(
        dpk: &DerivedPublicKey,
        identity: &IbeIdentity,
        msg: &[u8],
        seed: &IbeSeed,
    ) -> Self {
        let t = hash_to_mask(seed.value(), msg);
        let pt = augmented_hash_to_g1(dpk.point(), identity.value());
        let tsig = ic_bls12_381::pairing(&pt, dpk.point()) * t;

        let c1 = G2Affine::from(G2Affine::generator() * t);
        let c2 = mask_seed(seed.value(), &tsig);
        let c3 = mask_msg(msg, seed.value());

        Self { c1, c2, c3 }
    }

    /// Decrypt with the VetKey for the target identity.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed` if the consistency check fails (wrong key,
    ///   corrupted ciphertext)
    pub fn decrypt(&self, vetkey: &VetKey) -> Result<Vec<u8>, CryptoError> {
        let tsig = ic_bls12_381::pairing(vetkey.point(), &self.c1);
        let mut seed = mask_seed(&self.c2, &tsig);
        let msg = mask_msg(&self.c3, &seed);

        let t = hash_to_mask(&seed, &msg);
        seed.zeroize();

        let expected = G2Affine::from(G2Affine::generator() * t);
        if ct_eq(&expected.to_compressed(), &self.c1.to_compressed()) {
            Ok(msg)
        } else {
            Err(CryptoError::DecryptionFailed {
                reason: "ibe consistency check failed".to_string(),
            })
        }
    }

    /// Serialize with the fixed header.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OVERHEAD + self.c3.len());
        out.extend_from_slice(&HEADER);
        out.extend_from_slice(&self.c1.to_compressed());
        out.extend_from_slice(&self.c2);
        out.extend_from_slice(&self.c3);
        out
    }

    /// Parse a serialized ciphertext.
    ///
    /// Fails with `MalformedInput` if too short, the header is unknown, or c1
    /// is not a valid point.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < OVERHEAD {
            return Err(CryptoError::malformed(
                "ibe ciphertext",
                format!("{} bytes is shorter than the {OVERHEAD}-byte overhead", bytes.len()),
            ));
        }

        let (header, rest) = bytes.split_at(HEADER.len());
        if header != HEADER {
            return Err(CryptoError::malformed("ibe ciphertext", "unknown header"));
        }

        let (c1_bytes, rest) = rest.split_at(G2_BYTES);
        let (c2_bytes, c3) = rest.split_at(SEED_BYTES);

        let c1 = decode_g2(c1_bytes, "ibe ciphertext c1")?;
        let mut c2 = [0u8; SEED_BYTES];
        c2.copy_from_slice(c2_bytes);

        Ok(Self { c1, c2, c3: c3.to_vec() })
    }

    /// Ciphertext size for a plaintext of `plaintext_size` bytes.
    pub fn ciphertext_size(plaintext_size: usize) -> usize {
        plaintext_size + OVERHEAD
    }

    /// Plaintext size for a ciphertext, or `None` if too short to be valid.
    pub fn plaintext_size(ciphertext_size: usize) -> Option<usize> {
        ciphertext_size.checked_sub(OVERHEAD)
    }
}

fn hash_to_mask(seed: &[u8; SEED_BYTES], msg: &[u8]) -> Scalar {
    let mut input = Vec::with_capacity(HEADER.len() + SEED_BYTES + msg.len());
    input.extend_from_slice(&HEADER);
    input.extend_from_slice(seed);
    input.extend_from_slice(msg);
    hash_to_scalar(&input, DST_HASH_TO_MASK)
}

fn mask_seed(seed: &[u8; SEED_BYTES], tsig: &Gt) -> [u8; SEED_BYTES] {
    let mask = derive_key_32(&tsig.to_bytes(), DST_MASK_SEED);
    let mut out = [0u8; SEED_BYTES];
    for (o, (s, m)) in out.iter_mut().zip(seed.iter().zip(mask.iter())) {
        *o = s ^ m;
    }
    out
}

fn mask_msg(msg: &[u8], seed: &[u8; SEED_BYTES]) -> Vec<u8> {
    let shake_seed = derive_key_32(seed, mask_msg_dst(msg.len()).as_bytes());

    let mut shake = Shake256::default();
    shake.update(shake_seed.as_ref());
    let mut mask = vec![0u8; msg.len()];
    shake.finalize_xof().read(&mut mask);

    for (m, b) in mask.iter_mut().zip(msg) {
        *m ^= b;
    }
    mask
}
