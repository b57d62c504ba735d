//! Transport-encrypted key delivery and verification
//!
//! The requester generates an ephemeral [`TransportSecretKey`] and sends the
//! public half to the issuance service. The service answers with an
//! [`EncryptedVetKey`] `(c1, c2, c3)`:
//!
//! ```text
//! c1 = G1 * r        c2 = G2 * r        c3 = tpk * r + sig
//! ```
//!
//! Decryption is only half the job. Before a [`VetKey`] exists the candidate
//! must pass two checks:
//!
//! 1. `e(c1, G2) == e(G1, c2)`: c1 and c2 share a discrete log
//! 2. `e(sig, G2) == e(H(dpk || input), dpk)`: the unmasked point is a valid
//!    augmented BLS signature under the derived public key
//!
//! A `VetKey` cannot be constructed any other way.

use std::fmt;

use ic_bls12_381::{G1Affine, G1Projective, G2Affine, G2Prepared, Scalar};
use pairing::group::{Curve, Group, ff::Field};
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    derivation::DerivedPublicKey,
    encoding::{G1_BYTES, G2_BYTES, decode_g1, decode_g2, decode_scalar},
    error::CryptoError,
    hashing::{G2PREPARED_NEG_G, augmented_hash_to_g1, derive_symmetric_key, gt_multipairing},
    key_material::DerivedKeyMaterial,
};

/// Secret key of the ephemeral transport key pair.
///
/// Created per key request and dropped after use; never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TransportSecretKey {
    // Boxed so moves copy the pointer, not the secret
    secret_key: Box<Scalar>,
}

impl TransportSecretKey {
    /// Serialized size of the secret scalar
    pub const BYTES: usize = 32;

    /// Sample a uniformly random secret.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { secret_key: Box::new(Scalar::random(rng)) }
    }

    /// Deterministic key from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut rng = ChaCha20Rng::from_seed(seed);
        Self::random(&mut rng)
    }

    /// Compressed 48-byte public key to send to the issuance service.
    pub fn public_key_bytes(&self) -> [u8; G1_BYTES] {
        (G1Affine::generator() * *self.secret_key).to_affine().to_compressed()
    }

    /// Serialize the secret scalar.
    pub fn serialize(&self) -> Zeroizing<[u8; Self::BYTES]> {
        Zeroizing::new(self.secret_key.to_bytes())
    }

    /// Deserialize a 32-byte secret scalar.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { secret_key: Box::new(decode_scalar(bytes, "transport secret key")?) })
    }
}

impl fmt::Debug for TransportSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSecretKey").finish_non_exhaustive()
    }
}

/// True iff `bytes` is a valid compressed transport public key.
pub fn is_valid_transport_public_key(bytes: &[u8]) -> bool {
    decode_g1(bytes, "transport public key").is_ok()
}

/// A VetKey encrypted under a transport public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedVetKey {
    c1: G1Affine,
    c2: G2Affine,
    c3: G1Affine,
}

impl EncryptedVetKey {
    /// Serialized size: 48 + 96 + 48
    pub const BYTES: usize = 2 * G1_BYTES + G2_BYTES;

    const C2_OFFSET: usize = G1_BYTES;
    const C3_OFFSET: usize = G1_BYTES + G2_BYTES;

    /// Parse a 192-byte encrypted key.
    ///
    /// Fails with `MalformedInput` on wrong length or if any segment is not a
    /// valid point.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != Self::BYTES {
            return Err(CryptoError::malformed(
                "encrypted vetkey",
                format!("expected {} bytes, got {}", Self::BYTES, bytes.len()),
            ));
        }

        let c1 = decode_g1(&bytes[..Self::C2_OFFSET], "encrypted vetkey c1")?;
        let c2 = decode_g2(&bytes[Self::C2_OFFSET..Self::C3_OFFSET], "encrypted vetkey c2")?;
        let c3 = decode_g1(&bytes[Self::C3_OFFSET..], "encrypted vetkey c3")?;
        Ok(Self { c1, c2, c3 })
    }

    /// Serialize as `c1 || c2 || c3`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTES);
        out.extend_from_slice(&self.c1.to_compressed());
        out.extend_from_slice(&self.c2.to_compressed());
        out.extend_from_slice(&self.c3.to_compressed());
        out
    }

    /// Decrypt with the transport secret and verify against `dpk` and `input`.
    ///
    /// # Errors
    ///
    /// - `InvalidCiphertext` if c1 and c2 do not share a discrete log
    /// - `InvalidSignature` if the unmasked point does not verify
    pub fn decrypt_and_verify(
        &self,
        tsk: &TransportSecretKey,
        dpk: &DerivedPublicKey,
        input: &[u8],
    ) -> Result<VetKey, CryptoError> {
        let c2_prep = G2Prepared::from(self.c2);
        let c1_c2 =
            gt_multipairing(&[(&self.c1, &G2PREPARED_NEG_G), (&G1Affine::generator(), &c2_prep)]);
        if !bool::from(c1_c2.is_identity()) {
            return Err(CryptoError::InvalidCiphertext);
        }

        let k = G1Affine::from(G1Projective::from(&self.c3) - self.c1 * *tsk.secret_key);

        if verify_bls_signature_pt(dpk, input, &k) {
            Ok(VetKey::new(k))
        } else {
            Err(CryptoError::InvalidSignature)
        }
    }
}

/// A verified VetKey: an augmented BLS signature over an input under a
/// derived public key.
///
/// In most uses this is a secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct VetKey {
    vetkey: Box<(G1Affine, [u8; G1_BYTES])>,
}

impl VetKey {
    /// Serialized size (compressed G1)
    pub const BYTES: usize = G1_BYTES;

    fn new(pt: G1Affine) -> Self {
        Self { vetkey: Box::new((pt, pt.to_compressed())) }
    }

    /// Parse raw VetKey bytes obtained out of band and verify them.
    ///
    /// Used when the bytes did not arrive through transport decryption, e.g.
    /// when a peer reshared them.
    ///
    /// # Errors
    ///
    /// - `MalformedInput` if the bytes are not a valid point
    /// - `InvalidVetKey` if the point is not a signature of `input` under `dpk`
    pub fn deserialize_and_verify(
        bytes: &[u8],
        dpk: &DerivedPublicKey,
        input: &[u8],
    ) -> Result<Self, CryptoError> {
        let pt = decode_g1(bytes, "vetkey")?;
        if verify_bls_signature_pt(dpk, input, &pt) {
            Ok(Self::new(pt))
        } else {
            Err(CryptoError::InvalidVetKey {
                reason: "not a signature under the derived public key".to_string(),
            })
        }
    }

    /// The 48-byte signature.
    ///
    /// Prefer [`Self::derive_symmetric_key`] or
    /// [`Self::as_derived_key_material`] when using VetKeys for encryption.
    pub fn signature_bytes(&self) -> &[u8; G1_BYTES] {
        &self.vetkey.1
    }

    pub(crate) fn point(&self) -> &G1Affine {
        &self.vetkey.0
    }

    /// HKDF-SHA256 a key of `len` bytes from the VetKey.
    pub fn derive_symmetric_key(
        &self,
        domain_sep: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        derive_symmetric_key(self.signature_bytes(), domain_sep, len)
    }

    /// Wrap the VetKey as non-extractable AEAD key material.
    pub fn as_derived_key_material(&self) -> DerivedKeyMaterial {
        DerivedKeyMaterial::from_raw_key(self.signature_bytes())
    }
}

impl fmt::Debug for VetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VetKey").finish_non_exhaustive()
    }
}

/// Verify an augmented BLS signature given as bytes.
///
/// Returns true iff `signature` is a valid 48-byte point and a signature of
/// `input` under `dpk`.
pub fn verify_bls_signature(dpk: &DerivedPublicKey, input: &[u8], signature: &[u8]) -> bool {
    match decode_g1(signature, "signature") {
        Ok(pt) => verify_bls_signature_pt(dpk, input, &pt),
        Err(_) => false,
    }
}

fn verify_bls_signature_pt(dpk: &DerivedPublicKey, input: &[u8], signature: &G1Affine) -> bool {
    if bool::from(dpk.point().is_identity()) {
        return false;
    }

    let msg = augmented_hash_to_g1(dpk.point(), input);
    let dpk_prep = G2Prepared::from(*dpk.point());

    // e(sig, -G2) * e(msg, dpk) == 1
    bool::from(gt_multipairing(&[(signature, &G2PREPARED_NEG_G), (&msg, &dpk_prep)]).is_identity())
}
