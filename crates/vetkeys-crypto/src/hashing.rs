//! Hash-to-scalar, hash-to-curve, HKDF and pairing helpers

use hkdf::Hkdf;
use ic_bls12_381::{
    G1Affine, G1Projective, G2Affine, G2Prepared, Gt, Scalar,
    hash_to_curve::{ExpandMsgXmd, HashToCurve, HashToField},
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    encoding::{G2_BYTES, length_prefixed},
    error::CryptoError,
};

/// DST for message-augmented BLS signatures over G1
const BLS_AUG_DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_AUG_";

/// Largest HKDF-SHA256 output (255 blocks of 32 bytes)
const MAX_HKDF_OUTPUT: usize = 255 * 32;

lazy_static::lazy_static! {
    pub(crate) static ref G2PREPARED_NEG_G: G2Prepared = (-G2Affine::generator()).into();
}

/// Hash arbitrary input to a scalar (`hash_to_field` with XMD:SHA-256).
pub fn hash_to_scalar(input: &[u8], domain_sep: &str) -> Scalar {
    let mut out = [Scalar::zero()];
    <Scalar as HashToField>::hash_to_field::<ExpandMsgXmd<Sha256>>(
        input,
        domain_sep.as_bytes(),
        &mut out,
    );
    out[0]
}

/// Hash two inputs to a scalar, length-prefixing each.
pub(crate) fn hash_to_scalar_two_inputs(input1: &[u8], input2: &[u8], domain_sep: &str) -> Scalar {
    hash_to_scalar(&length_prefixed(&[input1, input2]), domain_sep)
}

/// Derive a symmetric key with HKDF-SHA256 and an empty salt.
///
/// `domain_sep` is the HKDF info. Fails with `MalformedInput` if `len`
/// exceeds the HKDF-SHA256 output limit of 8160 bytes.
pub fn derive_symmetric_key(
    input: &[u8],
    domain_sep: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if len > MAX_HKDF_OUTPUT {
        return Err(CryptoError::malformed(
            "key length",
            format!("{len} exceeds HKDF limit of {MAX_HKDF_OUTPUT}"),
        ));
    }

    let hkdf = Hkdf::<Sha256>::new(None, input);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    let Ok(()) = hkdf.expand(domain_sep, &mut okm) else {
        unreachable!("length checked against HKDF-SHA256 limit");
    };
    Ok(okm)
}

/// HKDF-SHA256 with empty salt to exactly 32 bytes.
pub(crate) fn derive_key_32(input: &[u8], domain_sep: &[u8]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, input);
    let mut okm = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(domain_sep, okm.as_mut()) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    okm
}

/// Hash `pk || data` to G1 with the message-augmentation DST.
///
/// This is the message a VetKey signs: the derived public key is bound into
/// the hashed input.
pub fn augmented_hash_to_g1(pk: &G2Affine, data: &[u8]) -> G1Affine {
    let mut input = Vec::with_capacity(G2_BYTES + data.len());
    input.extend_from_slice(&pk.to_compressed());
    input.extend_from_slice(data);

    let pt = <G1Projective as HashToCurve<ExpandMsgXmd<Sha256>>>::hash_to_curve(input, BLS_AUG_DST);
    G1Affine::from(pt)
}

pub(crate) fn gt_multipairing(terms: &[(&G1Affine, &G2Prepared)]) -> Gt {
    ic_bls12_381::multi_miller_loop(terms).final_exponentiation()
}
