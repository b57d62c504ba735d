//! Canonical byte encodings and domain separation tags
//!
//! Every value that crosses a trust boundary has exactly one encoding:
//!
//! - Source-group points: 48-byte compressed form
//! - Target-adjacent (G2) points: 96-byte compressed form
//! - Integers: 8-byte big-endian
//! - Domain separator tags: 1-byte length prefix followed by ASCII
//! - Derivation inputs: each part prefixed by its 8-byte big-endian length

use ic_bls12_381::{G1Affine, G2Affine, Scalar};
use subtle::{ConstantTimeEq, CtOption};

use crate::error::CryptoError;

/// Size of a compressed G1 point
pub const G1_BYTES: usize = 48;

/// Size of a compressed G2 point
pub const G2_BYTES: usize = 96;

/// Size of a serialized scalar
pub const SCALAR_BYTES: usize = 32;

/// Encode a tag as `len (1 byte) || tag`.
///
/// Fails with `MalformedInput` if the tag is longer than 255 bytes.
pub fn size_prefixed_tag(tag: &str) -> Result<Vec<u8>, CryptoError> {
    let len = u8::try_from(tag.len()).map_err(|_| {
        CryptoError::malformed("domain separator", format!("{} bytes exceeds 255", tag.len()))
    })?;

    let mut out = Vec::with_capacity(1 + tag.len());
    out.push(len);
    out.extend_from_slice(tag.as_bytes());
    Ok(out)
}

/// [`size_prefixed_tag`] for compile-time tags.
pub(crate) fn static_tag(tag: &'static str) -> Vec<u8> {
    let Ok(bytes) = size_prefixed_tag(tag) else {
        unreachable!("static domain separators are shorter than 256 bytes");
    };
    bytes
}

/// Concatenate parts, each prefixed with its 8-byte big-endian length.
pub fn length_prefixed(parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| 8 + p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(&(part.len() as u64).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Read an 8-byte big-endian integer at `offset`.
pub(crate) fn read_u64_be(bytes: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(8)?;
    let chunk: [u8; 8] = bytes.get(offset..end)?.try_into().ok()?;
    Some(u64::from_be_bytes(chunk))
}

/// Constant-time byte equality. Slices of different length compare unequal.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

pub(crate) fn option_from_ctoption<T>(ctoption: CtOption<T>) -> Option<T> {
    Option::from(ctoption)
}

/// Decode a compressed G1 point, checking length, curve and subgroup.
pub(crate) fn decode_g1(bytes: &[u8], what: &'static str) -> Result<G1Affine, CryptoError> {
    let array: &[u8; G1_BYTES] = bytes.try_into().map_err(|_| {
        CryptoError::malformed(what, format!("expected {G1_BYTES} bytes, got {}", bytes.len()))
    })?;
    option_from_ctoption(G1Affine::from_compressed(array))
        .ok_or_else(|| CryptoError::malformed(what, "not a valid G1 point"))
}

/// Decode a compressed G2 point, checking length, curve and subgroup.
pub(crate) fn decode_g2(bytes: &[u8], what: &'static str) -> Result<G2Affine, CryptoError> {
    let array: &[u8; G2_BYTES] = bytes.try_into().map_err(|_| {
        CryptoError::malformed(what, format!("expected {G2_BYTES} bytes, got {}", bytes.len()))
    })?;
    option_from_ctoption(G2Affine::from_compressed(array))
        .ok_or_else(|| CryptoError::malformed(what, "not a valid G2 point"))
}

/// Decode a canonical little-endian scalar.
pub(crate) fn decode_scalar(bytes: &[u8], what: &'static str) -> Result<Scalar, CryptoError> {
    let array: &[u8; SCALAR_BYTES] = bytes.try_into().map_err(|_| {
        CryptoError::malformed(what, format!("expected {SCALAR_BYTES} bytes, got {}", bytes.len()))
    })?;
    option_from_ctoption(Scalar::from_bytes(array))
        .ok_or_else(|| CryptoError::malformed(what, "not a canonical scalar"))
}
