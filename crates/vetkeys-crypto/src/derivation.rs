//! Public key derivation
//!
//! A derived public key is obtained in two offset-addition steps:
//!
//! ```text
//! MasterPublicKey
//!        │  + G2 * H(len(master) || master || len(canister) || canister, DST_CANISTER)
//!        ▼
//! canister key (DerivedPublicKey)
//!        │  + G2 * H(len(parent) || parent || len(context) || context, DST_CONTEXT)
//!        ▼
//! context key (DerivedPublicKey)
//! ```
//!
//! Both steps are pure. The issuer holding the master secret applies the same
//! offsets to its secret scalar, so the offsets are exposed for it.

use ic_bls12_381::{G2Affine, Scalar};

use crate::{
    encoding::{G2_BYTES, decode_g2},
    error::CryptoError,
    hashing::hash_to_scalar_two_inputs,
};

/// DST for the canister derivation step
const DST_CANISTER: &str = "ic-vetkd-bls12-381-g2-canister-id";

/// DST for the context derivation step
const DST_CONTEXT: &str = "ic-vetkd-bls12-381-g2-context";

/// A master VetKD public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterPublicKey {
    point: G2Affine,
}

impl MasterPublicKey {
    /// Serialized size (compressed G2)
    pub const BYTES: usize = G2_BYTES;

    /// Wrap a G2 point.
    pub fn from_point(point: G2Affine) -> Self {
        Self { point }
    }

    /// Deserialize a compressed 96-byte master key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { point: decode_g2(bytes, "master public key")? })
    }

    /// Compressed encoding.
    pub fn serialize(&self) -> [u8; G2_BYTES] {
        self.point.to_compressed()
    }

    /// Scalar added (times the generator) by [`Self::derive_canister_key`].
    pub fn canister_offset(&self, canister_id: &[u8]) -> Scalar {
        hash_to_scalar_two_inputs(&self.serialize(), canister_id, DST_CANISTER)
    }

    /// First derivation step: the per-canister key.
    pub fn derive_canister_key(&self, canister_id: &[u8]) -> DerivedPublicKey {
        let offset = self.canister_offset(canister_id);
        DerivedPublicKey { point: G2Affine::from(self.point + G2Affine::generator() * offset) }
    }
}

/// A public key derived from a master key for a canister and context.
///
/// Root of trust for both VetKey delivery and IBE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedPublicKey {
    point: G2Affine,
}

impl DerivedPublicKey {
    /// Serialized size (compressed G2)
    pub const BYTES: usize = G2_BYTES;

    /// Wrap a G2 point.
    pub fn from_point(point: G2Affine) -> Self {
        Self { point }
    }

    /// Deserialize a compressed 96-byte derived key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { point: decode_g2(bytes, "derived public key")? })
    }

    /// Compressed encoding.
    pub fn serialize(&self) -> [u8; G2_BYTES] {
        self.point.to_compressed()
    }

    /// Underlying curve point.
    pub fn point(&self) -> &G2Affine {
        &self.point
    }

    /// Scalar added (times the generator) by [`Self::derive_sub_key`].
    ///
    /// Zero for an empty context.
    pub fn context_offset(&self, context: &[u8]) -> Scalar {
        if context.is_empty() {
            return Scalar::zero();
        }
        hash_to_scalar_two_inputs(&self.serialize(), context, DST_CONTEXT)
    }

    /// Second derivation step: the key for `context`.
    ///
    /// An empty context returns the parent unchanged, so the service's
    /// canister key can be fetched once and every context derived offline.
    pub fn derive_sub_key(&self, context: &[u8]) -> Self {
        if context.is_empty() {
            return self.clone();
        }

        let offset = self.context_offset(context);
        Self { point: G2Affine::from(self.point + G2Affine::generator() * offset) }
    }
}

impl From<DerivedPublicKey> for G2Affine {
    fn from(key: DerivedPublicKey) -> Self {
        key.point
    }
}
