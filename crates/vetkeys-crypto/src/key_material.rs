//! Symmetric key material wrapper
//!
//! Holds raw key bytes (a VetKey or a ratchet epoch key) without exposing
//! them. Every AEAD key is derived on demand:
//!
//! ```text
//! raw key ──HKDF-SHA256(salt = ∅, info = domain separator)──▶ AES-256-GCM key
//! ```
//!
//! Ciphertext blobs are `nonce (12) || ciphertext || tag (16)`.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{error::CryptoError, hashing::derive_key_32};

/// AES-GCM nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Non-extractable symmetric key material.
#[derive(Clone)]
pub struct DerivedKeyMaterial {
    ikm: Zeroizing<Vec<u8>>,
}

impl DerivedKeyMaterial {
    /// Import raw key bytes (the 48 VetKey bytes or a 32-byte epoch key).
    pub fn from_raw_key(bytes: &[u8]) -> Self {
        Self { ikm: Zeroizing::new(bytes.to_vec()) }
    }

    /// Derive the AES-256-GCM key for `domain_sep`.
    pub fn derive_aead_key(&self, domain_sep: &[u8]) -> AeadKey {
        let key = derive_key_32(&self.ikm, domain_sep);
        AeadKey { cipher: Aes256Gcm::new((&*key).into()) }
    }

    /// Encrypt under the key for `domain_sep` with a fresh random nonce.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[u8],
        domain_sep: &[u8],
        rng: &mut R,
    ) -> Vec<u8> {
        self.derive_aead_key(domain_sep).encrypt(plaintext, rng)
    }

    /// Decrypt a blob produced by [`Self::encrypt`] with the same separator.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed` if the blob is shorter than nonce + tag, or the tag
    ///   does not verify (wrong key, corrupted data, wrong separator)
    pub fn decrypt(&self, blob: &[u8], domain_sep: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.derive_aead_key(domain_sep).decrypt(blob)
    }
}

impl fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeyMaterial").finish_non_exhaustive()
    }
}

/// An AES-256-GCM key bound to one domain separator.
pub struct AeadKey {
    cipher: Aes256Gcm,
}

impl AeadKey {
    /// Encrypt with a nonce sampled from `rng`.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, plaintext: &[u8], rng: &mut R) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, nonce)
    }

    /// Encrypt with a caller-provided nonce.
    ///
    /// The nonce MUST NOT repeat for this key.
    pub fn encrypt_with_nonce(&self, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
        let Ok(ciphertext) = self.cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
            unreachable!("AES-GCM encryption cannot fail for in-memory plaintexts");
        };

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        blob
    }

    /// Decrypt a `nonce || ciphertext || tag` blob.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed {
                reason: format!(
                    "ciphertext of {} bytes is shorter than nonce and tag",
                    blob.len()
                ),
            });
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
            CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
        })
    }
}

impl fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn material() -> DerivedKeyMaterial {
        DerivedKeyMaterial::from_raw_key(&[7u8; 48])
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(1)
    }

    #[test]
    fn roundtrip() {
        let blob = material().encrypt(b"secret", b"test", &mut rng());
        assert_eq!(material().decrypt(&blob, b"test").unwrap(), b"secret");
    }

    #[test]
    fn blob_layout() {
        let blob = material().encrypt(b"secret", b"test", &mut rng());
        assert_eq!(blob.len(), NONCE_SIZE + 6 + TAG_SIZE);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let blob = material().encrypt(b"", b"test", &mut rng());
        assert_eq!(blob.len(), NONCE_SIZE + TAG_SIZE);
        assert!(material().decrypt(&blob, b"test").unwrap().is_empty());
    }

    #[test]
    fn fresh_nonce_per_call() {
        let mut rng = rng();
        let a = material().encrypt(b"secret", b"test", &mut rng);
        let b = material().encrypt(b"secret", b"test", &mut rng);
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_domain_separator_fails() {
        let blob = material().encrypt(b"secret", b"test", &mut rng());
        assert!(matches!(
            material().decrypt(&blob, b"other"),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let blob = material().encrypt(b"secret", b"test", &mut rng());
        let other = DerivedKeyMaterial::from_raw_key(&[8u8; 48]);
        assert!(other.decrypt(&blob, b"test").is_err());
    }

    #[test]
    fn short_blob_fails() {
        let err = material().decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1], b"test").unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed { .. }));
    }

    #[test]
    fn every_bit_flip_detected() {
        let blob = material().encrypt(b"secret message", b"test", &mut rng());
        for i in 0..blob.len() * 8 {
            let mut tampered = blob.clone();
            tampered[i / 8] ^= 1 << (i % 8);
            assert!(material().decrypt(&tampered, b"test").is_err(), "bit {i} flip undetected");
        }
    }

    #[test]
    fn explicit_nonce_is_deterministic() {
        let key = material().derive_aead_key(b"test");
        let a = key.encrypt_with_nonce(b"msg", [1u8; NONCE_SIZE]);
        let b = key.encrypt_with_nonce(b"msg", [1u8; NONCE_SIZE]);
        assert_eq!(a, b);
        assert_eq!(key.decrypt(&a).unwrap(), b"msg");
    }
}
