//! VetKeys Cryptographic Primitives
//!
//! Client-side half of verifiably-encrypted key derivation (VetKD) over
//! BLS12-381, plus the epoch-key ratchet built on it. Pure, synchronous
//! functions. Callers provide randomness for deterministic testing.
//!
//! # Key Lifecycle
//!
//! ```text
//! Master Public Key
//!        │  derive_canister_key / derive_sub_key
//!        ▼
//! Derived Public Key ◀──────────── verifies ───────────┐
//!        │                                              │
//!        │  issuance service, transport-encrypted       │
//!        ▼                                              │
//! EncryptedVetKey ──decrypt_and_verify(tsk)──▶ VetKey ──┘
//!                                               │
//!                      ┌────────────────────────┼─────────────────────┐
//!                      ▼                        ▼                     ▼
//!               IBE decryption         HKDF → AES-256-GCM     HKDF → ratchet root
//!                                                                     │
//!                                                     step per epoch  ▼
//!                                                              Epoch keys → AEAD
//! ```
//!
//! # Security
//!
//! Verification:
//! - A [`VetKey`] only exists after passing the ciphertext consistency check
//!   and BLS signature verification (or out-of-band verification)
//! - Failures are [`CryptoError::is_security_failure`]; never fall back
//!
//! Forward Secrecy:
//! - Ratchet steps are one-way; the previous epoch key is zeroized
//! - Peeking at a future epoch clones, never commits
//!
//! Authenticity:
//! - AES-256-GCM rejects any modified blob
//! - IBE ciphertexts carry no sender authentication; callers that need it
//!   must add it above this layer

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derivation;
pub mod encoding;
pub mod error;
pub mod hashing;
pub mod ibe;
pub mod key_material;
pub mod ratchet;
pub mod transport;

pub use derivation::{DerivedPublicKey, MasterPublicKey};
pub use encoding::{length_prefixed, size_prefixed_tag};
pub use error::CryptoError;
pub use hashing::{augmented_hash_to_g1, derive_symmetric_key, hash_to_scalar};
pub use ibe::{IbeCiphertext, IbeIdentity, IbeSeed};
pub use key_material::{AeadKey, DerivedKeyMaterial};
pub use ratchet::{
    CACHE_BYTES, EpochCiphertext, EpochSchedule, MAX_EPOCH_SKIP, RatchetState, derive_root_key,
    message_domain_separator,
};
pub use transport::{
    EncryptedVetKey, TransportSecretKey, VetKey, is_valid_transport_public_key,
    verify_bls_signature,
};
