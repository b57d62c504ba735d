//! Epoch-key ratchet
//!
//! Each channel generation has a root key derived from its VetKey. Epoch keys
//! follow by a one-way step:
//!
//! ```text
//! root   = HKDF(vetkey, INIT)
//! key[0] = root
//! key[n+1] = HKDF(key[n], STEP || u64_be(n))
//! ```
//!
//! The epoch in force at time `t` is `floor((t - creation) / rotation)`, so all
//! participants with the same clock land on the same key without exchanging
//! messages.
//!
//! # Security Properties
//!
//! - Forward secrecy: a state at epoch `n` cannot derive any key before `n`
//! - Determinism: the same root and epoch always give the same key
//! - Peeking never mutates the committed state

use std::fmt;

use lazy_static::lazy_static;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    encoding::{read_u64_be, static_tag},
    error::CryptoError,
    hashing::derive_key_32,
    key_material::DerivedKeyMaterial,
    transport::VetKey,
};

/// Maximum number of epochs a single call may advance.
///
/// Bounds the work done when schedule metadata or a declared epoch is bogus.
pub const MAX_EPOCH_SKIP: u64 = 1_000_000;

/// Size of an epoch key
pub const EPOCH_KEY_BYTES: usize = 32;

/// Size of [`RatchetState::to_cache_bytes`] output
pub const CACHE_BYTES: usize = EPOCH_KEY_BYTES + 4 * 8;

lazy_static! {
    static ref DOMAIN_RATCHET_INIT: Vec<u8> = static_tag("ic-vetkeys-chat-example-ratchet-init");
    static ref DOMAIN_RATCHET_STEP: Vec<u8> = static_tag("ic-vetkeys-chat-example-ratchet-step");
    static ref DOMAIN_MESSAGE_ENCRYPTION: Vec<u8> =
        static_tag("ic-vetkeys-chat-example-message-encryption");
}

/// Timing parameters of one generation, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpochSchedule {
    /// Start of epoch 0 (ms since Unix epoch)
    pub creation_time_ms: u64,
    /// Length of one epoch
    pub rotation_ms: u64,
    /// How long past epochs stay decryptable
    pub recovery_ms: u64,
}

impl EpochSchedule {
    /// Create a schedule.
    ///
    /// # Errors
    ///
    /// - `MalformedInput` if `rotation_ms` is zero
    pub fn new(
        creation_time_ms: u64,
        rotation_ms: u64,
        recovery_ms: u64,
    ) -> Result<Self, CryptoError> {
        if rotation_ms == 0 {
            return Err(CryptoError::malformed("epoch schedule", "rotation interval is zero"));
        }
        Ok(Self { creation_time_ms, rotation_ms, recovery_ms })
    }

    /// Epoch in force at `time_ms`.
    ///
    /// # Errors
    ///
    /// - `InvalidTime` if `time_ms` precedes the creation time
    pub fn expected_epoch_at(&self, time_ms: u64) -> Result<u64, CryptoError> {
        let elapsed = time_ms.checked_sub(self.creation_time_ms).ok_or(CryptoError::InvalidTime {
            time_ms,
            creation_time_ms: self.creation_time_ms,
        })?;
        Ok(elapsed / self.rotation_ms)
    }

    /// Start of `epoch`, or `None` if it lies beyond the representable range.
    pub fn epoch_start_ms(&self, epoch: u64) -> Option<u64> {
        epoch.checked_mul(self.rotation_ms)?.checked_add(self.creation_time_ms)
    }
}

/// Derive the 32-byte root key of a generation from its VetKey bytes.
pub fn derive_root_key(vetkey_bytes: &[u8]) -> Zeroizing<[u8; EPOCH_KEY_BYTES]> {
    derive_key_32(vetkey_bytes, &DOMAIN_RATCHET_INIT)
}

/// Domain separator binding a message to its sender and sender-local id.
///
/// `MESSAGE_ENCRYPTION || sender || u64_be(message_id)`
pub fn message_domain_separator(sender: &[u8], message_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOMAIN_MESSAGE_ENCRYPTION.len() + sender.len() + 8);
    out.extend_from_slice(&DOMAIN_MESSAGE_ENCRYPTION);
    out.extend_from_slice(sender);
    out.extend_from_slice(&message_id.to_be_bytes());
    out
}

/// A message encrypted under an epoch key, with the epoch it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochCiphertext {
    /// Epoch whose key encrypted the message
    pub epoch: u64,
    /// `nonce || ciphertext || tag`
    pub ciphertext: Vec<u8>,
}

/// Ratchet position of one channel generation.
///
/// Holds only the current epoch key. Moving forward overwrites it; there is
/// no way back.
#[derive(Clone)]
pub struct RatchetState {
    key: Zeroizing<[u8; EPOCH_KEY_BYTES]>,
    epoch: u64,
    schedule: EpochSchedule,
}

impl RatchetState {
    /// Initial state (epoch 0) for the generation keyed by `vetkey`.
    pub fn from_vetkey(vetkey: &VetKey, schedule: EpochSchedule) -> Self {
        Self { key: derive_root_key(vetkey.signature_bytes()), epoch: 0, schedule }
    }

    /// Initial state (epoch 0) from an already derived root key.
    pub fn from_root_key(root_key: [u8; EPOCH_KEY_BYTES], schedule: EpochSchedule) -> Self {
        Self { key: Zeroizing::new(root_key), epoch: 0, schedule }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Timing parameters.
    pub fn schedule(&self) -> &EpochSchedule {
        &self.schedule
    }

    /// Replace the recovery window.
    ///
    /// Does not move the ratchet; a wider window only helps states that have
    /// not yet evolved past the epochs it would cover.
    pub fn set_recovery_window(&mut self, recovery_ms: u64) {
        self.schedule.recovery_ms = recovery_ms;
    }

    /// Epoch in force at `time_ms` under this state's schedule.
    ///
    /// # Errors
    ///
    /// - `InvalidTime` if `time_ms` precedes the creation time
    pub fn expected_epoch_at(&self, time_ms: u64) -> Result<u64, CryptoError> {
        self.schedule.expected_epoch_at(time_ms)
    }

    /// Advance exactly one epoch, overwriting the current key.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the epoch counter would overflow
    pub fn evolve(&mut self) -> Result<(), CryptoError> {
        let next = self
            .epoch
            .checked_add(1)
            .ok_or(CryptoError::InvalidTransition { current: self.epoch, requested: u64::MAX })?;

        let mut info = Vec::with_capacity(DOMAIN_RATCHET_STEP.len() + 8);
        info.extend_from_slice(&DOMAIN_RATCHET_STEP);
        info.extend_from_slice(&self.epoch.to_be_bytes());

        // Assigning drops (and zeroizes) the previous key
        self.key = derive_key_32(&self.key[..], &info);
        self.epoch = next;
        Ok(())
    }

    /// Advance to `target`. No-op if already there.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if `target` is behind the current epoch or more
    ///   than [`MAX_EPOCH_SKIP`] ahead. The state is unchanged.
    pub fn evolve_to(&mut self, target: u64) -> Result<(), CryptoError> {
        let invalid = CryptoError::InvalidTransition { current: self.epoch, requested: target };
        let skip = target.checked_sub(self.epoch).ok_or_else(|| invalid.clone())?;
        if skip > MAX_EPOCH_SKIP {
            return Err(invalid);
        }

        while self.epoch < target {
            self.evolve()?;
        }
        Ok(())
    }

    /// State at `target`, leaving `self` untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Self::evolve_to`].
    pub fn peek_at_epoch(&self, target: u64) -> Result<Self, CryptoError> {
        let mut peeked = self.clone();
        peeked.evolve_to(target)?;
        Ok(peeked)
    }

    /// Advance to the epoch in force at `reference_ms`.
    ///
    /// Never moves backwards. A reference time before creation is a no-op.
    /// Returns the number of epochs advanced.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if catching up would exceed [`MAX_EPOCH_SKIP`]
    pub fn evolve_if_needed(&mut self, reference_ms: u64) -> Result<u64, CryptoError> {
        if reference_ms < self.schedule.creation_time_ms {
            return Ok(0);
        }

        let expected = self.expected_epoch_at(reference_ms)?;
        if expected <= self.epoch {
            return Ok(0);
        }

        let before = self.epoch;
        self.evolve_to(expected)?;
        Ok(self.epoch - before)
    }

    /// AEAD key material of the current epoch.
    pub fn key_material(&self) -> DerivedKeyMaterial {
        DerivedKeyMaterial::from_raw_key(&self.key[..])
    }

    /// Encrypt a message under the key of `epoch`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::peek_at_epoch`].
    pub fn encrypt_at_epoch<R: RngCore + CryptoRng>(
        &self,
        epoch: u64,
        sender: &[u8],
        message_id: u64,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>, CryptoError> {
        let state = self.peek_at_epoch(epoch)?;
        let domain_sep = message_domain_separator(sender, message_id);
        Ok(state.key_material().encrypt(plaintext, &domain_sep, rng))
    }

    /// Decrypt a message encrypted under the key of `epoch`.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if `epoch` is behind this state
    /// - `DecryptionFailed` on any authentication failure
    pub fn decrypt_at_epoch(
        &self,
        epoch: u64,
        sender: &[u8],
        message_id: u64,
        blob: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let state = self.peek_at_epoch(epoch)?;
        let domain_sep = message_domain_separator(sender, message_id);
        state.key_material().decrypt(blob, &domain_sep)
    }

    /// Encrypt under the epoch in force at `time_ms`.
    ///
    /// # Errors
    ///
    /// - `InvalidTime` if `time_ms` precedes the creation time
    /// - `InvalidTransition` if that epoch is behind this state
    pub fn encrypt_at_time<R: RngCore + CryptoRng>(
        &self,
        time_ms: u64,
        sender: &[u8],
        message_id: u64,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<EpochCiphertext, CryptoError> {
        let epoch = self.expected_epoch_at(time_ms)?;
        let ciphertext = self.encrypt_at_epoch(epoch, sender, message_id, plaintext, rng)?;
        Ok(EpochCiphertext { epoch, ciphertext })
    }

    /// Decrypt a message sent at `time_ms`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::encrypt_at_time`], plus `DecryptionFailed`.
    pub fn decrypt_at_time(
        &self,
        time_ms: u64,
        sender: &[u8],
        message_id: u64,
        blob: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let epoch = self.expected_epoch_at(time_ms)?;
        self.decrypt_at_epoch(epoch, sender, message_id, blob)
    }

    /// Cacheable form:
    /// `key (32) || epoch || creation ms || rotation ms || recovery ms`,
    /// integers 8-byte big-endian.
    pub fn to_cache_bytes(&self) -> Zeroizing<[u8; CACHE_BYTES]> {
        let mut out = Zeroizing::new([0u8; CACHE_BYTES]);
        out[..EPOCH_KEY_BYTES].copy_from_slice(&self.key[..]);
        let fields = [
            self.epoch,
            self.schedule.creation_time_ms,
            self.schedule.rotation_ms,
            self.schedule.recovery_ms,
        ];
        for (i, field) in fields.iter().enumerate() {
            let start = EPOCH_KEY_BYTES + i * 8;
            out[start..start + 8].copy_from_slice(&field.to_be_bytes());
        }
        out
    }

    /// Parse the output of [`Self::to_cache_bytes`].
    ///
    /// # Errors
    ///
    /// - `MalformedInput` if the length is not [`CACHE_BYTES`] or the rotation
    ///   interval is zero
    pub fn from_cache_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != CACHE_BYTES {
            return Err(CryptoError::malformed(
                "cached ratchet state",
                format!("expected {CACHE_BYTES} bytes, got {}", bytes.len()),
            ));
        }

        let mut key = Zeroizing::new([0u8; EPOCH_KEY_BYTES]);
        key.copy_from_slice(&bytes[..EPOCH_KEY_BYTES]);

        let field = |i: usize| {
            read_u64_be(bytes, EPOCH_KEY_BYTES + i * 8)
                .ok_or_else(|| CryptoError::malformed("cached ratchet state", "truncated"))
        };
        let epoch = field(0)?;
        let schedule = EpochSchedule::new(field(1)?, field(2)?, field(3)?)?;

        Ok(Self { key, epoch, schedule })
    }
}

impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("epoch", &self.epoch)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}
