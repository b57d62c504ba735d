//! Error types for VetKD and ratchet operations

use thiserror::Error;

/// Errors from the cryptographic core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Wrong-length input or bytes that are not a valid curve point
    #[error("malformed {what}: {reason}")]
    MalformedInput {
        /// What was being parsed
        what: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The two commitment elements of an encrypted key do not share a
    /// discrete logarithm
    #[error("invalid encrypted key: c1 inconsistent with c2")]
    InvalidCiphertext,

    /// The unmasked key is not a valid signature under the derived public key
    #[error("invalid encrypted key: signature verification failed")]
    InvalidSignature,

    /// Raw key bytes obtained out of band failed verification
    #[error("invalid vetkey: {reason}")]
    InvalidVetKey {
        /// Why verification failed
        reason: String,
    },

    /// AEAD tag mismatch or IBE consistency check failure
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Ratchet asked to move behind its current epoch, or too far ahead
    #[error("invalid ratchet transition: at epoch {current}, requested {requested}")]
    InvalidTransition {
        /// Current ratchet epoch
        current: u64,
        /// Requested epoch
        requested: u64,
    },

    /// Time precedes the creation of the ratchet state
    #[error("invalid time: {time_ms}ms is before creation at {creation_time_ms}ms")]
    InvalidTime {
        /// Requested time (ms since Unix epoch)
        time_ms: u64,
        /// Creation time of the state (ms since Unix epoch)
        creation_time_ms: u64,
    },
}

impl CryptoError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedInput { what, reason: reason.into() }
    }

    /// Returns true if this error means key material failed verification.
    ///
    /// Security failures must never be retried with the same bytes and the
    /// candidate key must never be used.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCiphertext | Self::InvalidSignature | Self::InvalidVetKey { .. }
        )
    }

    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors indicate tampering or a sequencing bug. Input
    /// errors are the caller's to reject.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidCiphertext
            | Self::InvalidSignature
            | Self::InvalidVetKey { .. }
            | Self::InvalidTransition { .. } => true,

            Self::MalformedInput { .. }
            | Self::DecryptionFailed { .. }
            | Self::InvalidTime { .. } => false,
        }
    }
}
