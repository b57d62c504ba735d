//! Errors of the key-state machine and messaging paths.

use std::time::Duration;

use thiserror::Error;
use vetkeys_core::{ChannelId, EpochKeyId, ServiceError};
use vetkeys_crypto::CryptoError;

/// Errors surfaced to callers of [`crate::KeyStore`] and [`crate::Messenger`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Every resolution stage failed
    #[error("key {key_id} unavailable after {attempts} resolution stages")]
    KeyUnavailable {
        /// Key that could not be resolved
        key_id: EpochKeyId,
        /// Number of stages tried
        attempts: usize,
    },

    /// Waiting for a resolution exceeded the configured bound
    #[error("key {key_id} not resolved within {waited:?}")]
    KeyResolutionTimeout {
        /// Key being resolved
        key_id: EpochKeyId,
        /// How long we waited
        waited: Duration,
    },

    /// The requested epoch precedes the retained ratchet state
    #[error("key {key_id} too old: epoch {requested} is behind retained epoch {current}")]
    KeyTooOld {
        /// Key whose ratchet was consulted
        key_id: EpochKeyId,
        /// Epoch the message declared
        requested: u64,
        /// Oldest epoch still derivable
        current: u64,
    },

    /// The key's generation was superseded and dropped after its recovery
    /// window
    #[error("key {key_id} retired")]
    KeyRetired {
        /// Key that was dropped
        key_id: EpochKeyId,
    },

    /// The channel does not exist or the caller is not a participant
    #[error("unknown channel {channel}")]
    UnknownChannel {
        /// The channel that was looked up
        channel: ChannelId,
    },

    /// A state was inducted for a key that is already present
    #[error("key {key_id} already present")]
    AlreadyPresent {
        /// Key that was inducted twice
        key_id: EpochKeyId,
    },

    /// Sending kept hitting stale epochs until the retry limit
    #[error("send failed after {attempts} attempts: {last}")]
    SendFailed {
        /// Number of attempts made
        attempts: u32,
        /// Error of the final submission
        last: ServiceError,
    },

    /// Cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Collaborator failure
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl KeyError {
    /// Returns true if this error may succeed on retry.
    ///
    /// Resolution failures and outages depend on remote state that changes
    /// over time (a peer reshares, the service comes back).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KeyUnavailable { .. }
            | Self::KeyResolutionTimeout { .. }
            | Self::SendFailed { .. } => true,
            Self::Service(err) => err.is_transient(),
            Self::KeyTooOld { .. }
            | Self::KeyRetired { .. }
            | Self::UnknownChannel { .. }
            | Self::AlreadyPresent { .. }
            | Self::Crypto(_) => false,
        }
    }

    /// Returns true if retrying can never succeed for this input.
    ///
    /// A message whose epoch is too old, or whose generation was retired,
    /// stays undecryptable. Key material that failed verification must not
    /// be used.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::KeyTooOld { .. } | Self::KeyRetired { .. } => true,
            Self::Crypto(err) => err.is_security_failure() || err.is_fatal(),
            _ => false,
        }
    }
}
