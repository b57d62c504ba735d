//! Errors reported by external collaborators.

use thiserror::Error;

use crate::ids::GenerationId;

/// Errors returned by the key-issuance service, the sequencer and the local
/// key cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The requested item does not exist
    #[error("not found")]
    NotFound,

    /// A message was submitted for an epoch the sequencer no longer (or not
    /// yet) accepts
    #[error("stale epoch: sequencer expects generation {generation} epoch {expected}")]
    StaleEpoch {
        /// Generation the sequencer currently accepts
        generation: GenerationId,
        /// Epoch the sequencer currently accepts
        expected: u64,
    },

    /// The caller is not authorized or the request is invalid
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or failed internally
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A stored or transmitted value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ServiceError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Stale epochs are retried after refreshing metadata; outages after a
    /// delay. Rejections and decoding failures never go away on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StaleEpoch { .. } | Self::Unavailable(_))
    }
}
