//! VetKeys client vocabulary
//!
//! Shared types for the key-state machine and its collaborators:
//!
//! - [`ids`]: channel, generation, identity and time identifiers
//! - [`context`]: derivation contexts shared with the issuance service
//! - [`env`]: time and randomness, swappable for simulation
//! - [`service`]: the external key-issuance service, sequencer and local cache

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod env;
pub mod error;
pub mod ids;
pub mod service;

pub use context::DerivationContexts;
pub use env::{EnvRng, Environment};
pub use error::ServiceError;
pub use ids::{ChannelId, EpochKeyId, GenerationId, Identity, Timestamp, duration_millis};
pub use service::{
    GenerationMetadata, KeyIssuance, LocalKeyCache, OutgoingMessage, SequencedMessage, Sequencer,
};
