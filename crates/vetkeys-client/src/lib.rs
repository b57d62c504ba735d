//! VetKeys channel client
//!
//! Per-channel epoch keys on top of the VetKD primitives of
//! `vetkeys-crypto`:
//!
//! - [`KeyStore`]: the epoch-key table and its four-stage resolution
//!   pipeline (local cache, remote cache, peer resharing, fresh fetch)
//! - [`Messenger`]: send and receive paths under epoch skew
//! - [`BackgroundLog`]: failures of fire-and-forget cache writes and
//!   resharing
//!
//! # Architecture
//!
//! ```text
//!  Messenger ──send/decrypt──▶ KeyStore ──resolve──▶ LocalKeyCache
//!      │                          │      ──────────▶ KeyIssuance
//!      ▼                          ▼
//!  Sequencer ──timestamps──▶ consensus clock ──▶ evolve + GC
//! ```
//!
//! All I/O goes through the collaborator traits of `vetkeys-core`; time
//! and randomness through its `Environment`. Simulated implementations live
//! in `vetkeys-harness`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod background;
pub mod config;
pub mod error;
pub mod key_store;
pub mod messaging;

pub use background::{BackgroundFailure, BackgroundLog, BackgroundTask};
pub use config::ClientConfig;
pub use error::KeyError;
pub use key_store::{KeyStatus, KeyStore};
pub use messaging::{DECRYPTION_FAILED_PLACEHOLDER, Messenger, ReceivedMessage, SentMessage};
