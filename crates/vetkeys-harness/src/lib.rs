//! Deterministic simulation harness for VetKeys channel clients.
//!
//! In-process implementations of the collaborator traits, so the key-state
//! machine can be exercised end to end without a network:
//!
//! - [`SimKeyIssuance`]: an issuance service holding a master secret, with
//!   per-caller authorization ([`CallerIssuance`])
//! - [`SimSequencer`]: a message log that rejects stale epochs
//! - [`MemoryLocalCache`]: a shared in-memory local key cache
//! - [`ChaoticKeyIssuance`]: seeded fault injection around any issuance
//! - [`SimEnv`] / [`SystemEnv`]: seeded and production environments
//!
//! [`SimWorld`] wires them together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
pub mod issuance;
mod local_cache;
pub mod sequencer;
pub mod sim_env;
pub mod system_env;
pub mod world;

pub use chaotic::ChaoticKeyIssuance;
pub use issuance::{CallerIssuance, SIM_CANISTER_ID, SimKeyIssuance};
pub use local_cache::MemoryLocalCache;
pub use sequencer::SimSequencer;
pub use sim_env::{SIM_START, SimEnv};
pub use system_env::SystemEnv;
pub use world::{SimKeyStore, SimMessenger, SimWorld};
