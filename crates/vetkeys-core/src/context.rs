//! Derivation contexts.
//!
//! A context selects which derived public key (and therefore which VetKeys)
//! the issuance service uses. Clients derive every context key offline from
//! the canister key, so both sides must build the bytes identically:
//!
//! ```text
//! channel   = channel_prefix   || u64_be(len) || channel bytes || u64_be(generation)
//! resharing = resharing_prefix || u64_be(len) || identity
//! cache     = cache_prefix
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GenerationId, Identity};

/// Context prefixes for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationContexts {
    /// Prefix of per-(channel, generation) contexts
    pub channel_prefix: Vec<u8>,
    /// Prefix of per-participant resharing contexts
    pub resharing_prefix: Vec<u8>,
    /// The encrypted key cache context
    pub cache_prefix: Vec<u8>,
}

impl Default for DerivationContexts {
    fn default() -> Self {
        Self {
            channel_prefix: b"ic-vetkeys-chat-example-channel".to_vec(),
            resharing_prefix: b"ic-vetkeys-chat-example-resharing".to_vec(),
            cache_prefix: b"ic-vetkeys-chat-example-cache".to_vec(),
        }
    }
}

impl DerivationContexts {
    /// Context of the root key for `generation` of `channel`.
    pub fn channel(&self, channel: &ChannelId, generation: GenerationId) -> Vec<u8> {
        let channel_bytes = channel.to_bytes();
        let mut out = Vec::with_capacity(self.channel_prefix.len() + 16 + channel_bytes.len());
        out.extend_from_slice(&self.channel_prefix);
        out.extend_from_slice(&(channel_bytes.len() as u64).to_be_bytes());
        out.extend_from_slice(&channel_bytes);
        out.extend_from_slice(&generation.0.to_be_bytes());
        out
    }

    /// Context under which peers reshare root keys to `participant`.
    pub fn resharing(&self, participant: &Identity) -> Vec<u8> {
        let id = participant.as_bytes();
        let mut out = Vec::with_capacity(self.resharing_prefix.len() + 8 + id.len());
        out.extend_from_slice(&self.resharing_prefix);
        out.extend_from_slice(&(id.len() as u64).to_be_bytes());
        out.extend_from_slice(id);
        out
    }

    /// Context of the encrypted key cache. The caller identity is the input.
    pub fn cache(&self) -> Vec<u8> {
        self.cache_prefix.clone()
    }
}
