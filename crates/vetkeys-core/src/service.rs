//! Collaborator traits.
//!
//! The key-issuance service, the message sequencer and the local key cache
//! are external. Clients reach them only through these traits. Each service
//! handle is bound to one authenticated caller; authorization happens on the
//! other side.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    ids::{ChannelId, EpochKeyId, GenerationId, Identity, Timestamp},
};

/// Participants and timing of one channel generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Generation this metadata describes
    pub generation: GenerationId,
    /// Members allowed to obtain this generation's root key
    pub participants: Vec<Identity>,
    /// Start of epoch 0
    pub creation_time: Timestamp,
    /// Length of one ratchet epoch
    pub rotation: Duration,
}

/// A message ready for sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Generation whose ratchet encrypted the message
    pub generation: GenerationId,
    /// Ratchet epoch used for encryption
    pub epoch: u64,
    /// Sender identity
    pub sender: Identity,
    /// Sender-local message counter, bound into the domain separator
    pub message_id: u64,
    /// `nonce || ciphertext || tag`
    pub ciphertext: Vec<u8>,
}

/// A message accepted by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedMessage {
    /// Position in the channel log
    pub index: u64,
    /// Sequencer clock at acceptance
    pub timestamp: Timestamp,
    /// The submitted message
    pub message: OutgoingMessage,
}

/// The remote key-issuance service.
///
/// Issues transport-encrypted VetKeys and stores encrypted caches and
/// reshared root keys.
pub trait KeyIssuance: Clone + Send + Sync + 'static {
    /// Public key for `context`; an empty context yields the canister key.
    ///
    /// Returns a 96-byte compressed G2 point.
    fn public_key(
        &self,
        context: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;

    /// VetKey for `(context, input)`, encrypted to `transport_public_key`.
    ///
    /// Returns a 192-byte encrypted key.
    fn encrypted_vetkey(
        &self,
        transport_public_key: &[u8],
        context: &[u8],
        input: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;

    /// The caller's encrypted ratchet cache for a generation.
    ///
    /// `NotFound` if nothing was stored.
    fn encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;

    /// Store the caller's encrypted ratchet cache for a generation.
    fn put_encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        blob: Vec<u8>,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// The root key a peer reshared to the caller, IBE-encrypted.
    ///
    /// `NotFound` if no peer has reshared yet.
    fn reshared_ibe_ciphertext(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> impl Future<Output = Result<Vec<u8>, ServiceError>> + Send;

    /// Store IBE-encrypted root keys for other participants.
    fn put_reshared_ibe_ciphertexts(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        ciphertexts: Vec<(Identity, Vec<u8>)>,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Metadata of one generation.
    fn generation_metadata(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> impl Future<Output = Result<GenerationMetadata, ServiceError>> + Send;

    /// Metadata of the channel's current generation.
    fn latest_generation(
        &self,
        channel: &ChannelId,
    ) -> impl Future<Output = Result<GenerationMetadata, ServiceError>> + Send;
}

/// The remote message log.
pub trait Sequencer: Clone + Send + Sync + 'static {
    /// Append a message; returns its sequencing timestamp.
    ///
    /// Fails with `StaleEpoch` if the message's generation or epoch is not
    /// the one in force at the sequencer's clock.
    fn submit(
        &self,
        channel: &ChannelId,
        message: OutgoingMessage,
    ) -> impl Future<Output = Result<Timestamp, ServiceError>> + Send;

    /// Messages with index `>= from`, in log order.
    fn messages(
        &self,
        channel: &ChannelId,
        from: u64,
    ) -> impl Future<Output = Result<Vec<SequencedMessage>, ServiceError>> + Send;
}

/// Durable local storage of ratchet states (cache-byte form).
///
/// Synchronous: local storage is fast and never crosses the network.
pub trait LocalKeyCache: Clone + Send + Sync + 'static {
    /// Stored bytes for `id`, if any.
    fn get(&self, id: &EpochKeyId) -> Result<Option<Vec<u8>>, ServiceError>;

    /// Store (or replace) the bytes for `id`.
    fn put(&self, id: &EpochKeyId, bytes: &[u8]) -> Result<(), ServiceError>;

    /// Remove the entry for `id`. Removing a missing entry is not an error.
    fn remove(&self, id: &EpochKeyId) -> Result<(), ServiceError>;
}
