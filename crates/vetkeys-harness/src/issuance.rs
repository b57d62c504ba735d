//! In-process key-issuance service.
//!
//! [`SimKeyIssuance`] plays the remote service: it holds a master secret,
//! derives per-context secrets the way the real subnet does, and issues
//! transport-encrypted VetKeys only to authorized callers. It also stores
//! the channel registry, encrypted caches and reshared root keys.
//!
//! Clients talk to it through a [`CallerIssuance`] handle bound to one
//! identity, which implements [`KeyIssuance`].
//!
//! # Authorization
//!
//! | Context                       | Input        | Allowed for               |
//! |-------------------------------|--------------|---------------------------|
//! | channel (channel, generation) | empty        | that generation's members |
//! | resharing (p)                 | empty        | p only                    |
//! | cache                         | caller bytes | everyone                  |

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use ic_bls12_381::{G1Affine, G2Affine, Scalar};
use pairing::group::Curve;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;
use vetkeys_core::{
    ChannelId, DerivationContexts, GenerationId, GenerationMetadata, Identity, KeyIssuance,
    ServiceError, Timestamp,
};
use vetkeys_crypto::{
    DerivedPublicKey, EncryptedVetKey, MasterPublicKey, augmented_hash_to_g1, hash_to_scalar,
};

/// Canister id the simulated client application runs under.
pub const SIM_CANISTER_ID: &[u8] = b"vetkeys-sim-canister";

type StorageKey = (Identity, ChannelId, GenerationId);

struct IssuerState {
    /// Generations of each channel, indexed by generation id
    channels: HashMap<ChannelId, Vec<GenerationMetadata>>,
    cache_blobs: HashMap<StorageKey, Vec<u8>>,
    reshared: HashMap<StorageKey, Vec<u8>>,
    vetkeys_issued: usize,
    rng: ChaCha20Rng,
}

/// Simulated key-issuance service.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SimKeyIssuance {
    master_secret: Scalar,
    master_key: MasterPublicKey,
    canister_key: DerivedPublicKey,
    contexts: DerivationContexts,
    state: Arc<Mutex<IssuerState>>,
}

impl SimKeyIssuance {
    /// Service with a master secret derived from `seed` and the default
    /// derivation contexts.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_contexts(seed, DerivationContexts::default())
    }

    /// Service with explicit derivation contexts.
    pub fn with_contexts(seed: u64, contexts: DerivationContexts) -> Self {
        let master_secret = hash_to_scalar(&seed.to_be_bytes(), "vetkeys-sim-master-secret");
        let master_key = MasterPublicKey::from_point(G2Affine::from(
            G2Affine::generator() * master_secret,
        ));
        let canister_key = master_key.derive_canister_key(SIM_CANISTER_ID);

        Self {
            master_secret,
            master_key,
            canister_key,
            contexts,
            state: Arc::new(Mutex::new(IssuerState {
                channels: HashMap::new(),
                cache_blobs: HashMap::new(),
                reshared: HashMap::new(),
                vetkeys_issued: 0,
                rng: ChaCha20Rng::seed_from_u64(seed ^ 0x5eed),
            })),
        }
    }

    /// Handle for requests authenticated as `caller`.
    pub fn for_caller(&self, caller: Identity) -> CallerIssuance {
        CallerIssuance { service: self.clone(), caller }
    }

    /// The subnet master public key.
    pub fn master_public_key(&self) -> &MasterPublicKey {
        &self.master_key
    }

    /// The application's canister key (derived with an empty context).
    pub fn canister_public_key(&self) -> &DerivedPublicKey {
        &self.canister_key
    }

    /// Derivation contexts the service authorizes against.
    pub fn contexts(&self) -> &DerivationContexts {
        &self.contexts
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, IssuerState> {
        self.state.lock().expect("Mutex poisoned")
    }

    /// Register a new channel; its first generation is 0.
    pub fn create_channel(
        &self,
        channel: ChannelId,
        participants: Vec<Identity>,
        creation_time: Timestamp,
        rotation: Duration,
    ) -> GenerationMetadata {
        let metadata = GenerationMetadata {
            generation: GenerationId(0),
            participants,
            creation_time,
            rotation,
        };
        self.state().channels.insert(channel, vec![metadata.clone()]);
        metadata
    }

    /// Start a new generation with a new member set (a membership change).
    ///
    /// The rotation interval carries over.
    pub fn start_generation(
        &self,
        channel: &ChannelId,
        participants: Vec<Identity>,
        creation_time: Timestamp,
    ) -> Result<GenerationMetadata, ServiceError> {
        let mut state = self.state();
        let generations = state.channels.get_mut(channel).ok_or(ServiceError::NotFound)?;
        let previous = generations.last().ok_or(ServiceError::NotFound)?;

        let metadata = GenerationMetadata {
            generation: previous.generation.next(),
            participants,
            creation_time,
            rotation: previous.rotation,
        };
        generations.push(metadata.clone());
        Ok(metadata)
    }

    /// Metadata of the channel's newest generation, without authorization.
    pub fn latest(&self, channel: &ChannelId) -> Result<GenerationMetadata, ServiceError> {
        self.state()
            .channels
            .get(channel)
            .and_then(|generations| generations.last().cloned())
            .ok_or(ServiceError::NotFound)
    }

    /// Number of VetKeys handed out so far.
    pub fn vetkeys_issued(&self) -> usize {
        self.state().vetkeys_issued
    }

    /// Whether a reshared ciphertext is stored for `recipient`.
    pub fn has_reshared(
        &self,
        recipient: &Identity,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> bool {
        self.state().reshared.contains_key(&(recipient.clone(), channel.clone(), generation))
    }

    /// Whether an encrypted cache blob is stored for `owner`.
    pub fn has_cache_blob(
        &self,
        owner: &Identity,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> bool {
        self.state().cache_blobs.contains_key(&(owner.clone(), channel.clone(), generation))
    }

    /// Replace a stored reshared ciphertext, bypassing authorization.
    ///
    /// Simulates a malicious or buggy peer.
    pub fn overwrite_reshared(
        &self,
        recipient: &Identity,
        channel: &ChannelId,
        generation: GenerationId,
        bytes: Vec<u8>,
    ) {
        self.state().reshared.insert((recipient.clone(), channel.clone(), generation), bytes);
    }

    /// Replace a stored cache blob, bypassing authorization.
    pub fn overwrite_cache_blob(
        &self,
        owner: &Identity,
        channel: &ChannelId,
        generation: GenerationId,
        bytes: Vec<u8>,
    ) {
        self.state().cache_blobs.insert((owner.clone(), channel.clone(), generation), bytes);
    }

    fn generation(
        state: &IssuerState,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<GenerationMetadata, ServiceError> {
        state
            .channels
            .get(channel)
            .and_then(|generations| generations.get(generation.0 as usize))
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    fn require_member(
        state: &IssuerState,
        caller: &Identity,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<GenerationMetadata, ServiceError> {
        let metadata = Self::generation(state, channel, generation)?;
        if !metadata.participants.contains(caller) {
            return Err(ServiceError::Rejected(format!(
                "{caller} is not a member of {channel} generation {generation}"
            )));
        }
        Ok(metadata)
    }

    /// Check that `caller` may obtain the VetKey for `(context, input)`.
    fn authorize(
        &self,
        state: &IssuerState,
        caller: &Identity,
        context: &[u8],
        input: &[u8],
    ) -> Result<(), ServiceError> {
        if context == self.contexts.cache().as_slice() {
            return if input == caller.as_bytes() {
                Ok(())
            } else {
                Err(ServiceError::Rejected("cache key input must be the caller".to_string()))
            };
        }

        if context == self.contexts.resharing(caller).as_slice() && input.is_empty() {
            return Ok(());
        }

        for (channel, generations) in &state.channels {
            for metadata in generations {
                if self.contexts.channel(channel, metadata.generation).as_slice() == context {
                    return if input.is_empty() && metadata.participants.contains(caller) {
                        Ok(())
                    } else {
                        Err(ServiceError::Rejected(format!(
                            "{caller} may not derive keys of {channel} generation {}",
                            metadata.generation
                        )))
                    };
                }
            }
        }

        Err(ServiceError::Rejected("unknown derivation context".to_string()))
    }

    /// Secret key of the context-derived public key.
    fn context_secret(&self, context: &[u8]) -> Scalar {
        self.master_secret
            + self.master_key.canister_offset(SIM_CANISTER_ID)
            + self.canister_key.context_offset(context)
    }

    fn encrypted_vetkey(
        &self,
        caller: &Identity,
        transport_public_key: &[u8],
        context: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        let tpk_bytes: [u8; 48] = transport_public_key
            .try_into()
            .map_err(|_| ServiceError::Rejected("transport key must be 48 bytes".to_string()))?;
        let tpk = Option::<G1Affine>::from(G1Affine::from_compressed(&tpk_bytes))
            .ok_or_else(|| ServiceError::Rejected("invalid transport key".to_string()))?;

        let mut state = self.state();
        self.authorize(&state, caller, context, input)?;

        let mut wide = [0u8; 64];
        state.rng.fill_bytes(&mut wide);
        let r = Scalar::from_bytes_wide(&wide);
        state.vetkeys_issued += 1;
        drop(state);

        let dpk = self.canister_key.derive_sub_key(context);
        let signature = augmented_hash_to_g1(dpk.point(), input) * self.context_secret(context);

        let mut out = Vec::with_capacity(EncryptedVetKey::BYTES);
        out.extend_from_slice(&(G1Affine::generator() * r).to_affine().to_compressed());
        out.extend_from_slice(&(G2Affine::generator() * r).to_affine().to_compressed());
        out.extend_from_slice(&(tpk * r + signature).to_affine().to_compressed());

        debug!(caller = %caller, context_len = context.len(), "vetkey issued");
        Ok(out)
    }
}

/// A [`SimKeyIssuance`] handle authenticated as one caller.
#[derive(Clone)]
pub struct CallerIssuance {
    service: SimKeyIssuance,
    caller: Identity,
}

impl CallerIssuance {
    /// The authenticated caller.
    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    /// The service behind this handle.
    pub fn service(&self) -> &SimKeyIssuance {
        &self.service
    }
}

impl KeyIssuance for CallerIssuance {
    async fn public_key(&self, context: &[u8]) -> Result<Vec<u8>, ServiceError> {
        Ok(self.service.canister_key.derive_sub_key(context).serialize().to_vec())
    }

    async fn encrypted_vetkey(
        &self,
        transport_public_key: &[u8],
        context: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        self.service.encrypted_vetkey(&self.caller, transport_public_key, context, input)
    }

    async fn encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        let state = self.service.state();
        SimKeyIssuance::require_member(&state, &self.caller, channel, generation)?;
        state
            .cache_blobs
            .get(&(self.caller.clone(), channel.clone(), generation))
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    async fn put_encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        blob: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let mut state = self.service.state();
        SimKeyIssuance::require_member(&state, &self.caller, channel, generation)?;
        state.cache_blobs.insert((self.caller.clone(), channel.clone(), generation), blob);
        Ok(())
    }

    async fn reshared_ibe_ciphertext(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        let state = self.service.state();
        SimKeyIssuance::require_member(&state, &self.caller, channel, generation)?;
        state
            .reshared
            .get(&(self.caller.clone(), channel.clone(), generation))
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    async fn put_reshared_ibe_ciphertexts(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        ciphertexts: Vec<(Identity, Vec<u8>)>,
    ) -> Result<(), ServiceError> {
        let mut state = self.service.state();
        let metadata = SimKeyIssuance::require_member(&state, &self.caller, channel, generation)?;

        if let Some((outsider, _)) =
            ciphertexts.iter().find(|(recipient, _)| !metadata.participants.contains(recipient))
        {
            return Err(ServiceError::Rejected(format!(
                "{outsider} is not a member of {channel} generation {generation}"
            )));
        }

        // First resharer wins; later copies are redundant
        for (recipient, bytes) in ciphertexts {
            state.reshared.entry((recipient, channel.clone(), generation)).or_insert(bytes);
        }
        Ok(())
    }

    async fn generation_metadata(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<GenerationMetadata, ServiceError> {
        let state = self.service.state();
        SimKeyIssuance::require_member(&state, &self.caller, channel, generation)
    }

    async fn latest_generation(
        &self,
        channel: &ChannelId,
    ) -> Result<GenerationMetadata, ServiceError> {
        let metadata = self.service.latest(channel)?;
        if !metadata.participants.contains(&self.caller) {
            return Err(ServiceError::Rejected(format!(
                "{} is not a member of {channel}",
                self.caller
            )));
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use vetkeys_crypto::{TransportSecretKey, VetKey};

    use super::*;

    fn service() -> SimKeyIssuance {
        let service = SimKeyIssuance::with_seed(1);
        service.create_channel(
            ChannelId::group(1),
            vec!["alice".into(), "bob".into()],
            Timestamp::from_millis(0),
            Duration::from_secs(60),
        );
        service
    }

    async fn fetch(
        handle: &CallerIssuance,
        context: &[u8],
        input: &[u8],
    ) -> Result<VetKey, ServiceError> {
        let tsk = TransportSecretKey::from_seed([3u8; 32]);
        let bytes = handle.encrypted_vetkey(&tsk.public_key_bytes(), context, input).await?;
        let dpk = DerivedPublicKey::deserialize(&handle.public_key(context).await?).unwrap();
        let encrypted = EncryptedVetKey::deserialize(&bytes).unwrap();
        Ok(encrypted.decrypt_and_verify(&tsk, &dpk, input).unwrap())
    }

    #[tokio::test]
    async fn members_get_verifiable_channel_keys() {
        let service = service();
        let context = service.contexts().channel(&ChannelId::group(1), GenerationId(0));

        let alice = fetch(&service.for_caller("alice".into()), &context, &[]).await.unwrap();
        let bob = fetch(&service.for_caller("bob".into()), &context, &[]).await.unwrap();

        assert_eq!(alice.signature_bytes(), bob.signature_bytes());
        assert_eq!(service.vetkeys_issued(), 2);
    }

    #[tokio::test]
    async fn outsiders_are_rejected() {
        let service = service();
        let context = service.contexts().channel(&ChannelId::group(1), GenerationId(0));

        let result = fetch(&service.for_caller("mallory".into()), &context, &[]).await;
        assert!(matches!(result, Err(ServiceError::Rejected(_))));

        // Nobody may fetch someone else's resharing key
        let context = service.contexts().resharing(&"alice".into());
        let result = fetch(&service.for_caller("bob".into()), &context, &[]).await;
        assert!(matches!(result, Err(ServiceError::Rejected(_))));
    }

    #[tokio::test]
    async fn cache_key_is_bound_to_caller() {
        let service = service();
        let context = service.contexts().cache();
        let alice = service.for_caller("alice".into());

        assert!(fetch(&alice, &context, b"alice").await.is_ok());
        assert!(matches!(fetch(&alice, &context, b"bob").await, Err(ServiceError::Rejected(_))));
    }

    #[tokio::test]
    async fn reshared_ciphertexts_only_reach_members() {
        let service = service();
        let channel = ChannelId::group(1);
        let alice = service.for_caller("alice".into());

        let outsider = vec![(Identity::from("mallory"), vec![1u8])];
        let result = alice.put_reshared_ibe_ciphertexts(&channel, GenerationId(0), outsider).await;
        assert!(matches!(result, Err(ServiceError::Rejected(_))));

        let to_bob = vec![(Identity::from("bob"), vec![1u8])];
        alice.put_reshared_ibe_ciphertexts(&channel, GenerationId(0), to_bob).await.unwrap();

        let bob = service.for_caller("bob".into());
        assert_eq!(bob.reshared_ibe_ciphertext(&channel, GenerationId(0)).await.unwrap(), [1u8]);
        assert_eq!(
            alice.reshared_ibe_ciphertext(&channel, GenerationId(0)).await,
            Err(ServiceError::NotFound)
        );
    }

    #[tokio::test]
    async fn generations_track_membership() {
        let service = service();
        let channel = ChannelId::group(1);
        service
            .start_generation(&channel, vec!["alice".into()], Timestamp::from_millis(1_000))
            .unwrap();

        let bob = service.for_caller("bob".into());
        assert!(bob.generation_metadata(&channel, GenerationId(0)).await.is_ok());
        assert!(bob.latest_generation(&channel).await.is_err());

        let latest = service.for_caller("alice".into()).latest_generation(&channel).await.unwrap();
        assert_eq!(latest.generation, GenerationId(1));
        assert_eq!(latest.rotation, Duration::from_secs(60));
    }
}
