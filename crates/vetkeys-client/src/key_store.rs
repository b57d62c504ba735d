//! Epoch-key table and resolution pipeline.
//!
//! One ratchet per (channel, generation), kept in a single ordered table:
//!
//! ```text
//!            ensure_ready            resolved
//! Missing ──────────────▶ Pending ──────────────▶ Ready(state)
//!                            │                       │
//!                            │ all stages failed     │ superseded and past
//!                            ▼                       ▼ its recovery window
//!                         Failed                  Retired
//! ```
//!
//! A failed key is resolved again by the next `ensure_ready`. A retired key
//! is never resolved again; only `induct` brings it back.
//!
//! A resolution tries, in order, stopping at the first success:
//!
//! 1. the local key cache
//! 2. the remote encrypted cache, decrypted with the caller's cache VetKey
//! 3. a root key a peer reshared via IBE, decrypted with the caller's
//!    resharing VetKey and re-verified under the channel key
//! 4. a fresh VetKey from the issuance service, after which resharing and
//!    the remote cache write are dispatched in the background
//!
//! Concurrent `ensure_ready` calls for the same key share one resolution.
//!
//! # Invariants
//!
//! - Ready ratchets only move forward
//! - The table lock is never held across an await
//! - Key material reaching a ratchet has passed verification

#![allow(clippy::disallowed_types, reason = "Table lock is never held across an await")]

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::{OnceCell, watch};
use tracing::{debug, error, info, warn};
use vetkeys_core::{
    ChannelId, EnvRng, Environment, EpochKeyId, GenerationId, GenerationMetadata, Identity,
    KeyIssuance, LocalKeyCache, ServiceError, Timestamp, duration_millis,
};
use vetkeys_crypto::{
    CryptoError, DerivedPublicKey, EncryptedVetKey, EpochCiphertext, EpochSchedule,
    IbeCiphertext, IbeIdentity, IbeSeed, RatchetState, TransportSecretKey, VetKey,
    size_prefixed_tag,
};
use zeroize::Zeroizing;

use crate::{
    background::{BackgroundLog, BackgroundTask},
    config::ClientConfig,
    error::KeyError,
};

/// Domain separator tag of remote cache entries
const CACHE_DOMAIN: &str = "ic-vetkeys-chat-example-key-cache";

/// Number of resolution stages
const RESOLUTION_STAGES: usize = 4;

/// Observable state of one epoch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    /// Never requested
    Missing,
    /// A resolution is in flight
    Pending,
    /// Usable ratchet at `epoch`
    Ready {
        /// Committed ratchet epoch
        epoch: u64,
    },
    /// The last resolution failed
    Failed(KeyError),
    /// Superseded generation dropped after its recovery window
    Retired,
}

/// Outcome published to waiters; `None` while in flight.
type Outcome = Option<Result<(), KeyError>>;

enum Slot {
    Pending(watch::Receiver<Outcome>),
    Ready(RatchetState),
    Failed(KeyError),
    Retired,
}

struct Table {
    slots: BTreeMap<EpochKeyId, Slot>,
    consensus_time: Option<Timestamp>,
    recovery_windows: HashMap<ChannelId, Duration>,
}

/// Epoch-key table of one caller.
///
/// Cheap to clone; clones share the table.
pub struct KeyStore<I, C, E> {
    inner: Arc<Inner<I, C, E>>,
}

struct Inner<I, C, E> {
    caller: Identity,
    issuance: I,
    local_cache: C,
    env: E,
    config: ClientConfig,
    table: Mutex<Table>,
    canister_key: OnceCell<DerivedPublicKey>,
    cache_vetkey: OnceCell<VetKey>,
    resharing_vetkey: OnceCell<VetKey>,
    background: BackgroundLog,
}

impl<I, C, E> Clone for KeyStore<I, C, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<I, C, E> fmt::Debug for KeyStore<I, C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore").field("caller", &self.inner.caller).finish_non_exhaustive()
    }
}

impl<I, C, E> KeyStore<I, C, E>
where
    I: KeyIssuance,
    C: LocalKeyCache,
    E: Environment,
{
    /// Create an empty table for `caller`.
    pub fn new(
        caller: Identity,
        issuance: I,
        local_cache: C,
        env: E,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                caller,
                issuance,
                local_cache,
                env,
                config,
                table: Mutex::new(Table {
                    slots: BTreeMap::new(),
                    consensus_time: None,
                    recovery_windows: HashMap::new(),
                }),
                canister_key: OnceCell::new(),
                cache_vetkey: OnceCell::new(),
                resharing_vetkey: OnceCell::new(),
                background: BackgroundLog::new(),
            }),
        }
    }

    /// Identity this table resolves keys for.
    pub fn caller(&self) -> &Identity {
        &self.inner.caller
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Failures of background cache writes and resharing.
    pub fn background_log(&self) -> &BackgroundLog {
        &self.inner.background
    }

    pub(crate) fn issuance(&self) -> &I {
        &self.inner.issuance
    }

    pub(crate) fn env(&self) -> &E {
        &self.inner.env
    }

    #[allow(clippy::expect_used)]
    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner.table.lock().expect("Mutex poisoned")
    }

    /// Current state of `key_id`.
    pub fn status(&self, key_id: &EpochKeyId) -> KeyStatus {
        match self.table().slots.get(key_id) {
            None => KeyStatus::Missing,
            Some(Slot::Pending(_)) => KeyStatus::Pending,
            Some(Slot::Ready(state)) => KeyStatus::Ready { epoch: state.epoch() },
            Some(Slot::Failed(err)) => KeyStatus::Failed(err.clone()),
            Some(Slot::Retired) => KeyStatus::Retired,
        }
    }

    /// Latest consensus time observed, if any.
    pub fn consensus_time(&self) -> Option<Timestamp> {
        self.table().consensus_time
    }

    /// `(key, committed epoch)` of every ready ratchet, in key order.
    pub fn ratchet_versions(&self) -> Vec<(EpochKeyId, u64)> {
        self.table()
            .slots
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready(state) => Some((id.clone(), state.epoch())),
                Slot::Pending(_) | Slot::Failed(_) | Slot::Retired => None,
            })
            .collect()
    }

    /// Make `key_id` ready, resolving it if needed.
    ///
    /// Concurrent calls for the same key wait on a single resolution. A
    /// previously failed key is resolved again.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if every resolution stage failed
    /// - `KeyRetired` if the key's generation was already dropped
    /// - `KeyResolutionTimeout` if the resolution did not finish within
    ///   `resolution_timeout`; it keeps running in the background
    pub async fn ensure_ready(&self, key_id: &EpochKeyId) -> Result<(), KeyError> {
        let mut rx = {
            let mut table = self.table();
            match table.slots.get(key_id) {
                Some(Slot::Ready(_)) => return Ok(()),
                Some(Slot::Retired) => return Err(retired(key_id)),
                Some(Slot::Pending(rx)) => rx.clone(),
                Some(Slot::Failed(_)) | None => {
                    let (tx, rx) = watch::channel(None);
                    table.slots.insert(key_id.clone(), Slot::Pending(rx.clone()));
                    debug!(key = %key_id, "starting key resolution");

                    let store = self.clone();
                    let id = key_id.clone();
                    tokio::spawn(async move { store.complete_resolution(id, tx).await });
                    rx
                },
            }
        };

        let timeout = self.inner.config.resolution_timeout;
        tokio::select! {
            outcome = rx.wait_for(Option::is_some) => match outcome {
                Ok(outcome) => {
                    (*outcome).clone().unwrap_or_else(|| Err(self.unavailable(key_id, 0)))
                },
                // Resolution task vanished without publishing
                Err(_) => Err(self.unavailable(key_id, 0)),
            },
            () = self.inner.env.sleep(timeout) => {
                warn!(key = %key_id, ?timeout, "key resolution timed out");
                Err(KeyError::KeyResolutionTimeout { key_id: key_id.clone(), waited: timeout })
            },
        }
    }

    /// Ratchet state of `key_id` at `epoch`, without committing.
    ///
    /// # Errors
    ///
    /// - `KeyTooOld` if `epoch` is behind the committed epoch
    /// - `KeyUnavailable` (or the resolution error) if the key is not ready
    pub fn peek_at_epoch(&self, key_id: &EpochKeyId, epoch: u64) -> Result<RatchetState, KeyError> {
        let state = self.ready_state(key_id)?;
        if epoch < state.epoch() {
            return Err(KeyError::KeyTooOld {
                key_id: key_id.clone(),
                requested: epoch,
                current: state.epoch(),
            });
        }
        Ok(state.peek_at_epoch(epoch)?)
    }

    /// Commit the ratchet of `key_id` to `epoch`.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if `epoch` is behind the committed epoch
    /// - `KeyUnavailable` if the key is not ready
    pub fn evolve_to(&self, key_id: &EpochKeyId, epoch: u64) -> Result<(), KeyError> {
        let mut table = self.table();
        let state = match table.slots.get_mut(key_id) {
            Some(Slot::Ready(state)) => state,
            Some(Slot::Failed(err)) => return Err(err.clone()),
            Some(Slot::Retired) => return Err(retired(key_id)),
            Some(Slot::Pending(_)) | None => return Err(self.unavailable(key_id, 0)),
        };

        let before = state.epoch();
        state.evolve_to(epoch)?;
        if state.epoch() != before {
            debug!(key = %key_id, from = before, to = epoch, "ratchet committed");
            self.persist_local(key_id, state);
        }
        Ok(())
    }

    /// Epoch in force at `time` for `key_id`.
    pub fn expected_epoch(&self, key_id: &EpochKeyId, time: Timestamp) -> Result<u64, KeyError> {
        Ok(self.ready_state(key_id)?.expected_epoch_at(time.as_millis())?)
    }

    /// Encrypt under the epoch in force at `time`.
    ///
    /// # Errors
    ///
    /// - `KeyTooOld` if that epoch is behind the committed epoch
    /// - `InvalidTime` if `time` precedes the generation
    pub fn encrypt_at_time(
        &self,
        key_id: &EpochKeyId,
        time: Timestamp,
        sender: &Identity,
        message_id: u64,
        plaintext: &[u8],
    ) -> Result<EpochCiphertext, KeyError> {
        let state = self.ready_state(key_id)?;
        let epoch = state.expected_epoch_at(time.as_millis())?;
        let state = self.peek_from(key_id, &state, epoch)?;

        let mut rng = EnvRng::new(&self.inner.env);
        let ciphertext =
            state.encrypt_at_epoch(epoch, sender.as_bytes(), message_id, plaintext, &mut rng)?;
        Ok(EpochCiphertext { epoch, ciphertext })
    }

    /// Decrypt a message declared at `epoch`.
    ///
    /// Peeks; the committed ratchet only moves with consensus time.
    ///
    /// # Errors
    ///
    /// - `KeyTooOld` if `epoch` is behind the committed epoch
    /// - `Crypto(DecryptionFailed)` if authentication fails
    pub fn decrypt(
        &self,
        key_id: &EpochKeyId,
        epoch: u64,
        sender: &Identity,
        message_id: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, KeyError> {
        let state = self.peek_at_epoch(key_id, epoch)?;
        Ok(state.decrypt_at_epoch(epoch, sender.as_bytes(), message_id, ciphertext)?)
    }

    /// Feed a sequencer timestamp into the consensus clock.
    ///
    /// Times at or before the latest observed one are ignored. Otherwise
    /// every ready ratchet moves to the epoch in force at
    /// `time - recovery window`, and superseded generations whose recovery
    /// window has passed are retired.
    pub fn advance_consensus_time(&self, time: Timestamp) {
        let mut table = self.table();
        if table.consensus_time.is_some_and(|current| time <= current) {
            return;
        }
        table.consensus_time = Some(time);
        self.apply_consensus(&mut table, time);
    }

    /// Set the recovery window of `channel` for existing and future keys.
    pub fn set_recovery_window(&self, channel: &ChannelId, window: Duration) {
        let mut table = self.table();
        table.recovery_windows.insert(channel.clone(), window);

        let window_ms = duration_millis(window);
        for (id, slot) in &mut table.slots {
            if &id.channel != channel {
                continue;
            }
            if let Slot::Ready(state) = slot {
                state.set_recovery_window(window_ms);
                self.persist_local(id, state);
            }
        }
        info!(channel = %channel, ?window, "recovery window updated");

        if let Some(time) = table.consensus_time {
            self.apply_consensus(&mut table, time);
        }
    }

    /// Insert a state obtained out of band.
    ///
    /// # Errors
    ///
    /// - `AlreadyPresent` if the key is ready or being resolved
    pub fn induct(&self, key_id: EpochKeyId, mut state: RatchetState) -> Result<(), KeyError> {
        let mut table = self.table();
        if matches!(table.slots.get(&key_id), Some(Slot::Ready(_) | Slot::Pending(_))) {
            return Err(KeyError::AlreadyPresent { key_id });
        }

        if let Some(time) = table.consensus_time {
            self.evolve_to_consensus(&key_id, &mut state, time);
        }
        self.persist_local(&key_id, &state);
        info!(key = %key_id, epoch = state.epoch(), "ratchet state inducted");
        table.slots.insert(key_id, Slot::Ready(state));
        Ok(())
    }

    fn unavailable(&self, key_id: &EpochKeyId, attempts: usize) -> KeyError {
        KeyError::KeyUnavailable { key_id: key_id.clone(), attempts }
    }

    fn ready_state(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        match self.table().slots.get(key_id) {
            Some(Slot::Ready(state)) => Ok(state.clone()),
            Some(Slot::Failed(err)) => Err(err.clone()),
            Some(Slot::Retired) => Err(retired(key_id)),
            Some(Slot::Pending(_)) | None => Err(self.unavailable(key_id, 0)),
        }
    }

    fn peek_from(
        &self,
        key_id: &EpochKeyId,
        state: &RatchetState,
        epoch: u64,
    ) -> Result<RatchetState, KeyError> {
        if epoch < state.epoch() {
            return Err(KeyError::KeyTooOld {
                key_id: key_id.clone(),
                requested: epoch,
                current: state.epoch(),
            });
        }
        Ok(state.peek_at_epoch(epoch)?)
    }

    fn recovery_window(&self, channel: &ChannelId) -> Duration {
        self.table()
            .recovery_windows
            .get(channel)
            .copied()
            .unwrap_or(self.inner.config.default_recovery_window)
    }

    fn apply_consensus(&self, table: &mut Table, time: Timestamp) {
        for (id, slot) in &mut table.slots {
            if let Slot::Ready(state) = slot
                && self.evolve_to_consensus(id, state, time)
            {
                self.persist_local(id, state);
            }
        }

        let mut newest: HashMap<&ChannelId, GenerationId> = HashMap::new();
        for id in table.slots.keys() {
            let entry = newest.entry(&id.channel).or_insert(id.generation);
            *entry = (*entry).max(id.generation);
        }

        let expired: Vec<EpochKeyId> = table
            .slots
            .iter()
            .filter_map(|(id, slot)| {
                let Slot::Ready(state) = slot else { return None };
                let latest = newest.get(&id.channel).copied()?;
                let schedule = state.schedule();
                let expiry = schedule.creation_time_ms.saturating_add(schedule.recovery_ms);
                (id.generation < latest && expiry < time.as_millis()).then(|| id.clone())
            })
            .collect();

        for id in expired {
            if let Err(err) = self.inner.local_cache.remove(&id) {
                warn!(key = %id, error = %err, "failed to remove local cache entry");
            }
            info!(key = %id, "superseded generation retired");
            table.slots.insert(id, Slot::Retired);
        }
    }

    /// Evolve `state` to the epoch in force at `time - recovery window`.
    ///
    /// Returns true if the ratchet moved.
    fn evolve_to_consensus(
        &self,
        key_id: &EpochKeyId,
        state: &mut RatchetState,
        time: Timestamp,
    ) -> bool {
        let recovery = Duration::from_millis(state.schedule().recovery_ms);
        let reference = time.saturating_sub(recovery);
        match state.evolve_if_needed(reference.as_millis()) {
            Ok(0) => false,
            Ok(steps) => {
                debug!(key = %key_id, epoch = state.epoch(), steps, "ratchet evolved");
                true
            },
            Err(err) => {
                error!(key = %key_id, error = %err, "ratchet evolution failed");
                false
            },
        }
    }

    fn persist_local(&self, key_id: &EpochKeyId, state: &RatchetState) {
        if let Err(err) = self.inner.local_cache.put(key_id, &state.to_cache_bytes()[..]) {
            warn!(key = %key_id, error = %err, "failed to write local key cache");
        }
    }

    async fn complete_resolution(self, key_id: EpochKeyId, tx: watch::Sender<Outcome>) {
        let result = self.resolve(&key_id).await;

        let outcome = {
            let mut table = self.table();
            match result {
                Ok(mut state) => {
                    if let Some(time) = table.consensus_time
                        && self.evolve_to_consensus(&key_id, &mut state, time)
                    {
                        self.persist_local(&key_id, &state);
                    }
                    info!(key = %key_id, epoch = state.epoch(), "key ready");
                    table.slots.insert(key_id, Slot::Ready(state));
                    Ok(())
                },
                Err(err) => {
                    warn!(key = %key_id, error = %err, "key resolution failed");
                    table.slots.insert(key_id, Slot::Failed(err.clone()));
                    Err(err)
                },
            }
        };

        tx.send_replace(Some(outcome));
    }

    async fn resolve(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        match self.from_local_cache(key_id) {
            Ok(state) => {
                debug!(key = %key_id, epoch = state.epoch(), "resolved from local cache");
                return Ok(state);
            },
            Err(err) => stage_failed(key_id, "local-cache", &err),
        }

        match self.from_remote_cache(key_id).await {
            Ok(state) => {
                info!(key = %key_id, epoch = state.epoch(), "resolved from remote cache");
                self.persist_local(key_id, &state);
                return Ok(state);
            },
            Err(err) => stage_failed(key_id, "remote-cache", &err),
        }

        match self.from_reshared(key_id).await {
            Ok(state) => {
                info!(key = %key_id, "resolved from reshared root key");
                self.persist_local(key_id, &state);
                return Ok(state);
            },
            Err(err) => stage_failed(key_id, "reshared", &err),
        }

        match self.fetch_fresh(key_id).await {
            Ok(state) => {
                info!(key = %key_id, "resolved from fresh vetkey");
                self.persist_local(key_id, &state);
                return Ok(state);
            },
            Err(err) => stage_failed(key_id, "fresh", &err),
        }

        Err(self.unavailable(key_id, RESOLUTION_STAGES))
    }

    fn from_local_cache(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        let bytes = self.inner.local_cache.get(key_id)?.ok_or(ServiceError::NotFound)?;
        let bytes = Zeroizing::new(bytes);
        Ok(RatchetState::from_cache_bytes(&bytes)?)
    }

    async fn from_remote_cache(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        let blob =
            self.inner.issuance.encrypted_cache_blob(&key_id.channel, key_id.generation).await?;
        let cache_key = self.cache_vetkey().await?;
        let bytes = Zeroizing::new(
            cache_key.as_derived_key_material().decrypt(&blob, &cache_domain_separator(key_id)?)?,
        );
        Ok(RatchetState::from_cache_bytes(&bytes)?)
    }

    async fn from_reshared(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        let bytes =
            self.inner.issuance.reshared_ibe_ciphertext(&key_id.channel, key_id.generation).await?;
        let ciphertext = IbeCiphertext::deserialize(&bytes)?;
        let resharing_key = self.resharing_vetkey().await?;
        let vetkey_bytes = Zeroizing::new(ciphertext.decrypt(resharing_key)?);

        // A peer could reshare anything; only a valid channel signature is a root key
        let channel_key = self.channel_public_key(key_id).await?;
        let vetkey = VetKey::deserialize_and_verify(&vetkey_bytes, &channel_key, &[])?;

        let metadata =
            self.inner.issuance.generation_metadata(&key_id.channel, key_id.generation).await?;
        Ok(RatchetState::from_vetkey(&vetkey, self.schedule_for(&key_id.channel, &metadata)?))
    }

    async fn fetch_fresh(&self, key_id: &EpochKeyId) -> Result<RatchetState, KeyError> {
        let metadata =
            self.inner.issuance.generation_metadata(&key_id.channel, key_id.generation).await?;
        let channel_key = self.channel_public_key(key_id).await?;
        let context = self.inner.config.contexts.channel(&key_id.channel, key_id.generation);
        let vetkey = self.fetch_vetkey(&context, &[], &channel_key).await?;
        let schedule = self.schedule_for(&key_id.channel, &metadata)?;
        let state = RatchetState::from_vetkey(&vetkey, schedule);

        let store = self.clone();
        let id = key_id.clone();
        let participants = metadata.participants;
        self.inner.background.spawn(key_id.clone(), BackgroundTask::Reshare, async move {
            store.reshare(&id, &vetkey, &participants).await
        });

        let store = self.clone();
        let id = key_id.clone();
        let initial = state.clone();
        self.inner.background.spawn(key_id.clone(), BackgroundTask::RemoteCacheWrite, async move {
            store.write_remote_cache(&id, &initial).await
        });

        Ok(state)
    }

    /// IBE-encrypt the channel VetKey to every other participant.
    async fn reshare(
        &self,
        key_id: &EpochKeyId,
        vetkey: &VetKey,
        participants: &[Identity],
    ) -> Result<(), KeyError> {
        let canister_key = self.canister_key().await?;
        let identity = IbeIdentity::from_bytes(&[]);

        let mut ciphertexts = Vec::with_capacity(participants.len());
        for participant in participants.iter().filter(|p| **p != self.inner.caller) {
            let context = self.inner.config.contexts.resharing(participant);
            let dpk = canister_key.derive_sub_key(&context);
            let seed = IbeSeed::random(&mut EnvRng::new(&self.inner.env));
            let ciphertext =
                IbeCiphertext::encrypt(&dpk, &identity, vetkey.signature_bytes(), &seed);
            ciphertexts.push((participant.clone(), ciphertext.serialize()));
        }

        if ciphertexts.is_empty() {
            return Ok(());
        }

        let count = ciphertexts.len();
        self.inner
            .issuance
            .put_reshared_ibe_ciphertexts(&key_id.channel, key_id.generation, ciphertexts)
            .await?;
        debug!(key = %key_id, recipients = count, "root key reshared");
        Ok(())
    }

    /// Store `state` in the remote cache under the caller's cache VetKey.
    async fn write_remote_cache(
        &self,
        key_id: &EpochKeyId,
        state: &RatchetState,
    ) -> Result<(), KeyError> {
        let cache_key = self.cache_vetkey().await?;
        let domain_sep = cache_domain_separator(key_id)?;
        let blob = cache_key.as_derived_key_material().encrypt(
            &state.to_cache_bytes()[..],
            &domain_sep,
            &mut EnvRng::new(&self.inner.env),
        );

        self.inner
            .issuance
            .put_encrypted_cache_blob(&key_id.channel, key_id.generation, blob)
            .await?;
        debug!(key = %key_id, "initial state written to remote cache");
        Ok(())
    }

    fn schedule_for(
        &self,
        channel: &ChannelId,
        metadata: &GenerationMetadata,
    ) -> Result<EpochSchedule, KeyError> {
        Ok(EpochSchedule::new(
            metadata.creation_time.as_millis(),
            duration_millis(metadata.rotation),
            duration_millis(self.recovery_window(channel)),
        )?)
    }

    /// The canister key, fetched once; every context key derives from it.
    async fn canister_key(&self) -> Result<&DerivedPublicKey, KeyError> {
        self.inner
            .canister_key
            .get_or_try_init(|| async move {
                let bytes = self.inner.issuance.public_key(&[]).await?;
                Ok::<_, KeyError>(DerivedPublicKey::deserialize(&bytes)?)
            })
            .await
    }

    async fn channel_public_key(&self, key_id: &EpochKeyId) -> Result<DerivedPublicKey, KeyError> {
        let context = self.inner.config.contexts.channel(&key_id.channel, key_id.generation);
        Ok(self.canister_key().await?.derive_sub_key(&context))
    }

    async fn cache_vetkey(&self) -> Result<&VetKey, KeyError> {
        self.inner
            .cache_vetkey
            .get_or_try_init(|| async move {
                let context = self.inner.config.contexts.cache();
                let dpk = self.canister_key().await?.derive_sub_key(&context);
                self.fetch_vetkey(&context, self.inner.caller.as_bytes(), &dpk).await
            })
            .await
    }

    async fn resharing_vetkey(&self) -> Result<&VetKey, KeyError> {
        self.inner
            .resharing_vetkey
            .get_or_try_init(|| async move {
                let context = self.inner.config.contexts.resharing(&self.inner.caller);
                let dpk = self.canister_key().await?.derive_sub_key(&context);
                self.fetch_vetkey(&context, &[], &dpk).await
            })
            .await
    }

    async fn fetch_vetkey(
        &self,
        context: &[u8],
        input: &[u8],
        dpk: &DerivedPublicKey,
    ) -> Result<VetKey, KeyError> {
        let tsk = TransportSecretKey::random(&mut EnvRng::new(&self.inner.env));
        let encrypted = self
            .inner
            .issuance
            .encrypted_vetkey(&tsk.public_key_bytes(), context, input)
            .await?;
        Ok(EncryptedVetKey::deserialize(&encrypted)?.decrypt_and_verify(&tsk, dpk, input)?)
    }
}

/// `CACHE_DOMAIN || channel bytes || u64_be(generation)`
fn cache_domain_separator(key_id: &EpochKeyId) -> Result<Vec<u8>, CryptoError> {
    let mut out = size_prefixed_tag(CACHE_DOMAIN)?;
    out.extend_from_slice(&key_id.channel.to_bytes());
    out.extend_from_slice(&key_id.generation.0.to_be_bytes());
    Ok(out)
}

fn retired(key_id: &EpochKeyId) -> KeyError {
    KeyError::KeyRetired { key_id: key_id.clone() }
}

fn stage_failed(key_id: &EpochKeyId, stage: &'static str, err: &KeyError) {
    match err {
        KeyError::Service(ServiceError::NotFound) => {
            debug!(key = %key_id, stage, "resolution stage found nothing");
        },
        KeyError::Crypto(crypto) if crypto.is_security_failure() => {
            error!(key = %key_id, stage, error = %err, "key material failed verification");
        },
        _ => warn!(key = %key_id, stage, error = %err, "resolution stage failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_separator_binds_key_id() {
        let a = EpochKeyId::new(ChannelId::group(1), GenerationId(0));
        let b = EpochKeyId::new(ChannelId::group(1), GenerationId(1));
        let sep_a = cache_domain_separator(&a).unwrap();
        let sep_b = cache_domain_separator(&b).unwrap();

        assert_ne!(sep_a, sep_b);
        assert_eq!(sep_a[0] as usize, CACHE_DOMAIN.len());
        assert_eq!(&sep_a[1..=CACHE_DOMAIN.len()], CACHE_DOMAIN.as_bytes());
    }
}
