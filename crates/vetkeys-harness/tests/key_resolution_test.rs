//! Resolution pipeline tests
//!
//! Drive `KeyStore::ensure_ready` against the simulated issuance service and
//! check which stage answers:
//!
//! 1. **Fresh fetch** reshares to peers and fills the remote cache
//! 2. **Resharing** lets peers skip the channel VetKey fetch
//! 3. **Caches** answer restarts without touching the channel key again
//! 4. **Verification** rejects reshared bytes that are not the channel key
//! 5. **Single flight**, **timeouts** and **fault injection**

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ic_bls12_381::G1Affine;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use vetkeys_client::{ClientConfig, KeyError, KeyStatus, KeyStore};
use vetkeys_core::{
    ChannelId, Environment, EpochKeyId, GenerationId, GenerationMetadata, Identity, KeyIssuance,
    ServiceError, Timestamp,
};
use vetkeys_crypto::{IbeCiphertext, IbeIdentity, IbeSeed};
use vetkeys_harness::{
    CallerIssuance, ChaoticKeyIssuance, MemoryLocalCache, SimEnv, SimKeyStore, SimWorld,
};

const ROTATION: Duration = Duration::from_secs(60);

fn setup(members: &[&str]) -> (SimWorld, ChannelId, EpochKeyId) {
    let world = SimWorld::with_seed(11);
    let (channel, _) = world.create_group(1, members, ROTATION);
    let key_id = EpochKeyId::new(channel.clone(), GenerationId(0));
    (world, channel, key_id)
}

fn store(world: &SimWorld, name: &str, cache: MemoryLocalCache) -> SimKeyStore {
    world.participant_with(name, cache, world.env.clone(), ClientConfig::default()).keys().clone()
}

/// Let detached background tasks run to completion.
async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// `a` encrypts, `b` decrypts: both hold the same epoch key.
fn assert_interoperable<I1: KeyIssuance, I2: KeyIssuance>(
    a: &KeyStore<I1, MemoryLocalCache, SimEnv>,
    b: &KeyStore<I2, MemoryLocalCache, SimEnv>,
    key_id: &EpochKeyId,
    now: Timestamp,
) {
    let sender = a.caller().clone();
    let sealed = a.encrypt_at_time(key_id, now, &sender, 7, b"probe").unwrap();
    let opened = b.decrypt(key_id, sealed.epoch, &sender, 7, &sealed.ciphertext).unwrap();
    assert_eq!(opened, b"probe");
}

#[tokio::test]
async fn fresh_fetch_reshares_and_caches() {
    let (world, channel, key_id) = setup(&["alice", "bob", "carol"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());

    assert_eq!(alice.status(&key_id), KeyStatus::Missing);
    alice.ensure_ready(&key_id).await.unwrap();
    assert_eq!(alice.status(&key_id), KeyStatus::Ready { epoch: 0 });
    settle().await;

    let issuance = &world.issuance;
    assert!(issuance.has_reshared(&"bob".into(), &channel, GenerationId(0)));
    assert!(issuance.has_reshared(&"carol".into(), &channel, GenerationId(0)));
    assert!(!issuance.has_reshared(&"alice".into(), &channel, GenerationId(0)));
    assert!(issuance.has_cache_blob(&"alice".into(), &channel, GenerationId(0)));

    // Channel key plus the cache key for the remote write
    assert_eq!(issuance.vetkeys_issued(), 2);
    assert!(alice.background_log().is_empty());
}

#[tokio::test]
async fn peers_resolve_from_reshared_key() {
    let (world, _channel, key_id) = setup(&["alice", "bob"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());
    alice.ensure_ready(&key_id).await.unwrap();
    settle().await;
    let issued = world.issuance.vetkeys_issued();

    let bob = store(&world, "bob", MemoryLocalCache::new());
    bob.ensure_ready(&key_id).await.unwrap();

    // Only bob's resharing key was fetched
    assert_eq!(world.issuance.vetkeys_issued(), issued + 1);
    assert_interoperable(&alice, &bob, &key_id, world.env.wall_clock());
    assert_interoperable(&bob, &alice, &key_id, world.env.wall_clock());
}

#[tokio::test]
async fn restart_resolves_from_local_cache() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let cache = MemoryLocalCache::new();
    let alice = store(&world, "alice", cache.clone());
    alice.ensure_ready(&key_id).await.unwrap();
    settle().await;
    assert!(cache.contains(&key_id));
    let issued = world.issuance.vetkeys_issued();

    let restarted = store(&world, "alice", cache);
    restarted.ensure_ready(&key_id).await.unwrap();

    assert_eq!(world.issuance.vetkeys_issued(), issued);
    assert_interoperable(&alice, &restarted, &key_id, world.env.wall_clock());
}

#[tokio::test]
async fn new_device_resolves_from_remote_cache() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());
    alice.ensure_ready(&key_id).await.unwrap();
    settle().await;
    let issued = world.issuance.vetkeys_issued();

    let other_device = store(&world, "alice", MemoryLocalCache::new());
    other_device.ensure_ready(&key_id).await.unwrap();

    // The new device needs its own cache key, not the channel key
    assert_eq!(world.issuance.vetkeys_issued(), issued + 1);
    assert_interoperable(&alice, &other_device, &key_id, world.env.wall_clock());
}

#[tokio::test]
async fn corrupt_remote_cache_falls_through() {
    let (world, channel, key_id) = setup(&["alice"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());
    alice.ensure_ready(&key_id).await.unwrap();
    settle().await;

    world.issuance.overwrite_cache_blob(&"alice".into(), &channel, GenerationId(0), vec![0u8; 80]);
    let issued = world.issuance.vetkeys_issued();

    let other_device = store(&world, "alice", MemoryLocalCache::new());
    other_device.ensure_ready(&key_id).await.unwrap();

    // Cache key, then a fresh channel key
    assert_eq!(world.issuance.vetkeys_issued(), issued + 2);
    assert_interoperable(&alice, &other_device, &key_id, world.env.wall_clock());
}

#[tokio::test]
async fn reshared_non_signature_is_rejected() {
    let (world, channel, key_id) = setup(&["alice", "bob"]);

    // A valid IBE ciphertext to bob whose payload is a curve point but not
    // the channel key
    let contexts = world.issuance.contexts();
    let bob_resharing =
        world.issuance.canister_public_key().derive_sub_key(&contexts.resharing(&"bob".into()));
    let forged = IbeCiphertext::encrypt(
        &bob_resharing,
        &IbeIdentity::from_bytes(&[]),
        &G1Affine::generator().to_compressed(),
        &IbeSeed::random(&mut ChaCha20Rng::seed_from_u64(5)),
    );
    world.issuance.overwrite_reshared(&"bob".into(), &channel, GenerationId(0), forged.serialize());

    let bob = store(&world, "bob", MemoryLocalCache::new());
    bob.ensure_ready(&key_id).await.unwrap();

    // Resharing key, then the channel key after verification failed
    assert_eq!(world.issuance.vetkeys_issued(), 2);

    let alice = store(&world, "alice", MemoryLocalCache::new());
    alice.ensure_ready(&key_id).await.unwrap();
    assert_interoperable(&alice, &bob, &key_id, world.env.wall_clock());
}

#[tokio::test]
async fn reshared_key_of_other_generation_is_rejected() {
    let (world, channel, key_id) = setup(&["alice", "bob"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());
    alice.ensure_ready(&key_id).await.unwrap();
    settle().await;

    // Replay bob's generation-0 ciphertext as his generation-1 share
    let next = world.change_members(&channel, &["alice", "bob"]).unwrap();
    let bob_issuance = world.issuance.for_caller("bob".into());
    let old_share = bob_issuance.reshared_ibe_ciphertext(&channel, GenerationId(0)).await.unwrap();
    world.issuance.overwrite_reshared(&"bob".into(), &channel, next.generation, old_share);

    let next_id = EpochKeyId::new(channel.clone(), next.generation);
    let bob = store(&world, "bob", MemoryLocalCache::new());
    let issued = world.issuance.vetkeys_issued();
    bob.ensure_ready(&next_id).await.unwrap();

    // Resharing key, then the generation-1 channel key
    assert_eq!(world.issuance.vetkeys_issued(), issued + 2);

    alice.ensure_ready(&next_id).await.unwrap();
    assert_interoperable(&alice, &bob, &next_id, world.env.wall_clock());
}

#[tokio::test]
async fn concurrent_requests_share_one_resolution() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let alice = store(&world, "alice", MemoryLocalCache::new());

    let (a, b, c) = tokio::join!(
        alice.ensure_ready(&key_id),
        alice.ensure_ready(&key_id),
        alice.ensure_ready(&key_id)
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    settle().await;

    // One channel key and one cache key; a second resolution would fetch
    // another channel key
    assert_eq!(world.issuance.vetkeys_issued(), 2);
}

#[tokio::test]
async fn outsiders_cannot_resolve() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let mallory = store(&world, "mallory", MemoryLocalCache::new());

    let err = mallory.ensure_ready(&key_id).await.unwrap_err();
    assert!(matches!(err, KeyError::KeyUnavailable { attempts: 4, .. }));
    assert!(matches!(mallory.status(&key_id), KeyStatus::Failed(_)));
    assert_eq!(world.issuance.vetkeys_issued(), 0);
}

/// Issuance whose calls can be delayed or switched off.
#[derive(Clone)]
struct GatedIssuance {
    inner: CallerIssuance,
    delay: Duration,
    down: Arc<AtomicBool>,
}

impl GatedIssuance {
    fn new(inner: CallerIssuance, delay: Duration) -> Self {
        Self { inner, delay, down: Arc::new(AtomicBool::new(false)) }
    }

    async fn gate(&self) -> Result<(), ServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("switched off".to_string()));
        }
        Ok(())
    }
}

impl KeyIssuance for GatedIssuance {
    async fn public_key(&self, context: &[u8]) -> Result<Vec<u8>, ServiceError> {
        self.gate().await?;
        self.inner.public_key(context).await
    }

    async fn encrypted_vetkey(
        &self,
        transport_public_key: &[u8],
        context: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        self.gate().await?;
        self.inner.encrypted_vetkey(transport_public_key, context, input).await
    }

    async fn encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        self.gate().await?;
        self.inner.encrypted_cache_blob(channel, generation).await
    }

    async fn put_encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        blob: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.gate().await?;
        self.inner.put_encrypted_cache_blob(channel, generation, blob).await
    }

    async fn reshared_ibe_ciphertext(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        self.gate().await?;
        self.inner.reshared_ibe_ciphertext(channel, generation).await
    }

    async fn put_reshared_ibe_ciphertexts(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        ciphertexts: Vec<(Identity, Vec<u8>)>,
    ) -> Result<(), ServiceError> {
        self.gate().await?;
        self.inner.put_reshared_ibe_ciphertexts(channel, generation, ciphertexts).await
    }

    async fn generation_metadata(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<GenerationMetadata, ServiceError> {
        self.gate().await?;
        self.inner.generation_metadata(channel, generation).await
    }

    async fn latest_generation(
        &self,
        channel: &ChannelId,
    ) -> Result<GenerationMetadata, ServiceError> {
        self.gate().await?;
        self.inner.latest_generation(channel).await
    }
}

#[tokio::test(start_paused = true)]
async fn slow_resolution_times_out_and_continues() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let issuance = GatedIssuance::new(world.issuance.for_caller("alice".into()), ROTATION);
    let alice = KeyStore::new(
        "alice".into(),
        issuance,
        MemoryLocalCache::new(),
        world.env.clone(),
        ClientConfig::default(),
    );

    let err = alice.ensure_ready(&key_id).await.unwrap_err();
    assert_eq!(
        err,
        KeyError::KeyResolutionTimeout { key_id: key_id.clone(), waited: Duration::from_secs(30) }
    );
    assert_eq!(alice.status(&key_id), KeyStatus::Pending);

    // The resolution keeps running after the waiter gave up
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(alice.status(&key_id), KeyStatus::Ready { epoch: 0 });
    alice.ensure_ready(&key_id).await.unwrap();
}

#[tokio::test]
async fn failed_key_is_resolved_again() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let issuance = GatedIssuance::new(world.issuance.for_caller("alice".into()), Duration::ZERO);
    let down = Arc::clone(&issuance.down);
    let alice = KeyStore::new(
        "alice".into(),
        issuance,
        MemoryLocalCache::new(),
        world.env.clone(),
        ClientConfig::default(),
    );

    down.store(true, Ordering::SeqCst);
    let err = alice.ensure_ready(&key_id).await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(alice.status(&key_id), KeyStatus::Failed(KeyError::KeyUnavailable { .. })));

    down.store(false, Ordering::SeqCst);
    alice.ensure_ready(&key_id).await.unwrap();
    assert_eq!(alice.status(&key_id), KeyStatus::Ready { epoch: 0 });
}

#[tokio::test]
async fn total_outage_exhausts_every_stage() {
    let (world, _channel, key_id) = setup(&["alice"]);
    let chaotic = ChaoticKeyIssuance::new(world.issuance.for_caller("alice".into()), 1.0);
    let alice = KeyStore::new(
        "alice".into(),
        chaotic.clone(),
        MemoryLocalCache::new(),
        world.env.clone(),
        ClientConfig::default(),
    );

    let err = alice.ensure_ready(&key_id).await.unwrap_err();
    assert_eq!(err, KeyError::KeyUnavailable { key_id: key_id.clone(), attempts: 4 });

    // Remote cache, resharing and fresh stages each reached the service
    assert_eq!(chaotic.operation_count(), 3);
}

#[tokio::test]
async fn partial_outage_never_yields_a_wrong_key() {
    for seed in 0..16 {
        let (world, _channel, key_id) = setup(&["alice", "bob"]);
        let bob = store(&world, "bob", MemoryLocalCache::new());
        bob.ensure_ready(&key_id).await.unwrap();
        settle().await;

        let chaotic =
            ChaoticKeyIssuance::with_seed(world.issuance.for_caller("alice".into()), 0.3, seed);
        let alice = KeyStore::new(
            "alice".into(),
            chaotic,
            MemoryLocalCache::new(),
            world.env.clone(),
            ClientConfig::default(),
        );

        match alice.ensure_ready(&key_id).await {
            Ok(()) => assert_interoperable(&alice, &bob, &key_id, world.env.wall_clock()),
            Err(err) => assert!(matches!(err, KeyError::KeyUnavailable { attempts: 4, .. })),
        }
    }
}
