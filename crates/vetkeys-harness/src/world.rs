//! A simulated deployment: one issuance service, one sequencer, many
//! participants.

use std::time::Duration;

use vetkeys_client::{ClientConfig, KeyStore, Messenger};
use vetkeys_core::{ChannelId, Environment, GenerationMetadata, Identity, ServiceError};

use crate::{
    issuance::{CallerIssuance, SimKeyIssuance},
    local_cache::MemoryLocalCache,
    sequencer::SimSequencer,
    sim_env::SimEnv,
};

/// Key table of a simulated participant.
pub type SimKeyStore = KeyStore<CallerIssuance, MemoryLocalCache, SimEnv>;

/// Messenger of a simulated participant.
pub type SimMessenger = Messenger<CallerIssuance, SimSequencer, MemoryLocalCache, SimEnv>;

/// Shared service side of a simulation.
///
/// The world's environment is the sequencer's clock and the default clock
/// of every participant.
#[derive(Clone)]
pub struct SimWorld {
    /// The key-issuance service
    pub issuance: SimKeyIssuance,
    /// The message sequencer
    pub sequencer: SimSequencer,
    /// Clock and RNG shared by default
    pub env: SimEnv,
}

impl SimWorld {
    /// World with every component seeded from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let issuance = SimKeyIssuance::with_seed(seed);
        let sequencer = SimSequencer::new(issuance.clone(), env.clone());
        Self { issuance, sequencer, env }
    }

    /// Register a group channel created now.
    pub fn create_group(
        &self,
        id: u64,
        participants: &[&str],
        rotation: Duration,
    ) -> (ChannelId, GenerationMetadata) {
        let channel = ChannelId::group(id);
        let members = participants.iter().map(|name| Identity::from(*name)).collect();
        let created = self.env.wall_clock();
        let metadata = self.issuance.create_channel(channel.clone(), members, created, rotation);
        (channel, metadata)
    }

    /// Change the members of `channel`, starting a new generation now.
    pub fn change_members(
        &self,
        channel: &ChannelId,
        participants: &[&str],
    ) -> Result<GenerationMetadata, ServiceError> {
        let members = participants.iter().map(|name| Identity::from(*name)).collect();
        self.issuance.start_generation(channel, members, self.env.wall_clock())
    }

    /// Participant on the world clock with a fresh local cache.
    pub fn participant(&self, name: &str) -> SimMessenger {
        let config = ClientConfig::default();
        self.participant_with(name, MemoryLocalCache::new(), self.env.clone(), config)
    }

    /// Participant with explicit cache, environment and configuration.
    ///
    /// Passing the cache of an earlier participant with the same name
    /// simulates a restart on the same device.
    pub fn participant_with(
        &self,
        name: &str,
        cache: MemoryLocalCache,
        env: SimEnv,
        config: ClientConfig,
    ) -> SimMessenger {
        let identity = Identity::from(name);
        let issuance = self.issuance.for_caller(identity.clone());
        let keys = KeyStore::new(identity, issuance, cache, env, config);
        Messenger::new(keys, self.sequencer.clone())
    }
}
