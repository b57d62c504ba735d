//! In-memory message sequencer.
//!
//! Assigns each accepted message a log index and a timestamp from its own
//! clock, and accepts a message only if it was encrypted under the channel's
//! newest generation at the epoch in force at that timestamp. Timestamps
//! are strictly increasing per sequencer.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;
use vetkeys_core::{
    ChannelId, Environment, OutgoingMessage, SequencedMessage, Sequencer, ServiceError, Timestamp,
    duration_millis,
};

use crate::{issuance::SimKeyIssuance, sim_env::SimEnv};

#[derive(Default)]
struct SequencerState {
    logs: HashMap<ChannelId, Vec<SequencedMessage>>,
    last_timestamp: Option<Timestamp>,
}

/// Sequencer sharing the channel registry of a [`SimKeyIssuance`].
#[derive(Clone)]
pub struct SimSequencer {
    issuance: SimKeyIssuance,
    clock: SimEnv,
    state: Arc<Mutex<SequencerState>>,
}

impl SimSequencer {
    /// Sequencer whose clock is `clock`'s wall clock.
    pub fn new(issuance: SimKeyIssuance, clock: SimEnv) -> Self {
        Self { issuance, clock, state: Arc::new(Mutex::new(SequencerState::default())) }
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().expect("Mutex poisoned")
    }

    /// Number of accepted messages in `channel`.
    pub fn len(&self, channel: &ChannelId) -> usize {
        self.state().logs.get(channel).map_or(0, Vec::len)
    }

    /// True if `channel` has no accepted messages.
    pub fn is_empty(&self, channel: &ChannelId) -> bool {
        self.len(channel) == 0
    }

    /// `now`, bumped past the previous timestamp if the clock stalled.
    fn timestamp_after(last: Option<Timestamp>, now: Timestamp) -> Timestamp {
        match last {
            Some(last) if now <= last => Timestamp::from_millis(last.as_millis() + 1),
            _ => now,
        }
    }
}

impl Sequencer for SimSequencer {
    async fn submit(
        &self,
        channel: &ChannelId,
        message: OutgoingMessage,
    ) -> Result<Timestamp, ServiceError> {
        let latest = self.issuance.latest(channel)?;
        if !latest.participants.contains(&message.sender) {
            return Err(ServiceError::Rejected(format!(
                "{} is not a member of {channel}",
                message.sender
            )));
        }

        let mut state = self.state();
        let timestamp = Self::timestamp_after(state.last_timestamp, self.clock.wall_clock());

        let elapsed = timestamp.as_millis().saturating_sub(latest.creation_time.as_millis());
        let expected = elapsed / duration_millis(latest.rotation).max(1);
        if message.generation != latest.generation || message.epoch != expected {
            debug!(
                channel = %channel,
                generation = %message.generation,
                epoch = message.epoch,
                expected,
                "stale epoch rejected"
            );
            return Err(ServiceError::StaleEpoch { generation: latest.generation, expected });
        }

        state.last_timestamp = Some(timestamp);
        let log = state.logs.entry(channel.clone()).or_default();
        let index = log.len() as u64;
        log.push(SequencedMessage { index, timestamp, message });
        Ok(timestamp)
    }

    async fn messages(
        &self,
        channel: &ChannelId,
        from: u64,
    ) -> Result<Vec<SequencedMessage>, ServiceError> {
        self.issuance.latest(channel)?;
        let state = self.state();
        let log = state.logs.get(channel).map_or(&[][..], Vec::as_slice);
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(log.len());
        Ok(log[start..].to_vec())
    }
}
