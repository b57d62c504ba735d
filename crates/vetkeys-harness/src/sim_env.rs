//! Deterministic Environment for simulation.
//!
//! `SimEnv` draws randomness from a seeded ChaCha20 stream and keeps a
//! settable wall clock. Clones share both, so every component built from one
//! `SimEnv` sees the same clock and consumes one reproducible byte stream.
//!
//! Sleeping goes through `tokio::time`, so tests with a paused runtime skip
//! the wait. A sleep that runs to completion also moves the wall clock
//! forward by its duration; a sleep cancelled by `select!` does not.

#![allow(clippy::disallowed_types, reason = "Locking RNG state, never across an await")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use vetkeys_core::{Environment, Timestamp, duration_millis};

/// Wall clock of a fresh `SimEnv`: 2023-11-14T22:13:20Z.
pub const SIM_START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Seeded, clock-controlled environment.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    wall_clock_ms: Arc<AtomicU64>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed, wall clock at [`SIM_START`].
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            wall_clock_ms: Arc::new(AtomicU64::new(SIM_START.as_millis())),
        }
    }

    /// Independent environment (own RNG and clock) starting at this one's
    /// current wall-clock time.
    ///
    /// Used to give participants skewed clocks.
    #[must_use]
    pub fn fork(&self, seed: u64) -> Self {
        let forked = Self::with_seed(seed);
        forked.set_wall_clock(self.wall_clock());
        forked
    }

    /// Set the wall clock. Wall clocks may jump backwards.
    pub fn set_wall_clock(&self, time: Timestamp) {
        self.wall_clock_ms.store(time.as_millis(), Ordering::SeqCst);
    }

    /// Move the wall clock forward.
    pub fn advance(&self, duration: Duration) {
        self.wall_clock_ms.fetch_add(duration_millis(duration), Ordering::SeqCst);
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock(&self) -> Timestamp {
        Timestamp::from_millis(self.wall_clock_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let clock = Arc::clone(&self.wall_clock_ms);
        async move {
            tokio::time::sleep(duration).await;
            clock.fetch_add(duration_millis(duration), Ordering::SeqCst);
        }
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}
