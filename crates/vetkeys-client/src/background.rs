//! Fire-and-forget tasks and their failure log.
//!
//! Cache population and resharing run detached from the request that
//! triggered them. Their failures never reach that caller; they are logged
//! and recorded here so tests and diagnostics can inspect them.

#![allow(clippy::disallowed_types, reason = "Synchronous append-only log")]

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

use tracing::warn;
use vetkeys_core::EpochKeyId;

use crate::error::KeyError;

/// Kind of detached work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTask {
    /// Encrypting the initial ratchet state into the remote cache
    RemoteCacheWrite,
    /// IBE-encrypting the root key to other participants
    Reshare,
}

impl fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteCacheWrite => f.write_str("remote-cache-write"),
            Self::Reshare => f.write_str("reshare"),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundFailure {
    /// Key the task worked on
    pub key_id: EpochKeyId,
    /// What the task was doing
    pub task: BackgroundTask,
    /// Why it failed
    pub error: KeyError,
}

/// Shared, append-only log of background failures.
#[derive(Clone, Default)]
pub struct BackgroundLog {
    failures: Arc<Mutex<Vec<BackgroundFailure>>>,
}

impl BackgroundLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    #[allow(clippy::expect_used)]
    pub fn record(&self, failure: BackgroundFailure) {
        warn!(
            key = %failure.key_id,
            task = %failure.task,
            error = %failure.error,
            "background task failed"
        );
        self.failures.lock().expect("Mutex poisoned").push(failure);
    }

    /// Snapshot of all recorded failures.
    #[allow(clippy::expect_used)]
    pub fn failures(&self) -> Vec<BackgroundFailure> {
        self.failures.lock().expect("Mutex poisoned").clone()
    }

    /// Number of recorded failures.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.failures.lock().expect("Mutex poisoned").len()
    }

    /// True if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `work` detached; a failure is recorded, never propagated.
    pub fn spawn<F>(&self, key_id: EpochKeyId, task: BackgroundTask, work: F)
    where
        F: Future<Output = Result<(), KeyError>> + Send + 'static,
    {
        let log = self.clone();
        tokio::spawn(async move {
            if let Err(error) = work.await {
                log.record(BackgroundFailure { key_id, task, error });
            }
        });
    }
}

impl fmt::Debug for BackgroundLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundLog").field("failures", &self.len()).finish()
    }
}
