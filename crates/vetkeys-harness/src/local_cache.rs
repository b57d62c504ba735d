#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use vetkeys_core::{EpochKeyId, LocalKeyCache, ServiceError};

/// In-memory local key cache for testing and simulation
///
/// A `BTreeMap` from key id to cache bytes behind `Arc<Mutex<>>`, so clones
/// share contents the way a device's persistent store is shared by the
/// sessions on it. Uses `lock().expect()` which panics if the mutex is
/// poisoned, acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryLocalCache {
    entries: Arc<Mutex<BTreeMap<EpochKeyId, Vec<u8>>>>,
}

impl MemoryLocalCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn entries(&self) -> MutexGuard<'_, BTreeMap<EpochKeyId, Vec<u8>>> {
        self.entries.lock().expect("Mutex poisoned")
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `id`.
    pub fn contains(&self, id: &EpochKeyId) -> bool {
        self.entries().contains_key(id)
    }

    /// Stored key ids, in order.
    pub fn keys(&self) -> Vec<EpochKeyId> {
        self.entries().keys().cloned().collect()
    }
}

impl LocalKeyCache for MemoryLocalCache {
    fn get(&self, id: &EpochKeyId) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.entries().get(id).cloned())
    }

    fn put(&self, id: &EpochKeyId, bytes: &[u8]) -> Result<(), ServiceError> {
        self.entries().insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, id: &EpochKeyId) -> Result<(), ServiceError> {
        self.entries().remove(id);
        Ok(())
    }
}
