//! Chaotic key-issuance wrapper for fault injection testing
//!
//! Wraps any [`KeyIssuance`] and randomly fails calls with
//! `ServiceError::Unavailable`, to check that the resolution pipeline falls
//! through stage by stage and surfaces `KeyUnavailable` only when every
//! stage failed.

#![allow(clippy::disallowed_types, reason = "Locking fault schedule state")]

use std::sync::{Arc, Mutex};

use vetkeys_core::{
    ChannelId, GenerationId, GenerationMetadata, Identity, KeyIssuance, ServiceError,
};

/// Default fault schedule seed
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Issuance handle that fails a seeded fraction of its calls.
#[derive(Clone)]
pub struct ChaoticKeyIssuance<I: KeyIssuance> {
    inner: I,
    /// Probability in [0, 1] that a call fails
    failure_rate: f64,
    schedule: Arc<Mutex<FaultSchedule>>,
}

/// Seeded 32-bit LCG plus the number of calls it has judged.
struct FaultSchedule {
    state: u64,
    calls: usize,
}

impl FaultSchedule {
    const MULTIPLIER: u64 = 1_664_525;
    const INCREMENT: u64 = 1_013_904_223;
    const MODULUS: u64 = 1 << 32;

    /// Count one call; true if it should fail at `failure_rate`.
    fn judge(&mut self, failure_rate: f64) -> bool {
        self.calls += 1;
        self.state = Self::MULTIPLIER.wrapping_mul(self.state).wrapping_add(Self::INCREMENT)
            % Self::MODULUS;
        (self.state as f64) / (Self::MODULUS as f64) < failure_rate
    }
}

impl<I: KeyIssuance> ChaoticKeyIssuance<I> {
    /// Wrap `inner` with the default fault schedule.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is outside [0.0, 1.0]
    pub fn new(inner: I, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Wrap `inner`; equal seeds fail the same calls.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is outside [0.0, 1.0]
    pub fn with_seed(inner: I, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            schedule: Arc::new(Mutex::new(FaultSchedule { state: seed, calls: 0 })),
        }
    }

    /// Underlying issuance handle.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Calls made so far, failed ones included.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        self.schedule.lock().expect("Mutex poisoned").calls
    }

    #[allow(clippy::expect_used)]
    fn inject(&self) -> Result<(), ServiceError> {
        let fail = self.schedule.lock().expect("Mutex poisoned").judge(self.failure_rate);
        if fail {
            return Err(ServiceError::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }
}

impl<I: KeyIssuance> KeyIssuance for ChaoticKeyIssuance<I> {
    async fn public_key(&self, context: &[u8]) -> Result<Vec<u8>, ServiceError> {
        self.inject()?;
        self.inner.public_key(context).await
    }

    async fn encrypted_vetkey(
        &self,
        transport_public_key: &[u8],
        context: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        self.inject()?;
        self.inner.encrypted_vetkey(transport_public_key, context, input).await
    }

    async fn encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        self.inject()?;
        self.inner.encrypted_cache_blob(channel, generation).await
    }

    async fn put_encrypted_cache_blob(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        blob: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.inject()?;
        self.inner.put_encrypted_cache_blob(channel, generation, blob).await
    }

    async fn reshared_ibe_ciphertext(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<Vec<u8>, ServiceError> {
        self.inject()?;
        self.inner.reshared_ibe_ciphertext(channel, generation).await
    }

    async fn put_reshared_ibe_ciphertexts(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
        ciphertexts: Vec<(Identity, Vec<u8>)>,
    ) -> Result<(), ServiceError> {
        self.inject()?;
        self.inner.put_reshared_ibe_ciphertexts(channel, generation, ciphertexts).await
    }

    async fn generation_metadata(
        &self,
        channel: &ChannelId,
        generation: GenerationId,
    ) -> Result<GenerationMetadata, ServiceError> {
        self.inject()?;
        self.inner.generation_metadata(channel, generation).await
    }

    async fn latest_generation(
        &self,
        channel: &ChannelId,
    ) -> Result<GenerationMetadata, ServiceError> {
        self.inject()?;
        self.inner.latest_generation(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::SimKeyIssuance;

    fn handle() -> crate::issuance::CallerIssuance {
        SimKeyIssuance::with_seed(1).for_caller("alice".into())
    }

    #[tokio::test]
    async fn zero_rate_never_fails() {
        let chaotic = ChaoticKeyIssuance::new(handle(), 0.0);
        for _ in 0..20 {
            assert!(chaotic.public_key(&[]).await.is_ok());
        }
        assert_eq!(chaotic.operation_count(), 20);
    }

    #[tokio::test]
    async fn full_rate_always_fails() {
        let chaotic = ChaoticKeyIssuance::new(handle(), 1.0);
        let result = chaotic.public_key(&[]).await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert_eq!(chaotic.operation_count(), 1);
    }

    #[tokio::test]
    async fn same_seed_same_failures() {
        let a = ChaoticKeyIssuance::with_seed(handle(), 0.5, 42);
        let b = ChaoticKeyIssuance::with_seed(handle(), 0.5, 42);

        for _ in 0..50 {
            assert_eq!(a.public_key(&[]).await.is_ok(), b.public_key(&[]).await.is_ok());
        }
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_rate() {
        let _ = ChaoticKeyIssuance::new(handle(), 1.5);
    }
}
