//! Fuzz target for the epoch-key ratchet
//!
//! # Strategy
//!
//! - Arbitrary root keys and schedules (rotation clamped to nonzero)
//! - Random sequences of evolve, evolve_to, peek, evolve_if_needed,
//!   encryption at chosen epochs and cache roundtrips
//! - Jumps are clamped so a run stays fast
//!
//! # Invariants
//!
//! - The committed epoch never decreases
//! - evolve_to(n) equals n single evolutions
//! - Peeking never changes the state
//! - Messages at or after the committed epoch decrypt; earlier ones are
//!   rejected with `InvalidTransition`
//! - The cache form roundtrips

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use vetkeys_crypto::{CryptoError, EpochSchedule, RatchetState};

#[derive(Debug, Arbitrary)]
struct RatchetScenario {
    root_key: [u8; 32],
    creation_time_ms: u32,
    rotation_ms: u16,
    recovery_ms: u32,
    operations: Vec<RatchetOperation>,
}

#[derive(Debug, Arbitrary)]
enum RatchetOperation {
    Evolve,
    EvolveTo { ahead: u8 },
    /// Commit to an epoch that may be behind the current one
    EvolveBack { behind: u8 },
    Peek { ahead: u8 },
    EvolveIfNeeded { reference_ms: u32 },
    Encrypt { ahead: u8, message_id: u64, message: Vec<u8> },
    DecryptOld { message: Vec<u8> },
    CacheRoundtrip,
}

fuzz_target!(|scenario: RatchetScenario| {
    let Ok(schedule) = EpochSchedule::new(
        u64::from(scenario.creation_time_ms),
        u64::from(scenario.rotation_ms.max(1)),
        u64::from(scenario.recovery_ms),
    ) else {
        return;
    };
    let mut state = RatchetState::from_root_key(scenario.root_key, schedule);
    let mut rng = ChaCha20Rng::from_seed(scenario.root_key);
    let sender = b"fuzzer";

    for op in scenario.operations {
        let before = state.epoch();
        match op {
            RatchetOperation::Evolve => {
                state.evolve().expect("single step from a small epoch");
                assert_eq!(state.epoch(), before + 1);
            },

            RatchetOperation::EvolveTo { ahead } => {
                let target = before + u64::from(ahead);
                let mut stepped = state.clone();
                for _ in 0..ahead {
                    stepped.evolve().expect("single step");
                }

                state.evolve_to(target).expect("forward jump within the skip limit");
                assert_eq!(state.epoch(), target);
                assert_eq!(
                    &state.to_cache_bytes()[..],
                    &stepped.to_cache_bytes()[..],
                    "evolve_to must equal repeated evolve"
                );
            },

            RatchetOperation::EvolveBack { behind } => {
                if behind > 0 && before >= u64::from(behind) {
                    let result = state.evolve_to(before - u64::from(behind));
                    assert!(matches!(result, Err(CryptoError::InvalidTransition { .. })));
                    assert_eq!(state.epoch(), before, "rejected transition must not move");
                }
            },

            RatchetOperation::Peek { ahead } => {
                let snapshot = state.to_cache_bytes();
                let peeked = state.peek_at_epoch(before + u64::from(ahead)).expect("peek ahead");
                assert_eq!(peeked.epoch(), before + u64::from(ahead));
                assert_eq!(&state.to_cache_bytes()[..], &snapshot[..], "peek must not mutate");
            },

            RatchetOperation::EvolveIfNeeded { reference_ms } => {
                // Large gaps would exceed the step budget of a fuzz run
                let reference_ms = u64::from(reference_ms);
                let bounded = state
                    .expected_epoch_at(reference_ms)
                    .map_or(true, |expected| expected <= before + 4096);
                if bounded {
                    let steps = state.evolve_if_needed(reference_ms).expect("bounded catch-up");
                    assert_eq!(state.epoch(), before + steps);
                }
            },

            RatchetOperation::Encrypt { ahead, message_id, message } => {
                let epoch = before + u64::from(ahead);
                let ciphertext = state
                    .encrypt_at_epoch(epoch, sender, message_id, &message, &mut rng)
                    .expect("encrypt ahead");
                let decrypted = state
                    .decrypt_at_epoch(epoch, sender, message_id, &ciphertext)
                    .expect("decrypt ahead");
                assert_eq!(decrypted, message);

                let mut committed = state.clone();
                committed.evolve_to(epoch).expect("commit");
                let decrypted = committed
                    .decrypt_at_epoch(epoch, sender, message_id, &ciphertext)
                    .expect("decrypt at committed epoch");
                assert_eq!(decrypted, message);

                assert!(
                    state.decrypt_at_epoch(epoch, sender, message_id ^ 1, &ciphertext).is_err(),
                    "message id must be bound"
                );
            },

            RatchetOperation::DecryptOld { message } => {
                if before > 0 {
                    let mut fresh = RatchetState::from_root_key(scenario.root_key, schedule);
                    fresh.evolve_to(before - 1).expect("replay");
                    let ciphertext = fresh
                        .encrypt_at_epoch(before - 1, sender, 0, &message, &mut rng)
                        .expect("encrypt old");
                    let result = state.decrypt_at_epoch(before - 1, sender, 0, &ciphertext);
                    assert!(matches!(result, Err(CryptoError::InvalidTransition { .. })));
                }
            },

            RatchetOperation::CacheRoundtrip => {
                let bytes = state.to_cache_bytes();
                let restored = RatchetState::from_cache_bytes(&bytes[..]).expect("roundtrip");
                assert_eq!(&restored.to_cache_bytes()[..], &bytes[..]);
                state = restored;
            },
        }

        // INVARIANT 1: Monotonic epoch
        assert!(state.epoch() >= before, "epoch must never decrease");
    }
});
