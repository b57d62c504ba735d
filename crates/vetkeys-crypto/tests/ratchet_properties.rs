//! Property-based tests for the epoch-key ratchet
//!
//! 1. **Forward-only**: `evolve_to` reaches exactly the target and refuses to
//!    move back
//! 2. **Peek purity**: peeking never changes the committed state
//! 3. **Path independence**: any sequence of forward moves to the same epoch
//!    yields the same key
//! 4. **Convergence**: parties sharing a root key decrypt each other's
//!    messages at any epoch they can still reach

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use vetkeys_crypto::{CryptoError, EpochSchedule, RatchetState, derive_root_key};

const ROTATION_MS: u64 = 60_000;

fn schedule(creation: u64) -> EpochSchedule {
    EpochSchedule::new(creation, ROTATION_MS, 10 * ROTATION_MS).unwrap()
}

fn root(vetkey_bytes: &[u8]) -> RatchetState {
    RatchetState::from_root_key(*derive_root_key(vetkey_bytes), schedule(0))
}

fn key_of(state: &RatchetState) -> Vec<u8> {
    state.to_cache_bytes()[..32].to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_evolve_to_reaches_target(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        start in 0u64..50,
        extra in 0u64..50,
    ) {
        let mut state = root(&vetkey);
        state.evolve_to(start).unwrap();
        state.evolve_to(start + extra).unwrap();
        prop_assert_eq!(state.epoch(), start + extra);
    }

    #[test]
    fn prop_evolve_backwards_fails(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        start in 1u64..50,
    ) {
        let mut state = root(&vetkey);
        state.evolve_to(start).unwrap();
        let before = key_of(&state);

        let err = state.evolve_to(start - 1).unwrap_err();
        prop_assert_eq!(
            err,
            CryptoError::InvalidTransition { current: start, requested: start - 1 }
        );
        prop_assert_eq!(state.epoch(), start);
        prop_assert_eq!(key_of(&state), before);
    }

    #[test]
    fn prop_peek_does_not_mutate(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        target in 1u64..100,
    ) {
        let state = root(&vetkey);
        let before = key_of(&state);

        let peeked = state.peek_at_epoch(target).unwrap();
        prop_assert_eq!(peeked.epoch(), target);
        prop_assert_eq!(state.epoch(), 0);
        prop_assert_eq!(key_of(&state), before);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_path_independent(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        steps in prop::collection::vec(0u64..5, 1..10),
    ) {
        let target: u64 = steps.iter().sum();

        let mut stepwise = root(&vetkey);
        let mut reached = 0;
        for step in &steps {
            reached += step;
            stepwise.evolve_to(reached).unwrap();
        }

        let direct = root(&vetkey).peek_at_epoch(target).unwrap();
        prop_assert_eq!(key_of(&stepwise), key_of(&direct));
    }

    #[test]
    fn prop_epoch_keys_unique(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        count in 2u64..20,
    ) {
        let mut state = root(&vetkey);
        let mut keys = vec![key_of(&state)];
        for _ in 1..count {
            state.evolve().unwrap();
            keys.push(key_of(&state));
        }

        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                prop_assert_ne!(&keys[i], &keys[j], "epochs {} and {} share a key", i, j);
            }
        }
    }

    #[test]
    fn prop_expected_epoch_is_floor(
        creation in 0u64..1_000_000_000,
        elapsed in 0u64..1_000_000_000,
    ) {
        let state = RatchetState::from_root_key([1u8; 32], schedule(creation));
        let expected = elapsed / ROTATION_MS;
        prop_assert_eq!(state.expected_epoch_at(creation + elapsed).unwrap(), expected);
        if creation > 0 {
            let is_invalid_time = matches!(
                state.expected_epoch_at(creation - 1),
                Err(CryptoError::InvalidTime { .. })
            );
            prop_assert!(is_invalid_time);
        }
    }

    #[test]
    fn prop_parties_converge(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        sender_epoch in 0u64..30,
        receiver_epoch in 0u64..30,
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        message_id in any::<u64>(),
    ) {
        let mut sender = root(&vetkey);
        let mut receiver = root(&vetkey);
        sender.evolve_to(sender_epoch).unwrap();
        receiver.evolve_to(receiver_epoch).unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(message_id);
        let blob = sender
            .encrypt_at_epoch(sender_epoch, b"alice", message_id, &plaintext, &mut rng)
            .unwrap();

        let result = receiver.decrypt_at_epoch(sender_epoch, b"alice", message_id, &blob);
        if receiver_epoch <= sender_epoch {
            prop_assert_eq!(result.unwrap(), plaintext);
        } else {
            // Forward-only: the receiver can no longer derive that epoch
            let is_transition = matches!(result, Err(CryptoError::InvalidTransition { .. }));
            prop_assert!(is_transition);
        }
    }

    #[test]
    fn prop_cache_roundtrip(
        vetkey in prop::collection::vec(any::<u8>(), 48..=48),
        epoch in 0u64..100,
        recovery in any::<u64>(),
    ) {
        let mut state = root(&vetkey);
        state.evolve_to(epoch).unwrap();
        state.set_recovery_window(recovery);

        let restored = RatchetState::from_cache_bytes(state.to_cache_bytes().as_ref()).unwrap();
        prop_assert_eq!(restored.epoch(), epoch);
        prop_assert_eq!(restored.schedule().recovery_ms, recovery);
        prop_assert_eq!(key_of(&restored), key_of(&state));
    }
}

#[test]
fn scenario_receiver_catches_up_to_declared_epoch() {
    let vetkey = [0x42u8; 48];
    let mut alice = root(&vetkey);
    let mut bob = root(&vetkey);

    alice.evolve_to(5).unwrap();
    let blob = alice
        .encrypt_at_epoch(5, b"alice", 1, b"hello bob", &mut ChaCha20Rng::seed_from_u64(0))
        .unwrap();

    assert_eq!(bob.epoch(), 0);
    bob.evolve_to(5).unwrap();
    assert_eq!(bob.decrypt_at_epoch(5, b"alice", 1, &blob).unwrap(), b"hello bob");
}
