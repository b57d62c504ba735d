//! Fuzz target for the cached ratchet state format
//!
//! # Invariants
//!
//! - Parsing never panics
//! - Anything that parses is exactly 64 bytes, has a nonzero rotation and
//!   re-serializes to the same bytes

#![no_main]

use libfuzzer_sys::fuzz_target;
use vetkeys_crypto::{CACHE_BYTES, RatchetState};

fuzz_target!(|data: &[u8]| {
    let Ok(state) = RatchetState::from_cache_bytes(data) else {
        return;
    };

    assert_eq!(data.len(), CACHE_BYTES);
    assert_ne!(state.schedule().rotation_ms, 0, "zero rotation must be rejected");
    assert_eq!(&state.to_cache_bytes()[..], data, "cache form must roundtrip");
});
