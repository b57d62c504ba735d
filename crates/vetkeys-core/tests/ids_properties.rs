//! Property-based tests for identifier encodings
//!
//! 1. **Injectivity**: distinct channels never share an encoding, so derived
//!    contexts never collide
//! 2. **Symmetry**: a direct channel is the same regardless of argument order

use proptest::prelude::*;
use vetkeys_core::{ChannelId, DerivationContexts, GenerationId, Identity};

fn identity() -> impl Strategy<Value = Identity> {
    prop::collection::vec(any::<u8>(), 0..16).prop_map(Identity::new)
}

fn channel() -> impl Strategy<Value = ChannelId> {
    prop_oneof![
        (identity(), identity()).prop_map(|(a, b)| ChannelId::direct(a, b)),
        any::<u64>().prop_map(ChannelId::group),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_channel_encoding_injective(a in channel(), b in channel()) {
        prop_assert_eq!(a == b, a.to_bytes() == b.to_bytes());
    }

    #[test]
    fn prop_direct_channel_symmetric(a in identity(), b in identity()) {
        prop_assert_eq!(
            ChannelId::direct(a.clone(), b.clone()),
            ChannelId::direct(b, a)
        );
    }

    #[test]
    fn prop_channel_contexts_injective(
        a in channel(),
        b in channel(),
        ga in any::<u64>(),
        gb in any::<u64>(),
    ) {
        let contexts = DerivationContexts::default();
        let same = a == b && ga == gb;
        let ctx_a = contexts.channel(&a, GenerationId(ga));
        let ctx_b = contexts.channel(&b, GenerationId(gb));
        prop_assert_eq!(same, ctx_a == ctx_b);
    }
}
