//! Property-based tests for Sender Keys
//!
//! These tests verify the fundamental invariants of the sender keys system:
//!
//! 1. **Round-trip**: every message decrypts on a receiver bootstrapped from a
//!    distribution, in any delivery order within the skip window
//! 2. **Key uniqueness**: successive ratchet steps never repeat a key
//! 3. **Determinism**: the same seed produces the same keys and ciphertexts
//! 4. **Authenticity**: any modification of a signed field is detected before
//!    the ratchet moves

use std::collections::HashSet;

use chorus_crypto::{
    ChainType, GroupMessageBuilder, RustCryptoProvider, SenderKeyDistributionBuilder,
    SenderKeyError, SenderKeyRatchet, SenderKeyState,
};
use chorus_harness::SimEnv;
use proptest::prelude::*;

const ADDRESS: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
const GROUP: &str = "prop-group";

fn builders(
    seed: u64,
) -> (
    GroupMessageBuilder<RustCryptoProvider, SimEnv>,
    SenderKeyDistributionBuilder<RustCryptoProvider, SimEnv>,
) {
    let env = SimEnv::with_seed(seed);
    let provider = RustCryptoProvider::new();
    (
        GroupMessageBuilder::new(SenderKeyRatchet::new(provider, env.clone())),
        SenderKeyDistributionBuilder::new(provider, env),
    )
}

/// Fresh sender state plus a receiver bootstrapped from its distribution.
fn sender_and_receiver(
    seed: u64,
) -> (GroupMessageBuilder<RustCryptoProvider, SimEnv>, SenderKeyState, SenderKeyState) {
    let (messages, distributions) = builders(seed);
    let sender = messages.ratchet().create_sender_key_state(ADDRESS, ChainType::Evm).unwrap();
    let distribution = distributions.create_distribution(GROUP, &sender).unwrap();
    let receiver = distributions.create_sender_key_state_from_distribution(&distribution).unwrap();
    (messages, sender, receiver)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_delivery_order_decrypts(
        seed in any::<u64>(),
        plaintexts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12),
        order in any::<u64>(),
    ) {
        let (messages, mut sender, mut receiver) = sender_and_receiver(seed);

        let mut envelopes: Vec<_> = plaintexts
            .iter()
            .map(|p| messages.build_message(GROUP, p, &mut sender).unwrap())
            .collect();

        // Deterministic shuffle driven by the generated value
        let len = envelopes.len();
        let mut state = order;
        for i in (1..len).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = (state % (i as u64 + 1)) as usize;
            envelopes.swap(i, j);
        }

        for envelope in &envelopes {
            let plaintext = messages.decrypt_message(envelope, &mut receiver).unwrap();
            prop_assert_eq!(&plaintext, &plaintexts[envelope.iteration as usize]);
        }

        prop_assert_eq!(receiver.cached_key_count(), 0);
        prop_assert_eq!(receiver.iteration(), sender.iteration());
    }

    #[test]
    fn prop_ratchet_keys_never_repeat(seed in any::<u64>(), steps in 1usize..200) {
        let (messages, mut sender, _) = sender_and_receiver(seed);

        let mut seen = HashSet::new();
        for expected in 0..steps {
            let key = messages.ratchet().ratchet_forward(&mut sender).unwrap();
            prop_assert_eq!(key.iteration() as usize, expected);
            prop_assert!(seen.insert(*key.key()), "message key repeated at {}", expected);
        }
        prop_assert_eq!(sender.iteration() as usize, steps);
    }

    #[test]
    fn prop_same_seed_same_transcript(seed in any::<u64>(), plaintext in prop::collection::vec(any::<u8>(), 0..128)) {
        let (messages_a, mut sender_a, _) = sender_and_receiver(seed);
        let (messages_b, mut sender_b, _) = sender_and_receiver(seed);

        let a = messages_a.build_message(GROUP, &plaintext, &mut sender_a).unwrap();
        let b = messages_b.build_message(GROUP, &plaintext, &mut sender_b).unwrap();

        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_tampered_envelope_never_mutates_receiver(
        seed in any::<u64>(),
        byte in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let (messages, mut sender, mut receiver) = sender_and_receiver(seed);
        let mut envelope = messages.build_message(GROUP, b"payload", &mut sender).unwrap();

        let index = byte.index(envelope.ciphertext.len());
        envelope.ciphertext[index] ^= flip;

        let result = messages.decrypt_message(&envelope, &mut receiver);
        prop_assert_eq!(result, Err(SenderKeyError::InvalidSignature));
        prop_assert_eq!(receiver.iteration(), 0);
        prop_assert_eq!(receiver.cached_key_count(), 0);
    }

    #[test]
    fn prop_gap_beyond_window_is_refused(seed in any::<u64>(), max_skip in 0u32..16, extra in 1u32..8) {
        let env = SimEnv::with_seed(seed);
        let ratchet = SenderKeyRatchet::new(RustCryptoProvider::new(), env).with_max_skip(max_skip);
        let mut sender = ratchet.create_sender_key_state(ADDRESS, ChainType::Evm).unwrap();
        let distributions = SenderKeyDistributionBuilder::new(RustCryptoProvider::new(), SimEnv::with_seed(seed));
        let distribution = distributions.create_distribution(GROUP, &sender).unwrap();
        let mut receiver = distributions.create_sender_key_state_from_distribution(&distribution).unwrap();

        let target = max_skip + extra;
        let mut last = None;
        for _ in 0..=target {
            last = Some(ratchet.encrypt(&mut sender, GROUP, b"x").unwrap());
        }
        let last = last.unwrap();
        prop_assert_eq!(last.iteration, target);

        let result = ratchet.decrypt(&mut receiver, GROUP, &last.ciphertext, &last.nonce, last.iteration);
        let refused = matches!(result, Err(SenderKeyError::SkipWindowExceeded { .. }));
        prop_assert!(refused);
        prop_assert_eq!(receiver.iteration(), 0);
        prop_assert_eq!(receiver.cached_key_count(), 0);
    }
}
