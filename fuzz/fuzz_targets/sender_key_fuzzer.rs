//! Fuzz target for the Sender Keys ratchet and builders
//!
//! Drives one sender and one receiver through arbitrary send, delivery,
//! replay and tamper sequences, and feeds arbitrary text to the JSON
//! decoders.
//!
//! # Strategy
//!
//! - Small skip windows so gaps, evictions and window overflows all occur
//! - Out-of-order and repeated delivery of sent envelopes
//! - Single-byte corruption of ciphertext, nonce and signature
//! - Re-bootstrapping the receiver from a mid-chain distribution
//! - Arbitrary text into `GroupMessageEnvelope::from_json` and
//!   `DistributionMessage::from_json`
//!
//! # Invariants
//!
//! - Nothing panics
//! - A successful decrypt returns exactly the sent plaintext
//! - An envelope decrypts at most once per receiver state
//! - A corrupted envelope never decrypts and never moves the ratchet
//! - The skipped-key cache never exceeds the skip window
//! - A fresh distribution always verifies

#![no_main]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arbitrary::Arbitrary;
use chorus_crypto::{
    ChainType, DistributionMessage, Environment, GroupMessageBuilder, GroupMessageEnvelope,
    RustCryptoProvider, SenderKeyDistributionBuilder, SenderKeyRatchet,
};
use libfuzzer_sys::fuzz_target;

const ADDRESS: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
const GROUP: &str = "fuzz-group";

/// Splitmix64 stream; reproducible from the scenario seed.
#[derive(Clone)]
struct FuzzEnv {
    state: Arc<AtomicU64>,
}

impl FuzzEnv {
    fn new(seed: u64) -> Self {
        Self { state: Arc::new(AtomicU64::new(seed)) }
    }

    fn next(&self) -> u64 {
        let mut z = self
            .state
            .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
            .wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl Environment for FuzzEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let bytes = self.next().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn wall_clock_millis(&self) -> u64 {
        1_704_067_200_000
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    /// Skip window (kept small)
    max_skip: u8,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Encrypt and queue a message
    Send { message: Vec<u8> },
    /// Deliver a previously sent envelope
    Deliver { index: u16 },
    /// Deliver a corrupted copy of a sent envelope
    Tamper { index: u16, field: TamperField, position: u16, flip: u8 },
    /// Replace the receiver with one bootstrapped from a fresh distribution
    Redistribute,
    /// Decode arbitrary text as an envelope
    ParseEnvelope { json: String },
    /// Decode arbitrary text as a distribution
    ParseDistribution { json: String },
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum TamperField {
    Ciphertext,
    Nonce,
    Signature,
}

struct Sent {
    envelope: GroupMessageEnvelope,
    plaintext: Vec<u8>,
    delivered: bool,
}

fuzz_target!(|scenario: Scenario| {
    let env = FuzzEnv::new(scenario.seed);
    let provider = RustCryptoProvider::new();
    let max_skip = u32::from(scenario.max_skip % 32);

    let ratchet = SenderKeyRatchet::new(provider, env.clone()).with_max_skip(max_skip);
    let messages = GroupMessageBuilder::new(ratchet.clone());
    let distributions = SenderKeyDistributionBuilder::new(provider, env);

    let Ok(mut sender) = ratchet.create_sender_key_state(ADDRESS, ChainType::Evm) else {
        panic!("valid address rejected");
    };
    let Ok(distribution) = distributions.create_distribution(GROUP, &sender) else {
        panic!("private state cannot distribute");
    };
    assert!(distributions.verify_distribution(&distribution));
    let Ok(mut receiver) = distributions.create_sender_key_state_from_distribution(&distribution)
    else {
        panic!("fresh distribution rejected");
    };

    let mut sent: Vec<Sent> = Vec::new();

    for op in scenario.operations {
        match op {
            Operation::Send { message } => {
                if let Ok(envelope) = messages.build_message(GROUP, &message, &mut sender) {
                    sent.push(Sent { envelope, plaintext: message, delivered: false });
                }
            },

            Operation::Deliver { index } => {
                if sent.is_empty() {
                    continue;
                }
                let entry = &mut sent[usize::from(index) % sent.len()];
                let result = messages.decrypt_message(&entry.envelope, &mut receiver);

                if let Ok(plaintext) = result {
                    assert_eq!(plaintext, entry.plaintext, "decrypted wrong plaintext");
                    assert!(!entry.delivered, "envelope decrypted twice");
                    entry.delivered = true;
                }
                assert!(receiver.cached_key_count() <= max_skip as usize, "cache exceeds window");
            },

            Operation::Tamper { index, field, position, flip } => {
                if sent.is_empty() || flip == 0 {
                    continue;
                }
                let mut forged = sent[usize::from(index) % sent.len()].envelope.clone();
                let bytes = match field {
                    TamperField::Ciphertext => &mut forged.ciphertext,
                    TamperField::Nonce => &mut forged.nonce,
                    TamperField::Signature => &mut forged.signature,
                };
                let position = usize::from(position) % bytes.len();
                bytes[position] ^= flip;

                let iteration = receiver.iteration();
                let cached = receiver.cached_key_count();
                assert!(messages.decrypt_message(&forged, &mut receiver).is_err());
                assert_eq!(receiver.iteration(), iteration, "forgery moved the ratchet");
                assert_eq!(receiver.cached_key_count(), cached, "forgery touched the cache");
            },

            Operation::Redistribute => {
                let Ok(distribution) = distributions.create_distribution(GROUP, &sender) else {
                    panic!("private state cannot distribute");
                };
                assert!(distributions.verify_distribution(&distribution));
                if let Ok(state) =
                    distributions.create_sender_key_state_from_distribution(&distribution)
                {
                    assert!(state.is_public_only());
                    assert_eq!(state.iteration(), sender.iteration());
                    receiver = state;
                    for entry in &mut sent {
                        entry.delivered |= entry.envelope.iteration < receiver.iteration();
                    }
                }
            },

            Operation::ParseEnvelope { json } => {
                if let Ok(envelope) = GroupMessageEnvelope::from_json(&json) {
                    let iteration = receiver.iteration();
                    if messages.decrypt_message(&envelope, &mut receiver).is_err() {
                        assert_eq!(receiver.iteration(), iteration);
                    }
                }
            },

            Operation::ParseDistribution { json } => {
                if let Ok(parsed) = DistributionMessage::from_json(&json) {
                    if distributions.verify_distribution(&parsed) {
                        let _ = distributions.create_sender_key_state_from_distribution(&parsed);
                    }
                }
            },
        }
    }
});
