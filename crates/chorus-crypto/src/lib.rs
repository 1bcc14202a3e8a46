//! Chorus Cryptographic Core
//!
//! Sender Keys for end-to-end encrypted group messaging between
//! blockchain-address identities. Every member runs a forward-secure
//! symmetric ratchet, distributes its chain key to peers once, and then
//! encrypts each group message a single time for all recipients.
//!
//! # Key Lifecycle
//!
//! ```text
//! create_sender_key_state ──► SenderKeyState (private)
//!        │
//!        ▼
//! create_distribution ──► DistributionMessage (signed, broadcast)
//!        │
//!        ▼
//! peer: create_sender_key_state_from_distribution ──► SenderKeyState (public)
//!        │
//!        ▼
//! build_message / decrypt_message ──► GroupMessageEnvelope
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement: old chain keys are zeroized after deriving the next
//! - Message keys are used once; skipped keys are consumed on first use
//!
//! Authenticity:
//! - Distributions and envelopes are Ed25519-signed over canonical payloads
//! - Envelope signatures are checked before any ratchet state changes
//! - AEAD associated data binds group, sender, key generation and iteration
//!
//! Bounded Work:
//! - Catching up more than `max_skip` iterations is refused outright
//! - The skipped-key cache never holds more than `max_skip` entries
//!
//! # Determinism
//!
//! Primitives come from an injected [`CryptoProvider`] and all randomness and
//! time from an injected [`Environment`], so simulations can replay a whole
//! group conversation from a seed.

#![forbid(unsafe_code)]

pub mod chain;
pub mod env;
pub mod provider;
pub mod sender_keys;
pub mod wire;

pub use chain::ChainType;
pub use env::{Environment, SystemEnv};
pub use provider::{CryptoProvider, RustCryptoProvider, SigningKeyPair};
pub use sender_keys::{
    Ciphertext, DistributionMessage, GroupMessageBuilder, GroupMessageEnvelope, KEY_SIZE, MAX_SKIP,
    MessageKey, SecretBytes, SenderKeyDistributionBuilder, SenderKeyError, SenderKeyRatchet,
    SenderKeyState, SymmetricKey,
};
pub use wire::{CanonicalWriter, WireError};
