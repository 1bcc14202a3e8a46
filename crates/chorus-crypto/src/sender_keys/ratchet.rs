//! Sender Key ratchet for forward-secure message key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: Old chain keys are overwritten when advancing
//! - Key Uniqueness: Each iteration produces a unique message key
//! - Bounded Recovery: Reordered messages are recovered from a capped cache
//!   of skipped keys; gaps beyond the skip window are rejected up front

use std::cmp::Ordering;

use zeroize::Zeroize;

use super::{
    error::SenderKeyError,
    state::{KEY_SIZE, MessageKey, SenderKeyState, SymmetricKey},
};
use crate::{
    chain::ChainType,
    env::Environment,
    provider::CryptoProvider,
    wire::{CanonicalWriter, purposes},
};

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"CHAIN";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"MSG";

/// Default maximum number of iterations to skip when catching up.
/// This limits the work done when receiving out-of-order messages.
pub const MAX_SKIP: u32 = 1000;

/// Output of [`SenderKeyRatchet::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    /// AEAD ciphertext including the authentication tag
    pub ciphertext: Vec<u8>,
    /// Random nonce used for this message
    pub nonce: Vec<u8>,
    /// Ratchet iteration the message key was derived at
    pub iteration: u32,
}

/// Forward-secure sender key ratchet.
///
/// Owns no key material itself; every operation acts on a caller-provided
/// [`SenderKeyState`]. Each step:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key (forward secrecy)
///
/// All operations are synchronous and deterministic given the environment's
/// randomness.
#[derive(Clone)]
pub struct SenderKeyRatchet<P, E> {
    provider: P,
    env: E,
    max_skip: u32,
}

impl<P: CryptoProvider, E: Environment> SenderKeyRatchet<P, E> {
    /// Create a ratchet with the default skip window ([`MAX_SKIP`]).
    pub fn new(provider: P, env: E) -> Self {
        Self { provider, env, max_skip: MAX_SKIP }
    }

    /// Override the skip window (also the skipped-key cache capacity).
    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    /// Configured skip window.
    pub fn max_skip(&self) -> u32 {
        self.max_skip
    }

    /// Primitive suite this ratchet was built with.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Environment this ratchet draws randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Create a fresh local sender key state.
    ///
    /// Random chain key, random `key_id`, new signing keypair, iteration 0.
    pub fn create_sender_key_state(
        &self,
        sender_address: impl Into<String>,
        chain_type: ChainType,
    ) -> Result<SenderKeyState, SenderKeyError> {
        let key_id = self.env.random_u32();
        self.new_state(sender_address.into(), chain_type, key_id)
    }

    /// Create a replacement for a local state: same sender, fresh key
    /// material, and a `key_id` guaranteed to differ from `previous`.
    pub fn rotate_sender_key_state(
        &self,
        previous: &SenderKeyState,
    ) -> Result<SenderKeyState, SenderKeyError> {
        let mut key_id = self.env.random_u32();
        if key_id == previous.key_id() {
            key_id = key_id.wrapping_add(1);
        }
        self.new_state(previous.sender_address().to_string(), previous.sender_chain_type(), key_id)
    }

    fn new_state(
        &self,
        sender_address: String,
        chain_type: ChainType,
        key_id: u32,
    ) -> Result<SenderKeyState, SenderKeyError> {
        chain_type.validate_address(&sender_address)?;

        let chain_key = self.random_key();
        let signing_seed = self.random_key();
        let keypair = self.provider.signing_keypair_from_seed(signing_seed.as_bytes());

        tracing::trace!(key_id, %chain_type, "created sender key state");

        Ok(SenderKeyState::new(
            sender_address,
            chain_type,
            key_id,
            chain_key,
            keypair.public_key,
            Some(keypair.private_key),
            0,
        ))
    }

    /// Advance the ratchet one step.
    ///
    /// Returns the message key for the pre-advance iteration, then moves the
    /// state to the next chain key and iteration.
    pub fn ratchet_forward(&self, state: &mut SenderKeyState) -> Result<MessageKey, SenderKeyError> {
        let iteration = state.iteration();
        if iteration == u32::MAX {
            return Err(SenderKeyError::IterationOverflow { current: iteration });
        }

        let (message_key, next_chain_key) = self.step(state.chain_key());
        state.advance_to(next_chain_key, iteration + 1);

        Ok(MessageKey::new(message_key, iteration))
    }

    /// Encrypt `plaintext` with the next message key of `state`.
    ///
    /// Associated data binds the group, sender, key generation and
    /// iteration, so a ciphertext cannot be replayed into another context.
    pub fn encrypt(
        &self,
        state: &mut SenderKeyState,
        group_id: &str,
        plaintext: &[u8],
    ) -> Result<Ciphertext, SenderKeyError> {
        let message_key = self.ratchet_forward(state)?;

        let mut nonce = vec![0u8; self.provider.nonce_len()];
        self.env.random_bytes(&mut nonce);

        let aad = associated_data(
            group_id,
            state.sender_address(),
            state.key_id(),
            message_key.iteration(),
        );
        let ciphertext = self.provider.seal(message_key.key(), &nonce, &aad, plaintext)?;

        Ok(Ciphertext { ciphertext, nonce, iteration: message_key.iteration() })
    }

    /// Decrypt a message at `iteration` of `state`'s chain.
    ///
    /// - Past iterations consume a cached skipped key. A consumed key is
    ///   never put back, even if authentication fails.
    /// - The current iteration is derived directly.
    /// - Future iterations derive and cache every intermediate key, bounded
    ///   by the skip window.
    ///
    /// Forward derivations are staged and only committed to `state` once the
    /// AEAD tag verifies.
    ///
    /// # Errors
    ///
    /// - `DuplicateOrExpired`: iteration already consumed or evicted
    /// - `SkipWindowExceeded`: iteration too far ahead
    /// - `AuthenticationFailed`: tag mismatch (tamper, wrong key or context)
    pub fn decrypt(
        &self,
        state: &mut SenderKeyState,
        group_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        iteration: u32,
    ) -> Result<Vec<u8>, SenderKeyError> {
        if nonce.len() != self.provider.nonce_len() {
            return Err(SenderKeyError::InvalidNonceLength {
                expected: self.provider.nonce_len(),
                actual: nonce.len(),
            });
        }

        let aad = associated_data(group_id, state.sender_address(), state.key_id(), iteration);
        let current = state.iteration();

        match iteration.cmp(&current) {
            Ordering::Less => {
                let key = state
                    .take_cached_key(iteration)
                    .ok_or(SenderKeyError::DuplicateOrExpired { iteration, current })?;
                self.provider.open(key.as_bytes(), nonce, &aad, ciphertext)
            },
            Ordering::Equal | Ordering::Greater => {
                // iteration >= current, so this cannot underflow
                let skip = iteration - current;
                if skip > self.max_skip {
                    return Err(SenderKeyError::SkipWindowExceeded {
                        current,
                        requested: iteration,
                        max_skip: self.max_skip,
                    });
                }
                if iteration == u32::MAX {
                    return Err(SenderKeyError::IterationOverflow { current: iteration });
                }

                let mut chain_key = state.chain_key().clone();
                let mut skipped = Vec::with_capacity(skip as usize);
                for skipped_iteration in current..iteration {
                    let (message_key, next) = self.step(&chain_key);
                    skipped.push((skipped_iteration, message_key));
                    chain_key = next;
                }
                let (message_key, next_chain_key) = self.step(&chain_key);

                let plaintext = self.provider.open(message_key.as_bytes(), nonce, &aad, ciphertext)?;

                state.advance_to(next_chain_key, iteration + 1);
                let capacity = self.max_skip as usize;
                let evicted: usize = skipped
                    .into_iter()
                    .map(|(skipped_iteration, key)| {
                        state.cache_skipped_key(skipped_iteration, key, capacity)
                    })
                    .sum();

                if evicted > 0 {
                    tracing::trace!(evicted, "evicted skipped message keys");
                }

                Ok(plaintext)
            },
        }
    }

    fn random_key(&self) -> SymmetricKey {
        let mut bytes = [0u8; KEY_SIZE];
        self.env.random_bytes(&mut bytes);
        let key = SymmetricKey::new(bytes);
        bytes.zeroize();
        key
    }

    /// Derive (message key, next chain key) from a chain key.
    fn step(&self, chain_key: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
        let message_key = self.provider.derive(chain_key.as_bytes(), MESSAGE_LABEL);
        let next_chain_key = self.provider.derive(chain_key.as_bytes(), CHAIN_LABEL);
        (SymmetricKey::new(message_key), SymmetricKey::new(next_chain_key))
    }
}

/// AEAD associated data for a group message.
pub(crate) fn associated_data(
    group_id: &str,
    sender_address: &str,
    key_id: u32,
    iteration: u32,
) -> Vec<u8> {
    CanonicalWriter::new(purposes::GROUP_MESSAGE_AAD)
        .str(group_id)
        .str(sender_address)
        .u32(key_id)
        .u32(iteration)
        .finish()
}
