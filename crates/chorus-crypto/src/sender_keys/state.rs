//! Sender key state and key material types.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{chain::ChainType, wire::base64_bytes};

/// Size of chain keys and message keys (32 bytes)
pub const KEY_SIZE: usize = 32;

/// 32 bytes of secret symmetric key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SymmetricKey {
    type Error = super::SenderKeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            super::SenderKeyError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(key))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Zeroizing::new(base64_bytes::deserialize(deserializer)?);
        Self::try_from(bytes.as_slice()).map_err(D::Error::custom)
    }
}

/// Variable-length secret bytes (private signing keys, chain key snapshots),
/// zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

impl Serialize for SecretBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        base64_bytes::deserialize(deserializer).map(Self)
    }
}

/// A message key derived from the ratchet.
///
/// This key is used for a single message encryption/decryption.
/// It should be used immediately and then discarded.
#[derive(Clone)]
pub struct MessageKey {
    key: SymmetricKey,
    iteration: u32,
}

impl MessageKey {
    pub(crate) fn new(key: SymmetricKey, iteration: u32) -> Self {
        Self { key, iteration }
    }

    /// 32-byte symmetric key for the AEAD.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        self.key.as_bytes()
    }

    /// Ratchet iteration this key was derived at.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKey").field("iteration", &self.iteration).finish_non_exhaustive()
    }
}

/// One sender's ratchet position within a group.
///
/// A local ("my") state carries the private signing key; a peer state rebuilt
/// from a distribution is public-only.
///
/// # Invariants
///
/// - `iteration` never decreases
/// - `chain_key` is the input for `iteration`; earlier chain keys are gone
/// - `message_keys` only holds iterations below `iteration`
/// - Mutated by one flow at a time (enforced by `&mut` access)
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderKeyState {
    sender_address: String,
    sender_chain_type: ChainType,
    key_id: u32,
    chain_key: SymmetricKey,
    #[serde(with = "base64_bytes")]
    public_signing_key: Vec<u8>,
    private_signing_key: Option<SecretBytes>,
    iteration: u32,
    message_keys: BTreeMap<u32, SymmetricKey>,
}

impl SenderKeyState {
    pub(crate) fn new(
        sender_address: String,
        sender_chain_type: ChainType,
        key_id: u32,
        chain_key: SymmetricKey,
        public_signing_key: Vec<u8>,
        private_signing_key: Option<SecretBytes>,
        iteration: u32,
    ) -> Self {
        Self {
            sender_address,
            sender_chain_type,
            key_id,
            chain_key,
            public_signing_key,
            private_signing_key,
            iteration,
            message_keys: BTreeMap::new(),
        }
    }

    /// Address of the sender owning this chain.
    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    /// Chain family of the sender address.
    pub fn sender_chain_type(&self) -> ChainType {
        self.sender_chain_type
    }

    /// Identifier of this key generation.
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Next iteration the ratchet will produce.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Encoded public verification key.
    pub fn public_signing_key(&self) -> &[u8] {
        &self.public_signing_key
    }

    /// Encoded private signing key, if this is a local state.
    pub fn private_signing_key(&self) -> Option<&[u8]> {
        self.private_signing_key.as_ref().map(SecretBytes::as_bytes)
    }

    /// True if this state cannot sign (reconstructed from a distribution).
    pub fn is_public_only(&self) -> bool {
        self.private_signing_key.is_none()
    }

    /// Number of skipped message keys waiting for reordered messages.
    pub fn cached_key_count(&self) -> usize {
        self.message_keys.len()
    }

    /// True if a skipped key for `iteration` is cached.
    pub fn has_cached_key(&self, iteration: u32) -> bool {
        self.message_keys.contains_key(&iteration)
    }

    pub(crate) fn chain_key(&self) -> &SymmetricKey {
        &self.chain_key
    }

    /// Replace the chain key and move to the next iteration.
    ///
    /// The previous chain key is zeroized when it is dropped here.
    pub(crate) fn advance_to(&mut self, chain_key: SymmetricKey, iteration: u32) {
        debug_assert!(iteration > self.iteration);
        self.chain_key = chain_key;
        self.iteration = iteration;
    }

    pub(crate) fn take_cached_key(&mut self, iteration: u32) -> Option<SymmetricKey> {
        self.message_keys.remove(&iteration)
    }

    /// Cache a skipped key, evicting the oldest entries beyond `capacity`.
    ///
    /// Returns the number of evicted keys.
    pub(crate) fn cache_skipped_key(
        &mut self,
        iteration: u32,
        key: SymmetricKey,
        capacity: usize,
    ) -> usize {
        debug_assert!(iteration < self.iteration);
        self.message_keys.insert(iteration, key);

        let mut evicted = 0;
        while self.message_keys.len() > capacity {
            self.message_keys.pop_first();
            evicted += 1;
        }
        evicted
    }
}

impl fmt::Debug for SenderKeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyState")
            .field("sender_address", &self.sender_address)
            .field("sender_chain_type", &self.sender_chain_type)
            .field("key_id", &self.key_id)
            .field("iteration", &self.iteration)
            .field("public_only", &self.is_public_only())
            .field("cached_keys", &self.message_keys.len())
            .finish_non_exhaustive()
    }
}
