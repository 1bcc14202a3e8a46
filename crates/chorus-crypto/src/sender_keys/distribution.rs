//! Signed sender key distribution.
//!
//! A distribution message is how a sender bootstraps peers onto its chain: it
//! snapshots the chain key at the sender's *current* iteration, so a late
//! joiner can read everything sent from that point on but nothing before it.
//! The whole payload is signed with the sender's signing key.

use serde::{Deserialize, Serialize};

use super::{
    error::SenderKeyError,
    state::{SecretBytes, SenderKeyState, SymmetricKey},
};
use crate::{
    chain::ChainType,
    env::Environment,
    provider::CryptoProvider,
    wire::{CanonicalWriter, WireError, base64_bytes, purposes},
};

/// Signed bootstrap payload conveying a sender's chain key and verification
/// key to group peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionMessage {
    /// Group the sender key belongs to
    pub group_id: String,
    /// Sender address
    pub sender_address: String,
    /// Chain family of the sender address
    pub sender_chain_type: ChainType,
    /// Key generation identifier
    pub key_id: u32,
    /// Ratchet iteration the chain key snapshot corresponds to
    pub iteration: u32,
    /// Chain key snapshot (secret)
    pub chain_key: SecretBytes,
    /// Sender's public verification key
    #[serde(with = "base64_bytes")]
    pub public_signing_key: Vec<u8>,
    /// Signature over the canonical payload
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Creation time (Unix millis)
    pub timestamp: u64,
}

impl DistributionMessage {
    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        CanonicalWriter::new(purposes::SENDER_KEY_DISTRIBUTION)
            .str(&self.group_id)
            .str(&self.sender_address)
            .str(self.sender_chain_type.as_str())
            .u32(self.key_id)
            .u32(self.iteration)
            .bytes(self.chain_key.as_bytes())
            .bytes(&self.public_signing_key)
            .u64(self.timestamp)
            .finish()
    }

    /// Serialize for transport.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from transport, validating the sender address for its chain
    /// type. The signature is NOT checked here.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let message: Self = serde_json::from_str(json)?;

        if message.group_id.is_empty() {
            return Err(WireError::InvalidField {
                field: "groupId",
                reason: "must not be empty".to_string(),
            });
        }
        message.sender_chain_type.validate_address(&message.sender_address).map_err(|e| {
            WireError::InvalidField { field: "senderAddress", reason: e.to_string() }
        })?;

        Ok(message)
    }
}

/// Builds and verifies [`DistributionMessage`]s.
#[derive(Clone)]
pub struct SenderKeyDistributionBuilder<P, E> {
    provider: P,
    env: E,
}

impl<P: CryptoProvider, E: Environment> SenderKeyDistributionBuilder<P, E> {
    /// Create a builder over the given primitive suite and environment.
    pub fn new(provider: P, env: E) -> Self {
        Self { provider, env }
    }

    /// Snapshot `state` at its current iteration and sign it.
    ///
    /// # Errors
    ///
    /// - `MissingPrivateKey` if `state` is public-only
    pub fn create_distribution(
        &self,
        group_id: &str,
        state: &SenderKeyState,
    ) -> Result<DistributionMessage, SenderKeyError> {
        let private_key = state.private_signing_key().ok_or(SenderKeyError::MissingPrivateKey)?;

        let mut message = DistributionMessage {
            group_id: group_id.to_string(),
            sender_address: state.sender_address().to_string(),
            sender_chain_type: state.sender_chain_type(),
            key_id: state.key_id(),
            iteration: state.iteration(),
            chain_key: SecretBytes::new(state.chain_key().as_bytes().to_vec()),
            public_signing_key: state.public_signing_key().to_vec(),
            signature: Vec::new(),
            timestamp: self.env.wall_clock_millis(),
        };
        message.signature = self.provider.sign(private_key, &message.signing_payload())?;

        Ok(message)
    }

    /// Check the distribution's signature against its embedded public key.
    ///
    /// Any change to a signed field invalidates it. Addresses that do not
    /// match their chain type never verify.
    pub fn verify_distribution(&self, distribution: &DistributionMessage) -> bool {
        if distribution.sender_chain_type.validate_address(&distribution.sender_address).is_err() {
            return false;
        }

        self.provider.verify(
            &distribution.public_signing_key,
            &distribution.signing_payload(),
            &distribution.signature,
        )
    }

    /// Rebuild a public-only peer state from a distribution.
    ///
    /// Callers are expected to have verified the distribution first.
    pub fn create_sender_key_state_from_distribution(
        &self,
        distribution: &DistributionMessage,
    ) -> Result<SenderKeyState, SenderKeyError> {
        let chain_key = SymmetricKey::try_from(distribution.chain_key.as_bytes())?;

        Ok(SenderKeyState::new(
            distribution.sender_address.clone(),
            distribution.sender_chain_type,
            distribution.key_id,
            chain_key,
            distribution.public_signing_key.clone(),
            None,
            distribution.iteration,
        ))
    }
}
