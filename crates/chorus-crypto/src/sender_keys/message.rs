//! Signed group message envelopes.
//!
//! An envelope carries one ratchet ciphertext plus the routing fields a
//! receiver needs to find the right sender state. The sender signs the
//! ciphertext together with its context, and receivers check that signature
//! before the ratchet is touched, so a forged envelope can never advance or
//! drain a peer's chain.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{error::SenderKeyError, ratchet::SenderKeyRatchet, state::SenderKeyState};
use crate::{
    env::Environment,
    provider::{CryptoProvider, POLY1305_TAG_SIZE, XCHACHA_NONCE_SIZE},
    wire::{CanonicalWriter, WireError, base64_bytes, purposes},
};

/// Length of a hex-encoded message id (128 bits)
const MESSAGE_ID_HEX_LEN: usize = 32;

/// Encrypted, signed group message as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageEnvelope {
    /// Group the message was sent to
    pub group_id: String,
    /// Sender address
    pub sender_address: String,
    /// Sender key generation used
    pub key_id: u32,
    /// Ratchet iteration of the message key
    pub iteration: u32,
    /// AEAD ciphertext including tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// AEAD nonce
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Signature over the canonical envelope payload
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Random 128-bit identifier, lowercase hex
    pub message_id: String,
}

impl GroupMessageEnvelope {
    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        CanonicalWriter::new(purposes::GROUP_MESSAGE)
            .bytes(&self.ciphertext)
            .bytes(&self.nonce)
            .str(&self.group_id)
            .str(&self.sender_address)
            .u32(self.key_id)
            .u32(self.iteration)
            .finish()
    }

    /// Serialize for transport.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from transport, checking field shapes. The signature is NOT
    /// checked here.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let envelope: Self = serde_json::from_str(json)?;
        envelope.check_fields()?;
        Ok(envelope)
    }

    fn check_fields(&self) -> Result<(), WireError> {
        let invalid = |field, reason: &str| {
            Err(WireError::InvalidField { field, reason: reason.to_string() })
        };

        if self.group_id.is_empty() {
            return invalid("groupId", "must not be empty");
        }
        if self.sender_address.is_empty() {
            return invalid("senderAddress", "must not be empty");
        }
        if self.nonce.len() != XCHACHA_NONCE_SIZE {
            return invalid("nonce", &format!("expected {XCHACHA_NONCE_SIZE} bytes"));
        }
        if self.ciphertext.len() < POLY1305_TAG_SIZE {
            return invalid("ciphertext", "shorter than authentication tag");
        }
        if self.signature.is_empty() {
            return invalid("signature", "must not be empty");
        }
        let well_formed_id = self.message_id.len() == MESSAGE_ID_HEX_LEN
            && self.message_id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed_id {
            return invalid("messageId", "expected 32 lowercase hex characters");
        }

        Ok(())
    }
}

/// Builds envelopes from a local sender state and opens them with a peer
/// state.
#[derive(Clone)]
pub struct GroupMessageBuilder<P, E> {
    ratchet: SenderKeyRatchet<P, E>,
}

impl<P: CryptoProvider, E: Environment> GroupMessageBuilder<P, E> {
    /// Wrap a ratchet.
    pub fn new(ratchet: SenderKeyRatchet<P, E>) -> Self {
        Self { ratchet }
    }

    /// Underlying ratchet.
    pub fn ratchet(&self) -> &SenderKeyRatchet<P, E> {
        &self.ratchet
    }

    /// Encrypt and sign `plaintext` with the next key of `sender_state`.
    ///
    /// # Errors
    ///
    /// - `MissingPrivateKey` if `sender_state` is public-only; the ratchet is
    ///   not advanced in that case
    pub fn build_message(
        &self,
        group_id: &str,
        plaintext: &[u8],
        sender_state: &mut SenderKeyState,
    ) -> Result<GroupMessageEnvelope, SenderKeyError> {
        let private_key = Zeroizing::new(
            sender_state.private_signing_key().ok_or(SenderKeyError::MissingPrivateKey)?.to_vec(),
        );

        let encrypted = self.ratchet.encrypt(sender_state, group_id, plaintext)?;

        let mut envelope = GroupMessageEnvelope {
            group_id: group_id.to_string(),
            sender_address: sender_state.sender_address().to_string(),
            key_id: sender_state.key_id(),
            iteration: encrypted.iteration,
            ciphertext: encrypted.ciphertext,
            nonce: encrypted.nonce,
            signature: Vec::new(),
            message_id: self.ratchet.env().random_id(),
        };
        envelope.signature = self.ratchet.provider().sign(&private_key, &envelope.signing_payload())?;

        tracing::trace!(
            group_id,
            key_id = envelope.key_id,
            iteration = envelope.iteration,
            "built group message"
        );

        Ok(envelope)
    }

    /// Verify and decrypt `envelope` against the sender's public state.
    ///
    /// # Errors
    ///
    /// - `SenderMismatch` if the envelope names another sender or key
    /// - `InvalidSignature` if the signature does not verify; the ratchet is
    ///   untouched in that case
    /// - any ratchet decrypt error
    pub fn decrypt_message(
        &self,
        envelope: &GroupMessageEnvelope,
        receiver_state: &mut SenderKeyState,
    ) -> Result<Vec<u8>, SenderKeyError> {
        if envelope.sender_address != receiver_state.sender_address()
            || envelope.key_id != receiver_state.key_id()
        {
            return Err(SenderKeyError::SenderMismatch {
                address: envelope.sender_address.clone(),
                key_id: envelope.key_id,
            });
        }

        let verified = self.ratchet.provider().verify(
            receiver_state.public_signing_key(),
            &envelope.signing_payload(),
            &envelope.signature,
        );
        if !verified {
            return Err(SenderKeyError::InvalidSignature);
        }

        self.ratchet.decrypt(
            receiver_state,
            &envelope.group_id,
            &envelope.ciphertext,
            &envelope.nonce,
            envelope.iteration,
        )
    }
}
