//! Cryptographic primitive strategy.
//!
//! The ratchet and both builders never name a concrete cipher, MAC or
//! signature scheme. They receive a [`CryptoProvider`] at construction and
//! call through it, so the primitive suite can be swapped (or faked in tests)
//! without any process-wide registration.
//!
//! All provider functions are pure: randomness is supplied by the caller
//! through [`crate::Environment`].

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::sender_keys::{KEY_SIZE, SecretBytes, SenderKeyError};

type HmacSha256 = Hmac<Sha256>;

/// XChaCha20 nonce size (24 bytes)
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const POLY1305_TAG_SIZE: usize = 16;

/// Ed25519 secret seed size (32 bytes)
const ED25519_SEED_SIZE: usize = 32;

/// A freshly generated signing keypair.
pub struct SigningKeyPair {
    /// Encoded public verification key
    pub public_key: Vec<u8>,
    /// Encoded private signing key
    pub private_key: SecretBytes,
}

/// Primitive suite used by the Sender Keys core.
///
/// # Invariants
///
/// - `derive` is a one-way PRF: outputs for distinct labels are independent
///   and reveal nothing about the input key
/// - `open` fails for any modification of key, nonce, associated data or
///   ciphertext
/// - `verify` never panics on malformed keys or signatures; it returns false
pub trait CryptoProvider: Clone + Send + Sync + 'static {
    /// Nonce length accepted by `seal`/`open`.
    fn nonce_len(&self) -> usize;

    /// Deterministically build a signing keypair from 32 bytes of entropy.
    fn signing_keypair_from_seed(&self, seed: &[u8; KEY_SIZE]) -> SigningKeyPair;

    /// Sign `message` with an encoded private key.
    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, SenderKeyError>;

    /// Verify `signature` over `message` against an encoded public key.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// One-way, domain-separated key derivation.
    fn derive(&self, key: &[u8; KEY_SIZE], label: &[u8]) -> [u8; KEY_SIZE];

    /// Authenticated encryption.
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SenderKeyError>;

    /// Authenticated decryption.
    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SenderKeyError>;
}

/// Default suite: Ed25519 signatures, HMAC-SHA256 derivation and
/// XChaCha20-Poly1305 AEAD.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    /// Create the default provider.
    pub fn new() -> Self {
        Self
    }

    fn check_nonce(nonce: &[u8]) -> Result<&XNonce, SenderKeyError> {
        if nonce.len() != XCHACHA_NONCE_SIZE {
            return Err(SenderKeyError::InvalidNonceLength {
                expected: XCHACHA_NONCE_SIZE,
                actual: nonce.len(),
            });
        }
        Ok(XNonce::from_slice(nonce))
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn nonce_len(&self) -> usize {
        XCHACHA_NONCE_SIZE
    }

    fn signing_keypair_from_seed(&self, seed: &[u8; KEY_SIZE]) -> SigningKeyPair {
        let signing_key = SigningKey::from_bytes(seed);
        SigningKeyPair {
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            private_key: SecretBytes::new(signing_key.to_bytes().to_vec()),
        }
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, SenderKeyError> {
        let seed: [u8; ED25519_SEED_SIZE] =
            private_key.try_into().map_err(|_| SenderKeyError::InvalidKeyLength {
                expected: ED25519_SEED_SIZE,
                actual: private_key.len(),
            })?;

        let signing_key = SigningKey::from_bytes(&seed);
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };

        verifying_key.verify_strict(message, &signature).is_ok()
    }

    fn derive(&self, key: &[u8; KEY_SIZE], label: &[u8]) -> [u8; KEY_SIZE] {
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut derived = [0u8; KEY_SIZE];
        derived.copy_from_slice(&result);
        derived
    }

    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SenderKeyError> {
        let nonce = Self::check_nonce(nonce)?;
        let cipher = XChaCha20Poly1305::new(key.into());

        let Ok(ciphertext) = cipher.encrypt(nonce, Payload { msg: plaintext, aad }) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };
        Ok(ciphertext)
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SenderKeyError> {
        let nonce = Self::check_nonce(nonce)?;
        let cipher = XChaCha20Poly1305::new(key.into());

        cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| SenderKeyError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];
    const NONCE: [u8; XCHACHA_NONCE_SIZE] = [9u8; XCHACHA_NONCE_SIZE];

    #[test]
    fn seal_open_roundtrip() {
        let provider = RustCryptoProvider::new();
        let ciphertext = provider.seal(&KEY, &NONCE, b"aad", b"hello").unwrap();

        assert_eq!(ciphertext.len(), 5 + POLY1305_TAG_SIZE);
        assert_eq!(provider.open(&KEY, &NONCE, b"aad", &ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn open_rejects_wrong_associated_data() {
        let provider = RustCryptoProvider::new();
        let ciphertext = provider.seal(&KEY, &NONCE, b"group-a", b"hello").unwrap();

        let result = provider.open(&KEY, &NONCE, b"group-b", &ciphertext);
        assert_eq!(result, Err(SenderKeyError::AuthenticationFailed));
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let provider = RustCryptoProvider::new();
        let mut ciphertext = provider.seal(&KEY, &NONCE, b"", b"original").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(provider.open(&KEY, &NONCE, b"", &ciphertext).is_err());
    }

    #[test]
    fn wrong_nonce_length_is_rejected() {
        let provider = RustCryptoProvider::new();
        let result = provider.seal(&KEY, &[0u8; 12], b"", b"x");
        assert_eq!(result, Err(SenderKeyError::InvalidNonceLength { expected: 24, actual: 12 }));
    }

    #[test]
    fn derive_labels_are_independent() {
        let provider = RustCryptoProvider::new();
        let a = provider.derive(&KEY, b"MSG");
        let b = provider.derive(&KEY, b"CHAIN");

        assert_ne!(a, b);
        assert_eq!(a, provider.derive(&KEY, b"MSG"), "derivation must be deterministic");
    }

    #[test]
    fn derive_matches_hmac_sha256_vector() {
        // RFC 4231 test case 2; short HMAC keys are zero-padded, so "Jefe"
        // padded to 32 bytes is the same key
        let mut key = [0u8; KEY_SIZE];
        key[..4].copy_from_slice(b"Jefe");

        let derived = RustCryptoProvider::new().derive(&key, b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(derived),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sign_verify_roundtrip() {
        let provider = RustCryptoProvider::new();
        let keypair = provider.signing_keypair_from_seed(&KEY);

        let signature = provider.sign(keypair.private_key.as_bytes(), b"payload").unwrap();
        assert!(provider.verify(&keypair.public_key, b"payload", &signature));
        assert!(!provider.verify(&keypair.public_key, b"other", &signature));
    }

    #[test]
    fn verify_tolerates_garbage() {
        let provider = RustCryptoProvider::new();
        assert!(!provider.verify(&[1, 2, 3], b"payload", &[0u8; 64]));
        assert!(!provider.verify(&[0u8; 32], b"payload", &[0u8; 3]));
    }

    #[test]
    fn sign_rejects_short_private_key() {
        let provider = RustCryptoProvider::new();
        let result = provider.sign(&[0u8; 5], b"payload");
        assert_eq!(result, Err(SenderKeyError::InvalidKeyLength { expected: 32, actual: 5 }));
    }
}
