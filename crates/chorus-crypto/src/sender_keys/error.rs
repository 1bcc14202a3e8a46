//! Error types for Sender Keys operations

use thiserror::Error;

use crate::chain::ChainType;

/// Errors from sender key operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SenderKeyError {
    /// Signature over a distribution or envelope did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD tag mismatch (tampered ciphertext, wrong key or wrong context)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Key for an old iteration was already consumed or evicted
    #[error("duplicate or expired message: iteration {iteration}, ratchet at {current}")]
    DuplicateOrExpired {
        /// Requested iteration
        iteration: u32,
        /// Current ratchet iteration
        current: u32,
    },

    /// Requested iteration is further ahead than the skip window allows
    #[error("skip window exceeded: at iteration {current}, requested {requested} (max skip {max_skip})")]
    SkipWindowExceeded {
        /// Current ratchet iteration
        current: u32,
        /// Requested iteration
        requested: u32,
        /// Configured skip window
        max_skip: u32,
    },

    /// Operation requires a private signing key but the state is public-only
    #[error("sender key state has no private signing key")]
    MissingPrivateKey,

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Nonce does not match the AEAD nonce size
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length
        expected: usize,
        /// Actual nonce length
        actual: usize,
    },

    /// Ratchet iteration would overflow
    #[error("ratchet iteration overflow at {current}")]
    IterationOverflow {
        /// Current iteration when overflow was detected
        current: u32,
    },

    /// Address is not well-formed for its chain type
    #[error("invalid {chain_type} address: {address}")]
    InvalidAddress {
        /// Chain type the address was checked against
        chain_type: ChainType,
        /// The rejected address
        address: String,
    },

    /// Envelope does not belong to the sender state it was routed to
    #[error("envelope from {address}/{key_id} does not match sender state")]
    SenderMismatch {
        /// Envelope sender address
        address: String,
        /// Envelope key id
        key_id: u32,
    },

    /// Signing primitive rejected its input
    #[error("signing failed: {reason}")]
    Signing {
        /// Reason reported by the signing primitive
        reason: String,
    },
}

impl SenderKeyError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors indicate a protocol violation or bug.
    /// Non-fatal errors may be recoverable by requesting a fresh distribution.
    pub fn is_fatal(&self) -> bool {
        match self {
            // Protocol violations and programmer errors - fatal
            Self::InvalidSignature
            | Self::AuthenticationFailed
            | Self::MissingPrivateKey
            | Self::InvalidKeyLength { .. }
            | Self::InvalidNonceLength { .. }
            | Self::IterationOverflow { .. }
            | Self::InvalidAddress { .. }
            | Self::SenderMismatch { .. }
            | Self::Signing { .. } => true,

            // Ratchet position problems - need state sync
            Self::DuplicateOrExpired { .. } | Self::SkipWindowExceeded { .. } => false,
        }
    }

    /// Returns true if the error was raised by a signature or AEAD check.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::InvalidSignature | Self::AuthenticationFailed)
    }
}
