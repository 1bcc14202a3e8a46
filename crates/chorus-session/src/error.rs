//! Session manager error types.

use chorus_crypto::{SenderKeyError, WireError};
use thiserror::Error;

use crate::store::StoreError;

/// Errors from [`crate::GroupSessionManager`] operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Cryptographic failure from the sender keys core
    #[error(transparent)]
    Crypto(#[from] SenderKeyError),

    /// Malformed wire structure
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No session stored for the group
    #[error("no session for group {group_id}")]
    SessionNotFound {
        /// Requested group
        group_id: String,
    },

    /// Envelope from a sender key this session has never seen
    #[error("unknown sender key {sender_address}/{key_id} in group {group_id}")]
    UnknownSender {
        /// Group the envelope was addressed to
        group_id: String,
        /// Envelope sender
        sender_address: String,
        /// Envelope key generation
        key_id: u32,
    },

    /// Envelope for a retired sender key whose grace period has passed
    #[error("sender key {sender_address}/{key_id} expired")]
    SenderKeyExpired {
        /// Envelope sender
        sender_address: String,
        /// Envelope key generation
        key_id: u32,
    },

    /// Distribution names a different group than the caller asked for
    #[error("distribution is for group {actual}, expected {expected}")]
    GroupMismatch {
        /// Group the caller asked for
        expected: String,
        /// Group named by the distribution
        actual: String,
    },

    /// Re-sent distribution would move a known key backwards
    #[error("stale distribution for {sender_address}/{key_id}: iteration {received} < {current}")]
    StaleDistribution {
        /// Distribution sender
        sender_address: String,
        /// Distribution key generation
        key_id: u32,
        /// Iteration carried by the distribution
        received: u32,
        /// Iteration of the stored state
        current: u32,
    },

    /// Member is already on the roster
    #[error("{address} is already a member of {group_id}")]
    MemberExists {
        /// Group
        group_id: String,
        /// Member address
        address: String,
    },

    /// Member is not on the roster
    #[error("{address} is not a member of {group_id}")]
    MemberNotFound {
        /// Group
        group_id: String,
        /// Member address
        address: String,
    },

    /// Distribution from a member removed from the group
    #[error("{address} was removed from {group_id}")]
    MemberRemoved {
        /// Group
        group_id: String,
        /// Removed member address
        address: String,
    },

    /// The local identity cannot remove itself; delete the session instead
    #[error("cannot remove the local identity from {group_id}")]
    CannotRemoveSelf {
        /// Group
        group_id: String,
    },
}

impl SessionError {
    /// Returns true if asking the sender for a fresh distribution could
    /// resolve the error.
    pub fn should_request_redistribution(&self) -> bool {
        match self {
            Self::UnknownSender { .. } | Self::SenderKeyExpired { .. } => true,
            Self::Crypto(err) => matches!(err, SenderKeyError::DuplicateOrExpired { .. }),
            _ => false,
        }
    }

    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors indicate a protocol violation, a forged input or a bug.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Crypto(err) => err.is_fatal(),
            Self::Wire(_) | Self::GroupMismatch { .. } => true,
            Self::Store(err) => !err.is_transient(),
            Self::SessionNotFound { .. }
            | Self::UnknownSender { .. }
            | Self::SenderKeyExpired { .. }
            | Self::StaleDistribution { .. }
            | Self::MemberExists { .. }
            | Self::MemberNotFound { .. }
            | Self::MemberRemoved { .. }
            | Self::CannotRemoveSelf { .. } => false,
        }
    }
}
