//! Storage error types.

use thiserror::Error;

/// Errors from a [`super::GroupSessionStore`] backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Session could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure (I/O, lock poisoning, remote store)
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Serialization failures are deterministic; backend failures may be
    /// transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
