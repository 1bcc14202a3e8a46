//! Persistence for group sessions.
//!
//! The manager never keeps sessions in memory between operations: every
//! operation loads the session, mutates it and saves it back. Backends only
//! need whole-session reads and writes keyed by group id.

mod error;
mod memory;

use async_trait::async_trait;
pub use error::StoreError;
pub use memory::MemoryStore;

use crate::session::GroupSession;

/// Async persistence interface for [`GroupSession`]s.
///
/// Implementations are shared between the manager and its callers, so they
/// must be cheap to share (`Arc` inside) and safe to call concurrently.
///
/// # Invariants
///
/// - `load_group_session` after `save_group_session` returns an equal session
/// - Loads return independent copies; mutating one never affects the store
///   until it is saved
#[async_trait]
pub trait GroupSessionStore: Send + Sync + 'static {
    /// Insert or overwrite the session for `session.group_id`.
    async fn save_group_session(&self, session: &GroupSession) -> Result<(), StoreError>;

    /// Load the session for `group_id`, or `None` if there is none.
    async fn load_group_session(&self, group_id: &str) -> Result<Option<GroupSession>, StoreError>;

    /// All stored sessions. Order is not guaranteed.
    async fn list_group_sessions(&self) -> Result<Vec<GroupSession>, StoreError>;

    /// Remove the session for `group_id`. Returns whether one existed.
    async fn delete_group_session(&self, group_id: &str) -> Result<bool, StoreError>;
}
