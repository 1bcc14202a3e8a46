#![allow(clippy::disallowed_types, reason = "Lock is never held across an await point")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{GroupSessionStore, StoreError};
use crate::session::GroupSession;

/// In-memory session store for testing and simulation
///
/// Sessions are kept CBOR-encoded, so every load decodes a fresh copy the
/// same way a persistent backend would. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |sessions| sessions.len())
    }

    /// True if no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn encode(session: &GroupSession) -> Result<Vec<u8>, StoreError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(session, &mut bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<GroupSession, StoreError> {
        ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl GroupSessionStore for MemoryStore {
    async fn save_group_session(&self, session: &GroupSession) -> Result<(), StoreError> {
        let bytes = Self::encode(session)?;
        self.lock()?.insert(session.group_id().to_string(), bytes);
        Ok(())
    }

    async fn load_group_session(&self, group_id: &str) -> Result<Option<GroupSession>, StoreError> {
        let bytes = self.lock()?.get(group_id).cloned();
        bytes.as_deref().map(Self::decode).transpose()
    }

    async fn list_group_sessions(&self) -> Result<Vec<GroupSession>, StoreError> {
        let encoded: Vec<Vec<u8>> = self.lock()?.values().cloned().collect();
        encoded.iter().map(|bytes| Self::decode(bytes)).collect()
    }

    async fn delete_group_session(&self, group_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(group_id).is_some())
    }
}
