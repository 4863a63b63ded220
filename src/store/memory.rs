use super::{CredentialStore, Credentials, DEFAULT_SESSION_ID};
use crate::{error::StoreError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory credential store (for testing or single-run; not persistent).
pub struct MemoryStore {
    session_id: String,
    entries: RwLock<HashMap<String, Credentials>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_session_id(DEFAULT_SESSION_ID)
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store pre-existing credentials, as if a previous run had paired.
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(self.session_id.clone(), credentials);
        }
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(entries.get(&self.session_id).cloned())
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| StoreError::Save(e.to_string()))?
            .insert(self.session_id.clone(), credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| StoreError::Clear(e.to_string()))?
            .remove(&self.session_id);
        Ok(())
    }
}
