//! Credential persistence for the single relay session.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;

/// Fixed identifier the relay stores its one session under.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Authentication material produced by the transport.
///
/// The relay never looks inside; only the transport that wrote it knows the layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    blob: Vec<u8>,
}

impl Credentials {
    pub fn from_bytes(blob: impl Into<Vec<u8>>) -> Self {
        Self { blob: blob.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

/// Load-at-startup, save-on-update storage for session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credentials, or `None` to start a fresh pairing.
    async fn load(&self) -> crate::Result<Option<Credentials>>;

    /// Replace the stored credentials.
    async fn save(&self, credentials: &Credentials) -> crate::Result<()>;

    /// Erase the stored credentials. Erasing nothing is not an error.
    async fn clear(&self) -> crate::Result<()>;
}

/// Alias for the shared store handle.
pub type Store = Arc<dyn CredentialStore>;
