use super::{CredentialStore, Credentials};
use crate::{error::StoreError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Credential store backed by one file per session id inside a directory.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Credentials for `session_id` live at `<dir>/<session_id>.creds`.
    pub fn new(dir: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{session_id}.creds")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        match tokio::fs::read(&self.path).await {
            Ok(blob) if blob.is_empty() => Ok(None),
            Ok(blob) => Ok(Some(Credentials::from_bytes(blob))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Load(format!("{}: {e}", self.path.display())).into()),
        }
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let save_err = |e: std::io::Error| StoreError::Save(format!("{}: {e}", self.path.display()));
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(save_err)?;
        }
        // atomic replace
        let tmp = self.path.with_extension("creds.tmp");
        tokio::fs::write(&tmp, credentials.as_bytes())
            .await
            .map_err(save_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(save_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Clear(format!("{}: {e}", self.path.display())).into()),
        }
    }
}
