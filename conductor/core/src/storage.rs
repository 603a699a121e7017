//! Session File Storage
//!
//! Files a client uploads are stored per session so that clearing a session
//! can remove them with it. The orchestrator only depends on the
//! [`FileStore`] trait; [`LocalFileStore`] keeps files under one directory:
//!
//! ```text
//! <root>/<session-id>/<uuid>.<ext>
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::messages::SessionId;

/// File storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// Session id cannot be used as a directory name
    #[error("session id {0:?} is not a valid storage key")]
    InvalidSession(String),

    /// Filesystem failure
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Session-scoped file storage
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` for `session`; returns where they landed
    async fn save(
        &self,
        session: &SessionId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError>;

    /// Remove everything stored for `session`; missing data is not an error
    async fn delete_session(&self, session: &SessionId) -> Result<(), StorageError>;
}

/// [`FileStore`] that keeps nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFileStore;

#[async_trait]
impl FileStore for NoopFileStore {
    async fn save(
        &self,
        _session: &SessionId,
        file_name: &str,
        _bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        Ok(PathBuf::from(file_name))
    }

    async fn delete_session(&self, _session: &SessionId) -> Result<(), StorageError> {
        Ok(())
    }
}

/// [`FileStore`] on the local filesystem
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Store files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session: &SessionId) -> Result<PathBuf, StorageError> {
        let id = session.as_str();
        let valid = !session.is_blank()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StorageError::InvalidSession(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

fn stored_name(file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4().simple(), ext.to_ascii_lowercase()),
        None => Uuid::new_v4().simple().to_string(),
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(
        &self,
        session: &SessionId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.session_dir(session)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(stored_name(file_name));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            session = %session,
            path = %path.display(),
            size = bytes.len(),
            "Stored file"
        );
        Ok(path)
    }

    async fn delete_session(&self, session: &SessionId) -> Result<(), StorageError> {
        let dir = self.session_dir(session)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(session = %session, "Deleted session files");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path: dir, source }),
        }
    }
}
