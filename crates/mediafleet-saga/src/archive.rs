//! Transfer archives on local disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::error::{SagaError, SagaResult};

/// Stores `<transfer_id>.zip` files under the download directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    /// Use `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> SagaResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| SagaError::io("archive.create_dir", &dir, err))?;
        Ok(Self { dir })
    }

    /// Directory holding the archives.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a transfer's archive.
    #[must_use]
    pub fn path_for(&self, transfer_id: Uuid) -> PathBuf {
        self.dir.join(format!("{transfer_id}.zip"))
    }

    /// Write a transfer's archive and flush it to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, written, or synced.
    pub async fn write(&self, transfer_id: Uuid, content: &[u8]) -> SagaResult<PathBuf> {
        let path = self.path_for(transfer_id);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|err| SagaError::io("archive.create", &path, err))?;
        file.write_all(content)
            .await
            .map_err(|err| SagaError::io("archive.write", &path, err))?;
        file.sync_all()
            .await
            .map_err(|err| SagaError::io("archive.sync", &path, err))?;
        info!(transfer_id = %transfer_id, bytes = content.len(), "transfer archive stored");
        Ok(path)
    }

    /// Read a transfer's archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    pub async fn read(&self, transfer_id: Uuid) -> SagaResult<Vec<u8>> {
        let path = self.path_for(transfer_id);
        tokio::fs::read(&path)
            .await
            .map_err(|err| SagaError::io("archive.read", &path, err))
    }

    /// Remove a transfer's archive. Returns `false` if it was already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn delete(&self, transfer_id: Uuid) -> SagaResult<bool> {
        let path = self.path_for(transfer_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SagaError::io("archive.delete", &path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete_cycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArchiveStore::open(temp.path().join("downloads")).await?;
        let id = Uuid::new_v4();

        let path = store.write(id, b"zip bytes").await?;
        assert_eq!(path, store.dir().join(format!("{id}.zip")));
        assert_eq!(store.read(id).await?, b"zip bytes");

        assert!(store.delete(id).await?);
        assert!(!store.delete(id).await?);
        assert!(store.read(id).await.is_err());
        Ok(())
    }
}
