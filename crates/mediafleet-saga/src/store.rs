//! Saga record persistence.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SagaError, SagaResult};
use crate::model::SagaRecord;

/// Storage for one kind of saga record.
///
/// Saves replace the whole record; the last writer wins.
#[async_trait]
pub trait RecordStore<R: SagaRecord>: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &R) -> SagaResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> SagaResult<Option<R>>;

    /// Every record, oldest first.
    async fn all(&self) -> SagaResult<Vec<R>>;
}

/// Process-local store.
pub struct MemoryStore<R> {
    records: RwLock<BTreeMap<Uuid, R>>,
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R> MemoryStore<R> {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<R: SagaRecord> RecordStore<R> for MemoryStore<R> {
    async fn save(&self, record: &R) -> SagaResult<()> {
        self.records.write().await.insert(record.id(), record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SagaResult<Option<R>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn all(&self) -> SagaResult<Vec<R>> {
        let mut records: Vec<R> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|record| (record.created_at(), record.id()));
        Ok(records)
    }
}

/// One JSON document per record under `<root>/<kind>/<id>.json`.
///
/// Documents are written to a temporary sibling and renamed into place so a
/// crash never leaves a truncated record behind.
pub struct FileStore<R> {
    dir: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: SagaRecord> FileStore<R> {
    /// Open (and create) the store directory for `R` under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: &Path) -> SagaResult<Self> {
        let dir = root.join(R::KIND);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| SagaError::io("record_store.create_dir", &dir, err))?;
        Ok(Self {
            dir,
            _record: PhantomData,
        })
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read(&self, path: &Path) -> SagaResult<R> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| SagaError::io("record_store.read", path, err))?;
        serde_json::from_slice(&bytes).map_err(|err| SagaError::serde("record_store.decode", path, err))
    }
}

#[async_trait]
impl<R: SagaRecord> RecordStore<R> for FileStore<R> {
    async fn save(&self, record: &R) -> SagaResult<()> {
        let path = self.path_for(record.id());
        let staging = self.dir.join(format!("{}.json.tmp", record.id()));
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|err| SagaError::serde("record_store.encode", &path, err))?;
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|err| SagaError::io("record_store.write", &staging, err))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|err| SagaError::io("record_store.rename", &path, err))?;
        debug!(kind = R::KIND, id = %record.id(), "saga record saved");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SagaResult<Option<R>> {
        let path = self.path_for(id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => self.read(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(err) => Err(SagaError::io("record_store.stat", &path, err)),
        }
    }

    async fn all(&self) -> SagaResult<Vec<R>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| SagaError::io("record_store.list", &self.dir, err))?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SagaError::io("record_store.list", &self.dir, err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "skipping unreadable saga record");
                }
            }
        }
        records.sort_by_key(|record| (record.created_at(), record.id()));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Transfer, TransferStatus};
    use chrono::Duration;

    fn transfer() -> Transfer {
        Transfer::new(
            "manager",
            BTreeMap::from([("a".to_string(), vec!["m1".to_string()])]),
            Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn memory_store_replaces_on_save() -> anyhow::Result<()> {
        let store = MemoryStore::<Transfer>::new();
        let mut record = transfer();
        store.save(&record).await?;
        record.transition(TransferStatus::InProgress);
        store.save(&record).await?;

        let loaded = store.get(record.id).await?;
        assert_eq!(loaded.map(|t| t.status), Some(TransferStatus::InProgress));
        assert_eq!(store.all().await?.len(), 1);
        assert!(store.get(Uuid::new_v4()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn file_store_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let first = transfer();
        let mut second = transfer();
        second.created_at = first.created_at + Duration::seconds(1);
        {
            let store = FileStore::<Transfer>::open(temp.path()).await?;
            store.save(&second).await?;
            store.save(&first).await?;
        }

        let store = FileStore::<Transfer>::open(temp.path()).await?;
        assert_eq!(store.get(first.id).await?, Some(first.clone()));
        let ids: Vec<Uuid> = store.all().await?.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(store.dir().ends_with("transfer"));
        Ok(())
    }

    #[tokio::test]
    async fn file_store_skips_corrupt_documents() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileStore::<Transfer>::open(temp.path()).await?;
        store.save(&transfer()).await?;
        tokio::fs::write(store.dir().join("broken.json"), b"{").await?;
        tokio::fs::write(store.dir().join("leftover.json.tmp"), b"{").await?;

        assert_eq!(store.all().await?.len(), 1);
        Ok(())
    }
}
