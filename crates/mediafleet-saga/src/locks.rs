//! Per-record serialization of read-modify-write cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Hands out one async lock per record id so replies for the same saga apply
/// one at a time while different sagas proceed in parallel.
#[derive(Default)]
pub(crate) struct RecordLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RecordLocks {
    pub(crate) async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the lock of a record that will not be mutated again.
    pub(crate) fn release(&self, id: Uuid) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn held(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_exclusive() {
        let locks = Arc::new(RecordLocks::default());
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;

        let contender = Arc::clone(&locks);
        let waiting = tokio::spawn(async move { contender.acquire(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        let _other = locks.acquire(Uuid::new_v4()).await;
        drop(guard);
        assert!(waiting.await.is_ok());
    }

    #[tokio::test]
    async fn released_ids_are_forgotten() {
        let locks = RecordLocks::default();
        let id = Uuid::new_v4();
        drop(locks.acquire(id).await);
        assert_eq!(locks.held(), 1);
        locks.release(id);
        assert_eq!(locks.held(), 0);
    }
}
