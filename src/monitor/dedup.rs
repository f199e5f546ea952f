use super::event::ErrorEvent;
use crate::storage::{Storage, StorageError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Gates persistence so each logical error is recorded once.
///
/// The in-memory set only saves storage round-trips when already-seen blocks
/// are re-read; uniqueness is enforced by the store itself.
pub struct DedupStore {
    storage: Arc<dyn Storage>,
    seen: Mutex<HashSet<String>>,
}

impl DedupStore {
    /// Builds the store with its seen-set rebuilt from durable storage.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let hashes = storage.load_hashes().await?;
        info!(count = hashes.len(), "loaded existing error hashes");

        Ok(Self {
            storage,
            seen: Mutex::new(hashes.into_iter().collect()),
        })
    }

    /// Persists `event` unless it was seen before. Returns whether it was
    /// newly inserted; `false` means duplicate.
    pub async fn record(&self, event: &mut ErrorEvent) -> Result<bool, StorageError> {
        let hash = event.ensure_hash().to_string();

        if self.is_seen(&hash)? {
            debug!(hash = %hash, service = %event.service, "duplicate error block skipped");
            return Ok(false);
        }

        let inserted = self.storage.insert_event(event).await?;
        self.seen
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(hash);

        if inserted {
            info!(
                service = %event.service,
                user = %event.user,
                routine = %event.routine,
                log_timestamp = %event.log_timestamp,
                "error event recorded"
            );
        } else {
            debug!(service = %event.service, "error block already stored");
        }
        Ok(inserted)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn is_seen(&self, hash: &str) -> Result<bool, StorageError> {
        Ok(self
            .seen
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_blocks;
    use crate::storage::DuckDbStorage;

    const SCENARIO: &str = "THREAD ERROR 01/01/2024 10:00:00\nCall on FOO(BAR.PRW)\n[remark: Logged:jdoe Obj:BAR - Bar routine]\n";

    async fn storage() -> Arc<dyn Storage> {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        Arc::new(storage)
    }

    fn scenario_event() -> ErrorEvent {
        ErrorEvent::from_block("host", "svc", extract_blocks(SCENARIO).remove(0))
    }

    #[tokio::test]
    async fn test_second_record_is_duplicate() {
        let storage = storage().await;
        let dedup = DedupStore::load(storage.clone()).await.unwrap();

        assert!(dedup.record(&mut scenario_event()).await.unwrap());
        assert!(!dedup.record(&mut scenario_event()).await.unwrap());
        assert_eq!(storage.count_events().await.unwrap(), 1);
        assert_eq!(dedup.seen_count(), 1);
    }

    #[tokio::test]
    async fn test_seen_set_rebuilt_after_restart() {
        let storage = storage().await;
        {
            let dedup = DedupStore::load(storage.clone()).await.unwrap();
            assert!(dedup.record(&mut scenario_event()).await.unwrap());
        }

        let restarted = DedupStore::load(storage.clone()).await.unwrap();
        assert_eq!(restarted.seen_count(), 1);
        assert!(!restarted.record(&mut scenario_event()).await.unwrap());
        assert_eq!(storage.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_storage_enforces_uniqueness_without_cache() {
        let storage = storage().await;
        let a = DedupStore::load(storage.clone()).await.unwrap();
        let b = DedupStore::load(storage.clone()).await.unwrap();

        assert!(a.record(&mut scenario_event()).await.unwrap());
        // `b` never saw the hash in memory; the store still rejects it.
        assert!(!b.record(&mut scenario_event()).await.unwrap());
        assert_eq!(storage.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_hash_is_computed() {
        let storage = storage().await;
        let dedup = DedupStore::load(storage).await.unwrap();
        let mut event = scenario_event();
        let expected = event.content_hash.clone();
        event.content_hash.clear();

        assert!(dedup.record(&mut event).await.unwrap());
        assert_eq!(event.content_hash, expected);
    }
}
