//! In-memory checkpoint storage for development and testing
//!
//! Stores all checkpoints in a thread-safe map. Data does not survive process
//! restart, so production deployments use [`SqliteCheckpointStore`] instead;
//! tests use this backend for isolation and speed.
//!
//! [`SqliteCheckpointStore`]: crate::sqlite::SqliteCheckpointStore

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint store
///
/// Each `thread_id` maps to a vector of checkpoints kept sorted by index.
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    threads: Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.threads.read().await.values().map(Vec::len).sum()
    }

    /// Remove all checkpoints (test isolation helper)
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        let log = threads.entry(checkpoint.thread_id.clone()).or_default();

        match log.iter().position(|c| c.index == checkpoint.index) {
            Some(pos) => log[pos] = checkpoint,
            None => {
                log.push(checkpoint);
                log.sort_by_key(|c| c.index);
            }
        }
        Ok(())
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|log| log.last())
            .cloned())
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut threads = self.threads.write().await;
        let doomed: Vec<String> = threads
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();

        let mut removed = 0u64;
        for id in doomed {
            if let Some(log) = threads.remove(&id) {
                removed += log.len() as u64;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let store = MemoryCheckpointStore::new();

        store
            .put(Checkpoint::new("case:1", 0, json!({"step": 0})))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:1", 1, json!({"step": 1})))
            .await
            .unwrap();

        let latest = store.get_latest("case:1").await.unwrap().unwrap();
        assert_eq!(latest.index, 1);
        assert_eq!(latest.state, json!({"step": 1}));
    }

    #[tokio::test]
    async fn test_get_latest_missing_thread() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get_latest("case:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_same_index_replaces() {
        let store = MemoryCheckpointStore::new();

        store
            .put(Checkpoint::new("case:1", 0, json!({"v": "a"})))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:1", 0, json!({"v": "b"})))
            .await
            .unwrap();

        let log = store.list("case:1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].state, json!({"v": "b"}));
    }

    #[tokio::test]
    async fn test_list_is_index_ordered() {
        let store = MemoryCheckpointStore::new();

        // Insert out of order
        store
            .put(Checkpoint::new("case:1", 2, json!(2)))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:1", 0, json!(0)))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:1", 1, json!(1)))
            .await
            .unwrap();

        let log = store.list("case:1").await.unwrap();
        let indices: Vec<i64> = log.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_thread_isolation() {
        let store = MemoryCheckpointStore::new();

        store
            .put(Checkpoint::new("case:1", 0, json!({"case": 1})))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:2", 0, json!({"case": 2})))
            .await
            .unwrap();

        assert_eq!(store.thread_count().await, 2);
        let latest = store.get_latest("case:1").await.unwrap().unwrap();
        assert_eq!(latest.state, json!({"case": 1}));
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let store = MemoryCheckpointStore::new();

        store
            .put(Checkpoint::new("case:10", 0, json!(0)))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("case:10", 1, json!(1)))
            .await
            .unwrap();
        store
            .put(Checkpoint::new("initial:10", 0, json!(0)))
            .await
            .unwrap();

        let removed = store.delete_by_prefix("case:10").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_latest("case:10").await.unwrap().is_none());
        assert!(store.get_latest("initial:10").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCheckpointStore::new();
        store
            .put(Checkpoint::new("case:1", 0, json!(0)))
            .await
            .unwrap();

        store.clear().await;
        assert_eq!(store.checkpoint_count().await, 0);
    }
}
