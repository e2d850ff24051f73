//! SQLite-backed checkpoint storage
//!
//! The production backend. Checkpoints are stored in a `checkpoints` table
//! keyed by `(thread_id, idx)`, so a process restart can reload the latest
//! snapshot for any thread and resume exactly where the graph suspended.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

/// Durable checkpoint store over a shared SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Wrap an existing connection pool
    ///
    /// Call [`ensure_schema`](Self::ensure_schema) once at startup unless the
    /// application's migrations already create the `checkpoints` table.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `checkpoints` table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                state TEXT NOT NULL,
                next_node TEXT,
                interrupt TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, idx)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint> {
        let state: String = row.get("state");
        let next_node: Option<String> = row.get("next_node");
        let interrupt: Option<String> = row.get("interrupt");
        let created_at: String = row.get("created_at");

        Ok(Checkpoint {
            thread_id: row.get("thread_id"),
            index: row.get("idx"),
            state: serde_json::from_str(&state)?,
            next_node,
            interrupt: interrupt
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .map_err(|e| CheckpointError::Storage(format!("bad created_at: {}", e)))?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let interrupt = checkpoint
            .interrupt
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, idx, state, next_node, interrupt, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (thread_id, idx) DO UPDATE SET
               state = excluded.state,
               next_node = excluded.next_node,
               interrupt = excluded.interrupt,
               created_at = excluded.created_at",
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.index)
        .bind(&state)
        .bind(&checkpoint.next_node)
        .bind(&interrupt)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            thread_id = %checkpoint.thread_id,
            index = checkpoint.index,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT thread_id, idx, state, next_node, interrupt, created_at
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY idx DESC
             LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT thread_id, idx, state, next_node, interrupt, created_at
             FROM checkpoints
             WHERE thread_id = ?
             ORDER BY idx ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        // Escape LIKE wildcards so a literal prefix never over-matches
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("{}%", escaped);

        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> SqliteCheckpointStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SqliteCheckpointStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let store = test_store().await;

        store
            .put(Checkpoint::new("case:1", 0, json!({"step": 0})))
            .await
            .unwrap();
        store
            .put(
                Checkpoint::new("case:1", 1, json!({"step": 1}))
                    .with_next_node("gate_or_execute")
                    .with_interrupt(json!({"proposal_id": "p-1"})),
            )
            .await
            .unwrap();

        let latest = store.get_latest("case:1").await.unwrap().unwrap();
        assert_eq!(latest.index, 1);
        assert_eq!(latest.next_node.as_deref(), Some("gate_or_execute"));
        assert_eq!(latest.interrupt, Some(json!({"proposal_id": "p-1"})));
    }

    #[tokio::test]
    async fn test_get_latest_missing_thread() {
        let store = test_store().await;
        assert!(store.get_latest("case:nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_same_index_replaces() {
        let store = test_store().await;

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
    async fn test_list_ordering() {
        let store = test_store().await;

        for idx in [2i64, 0, 1] {
            store
                .put(Checkpoint::new("case:1", idx, json!(idx)))
                .await
                .unwrap();
        }

        let log = store.list("case:1").await.unwrap();
        let indices: Vec<i64> = log.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let store = test_store().await;

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
    async fn test_survives_reopen_of_pool_handle() {
        // Same pool, new store value: data must still be visible
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SqliteCheckpointStore::new(pool.clone());
        store.ensure_schema().await.unwrap();

        store
            .put(Checkpoint::new("case:7", 0, json!({"durable": true})))
            .await
            .unwrap();

        let reopened = SqliteCheckpointStore::new(pool);
        let latest = reopened.get_latest("case:7").await.unwrap().unwrap();
        assert_eq!(latest.state, json!({"durable": true}));
    }
}
