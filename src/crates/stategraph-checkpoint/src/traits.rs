//! Extensible checkpoint storage trait
//!
//! [`CheckpointStore`] is the abstraction the graph runtime writes through.
//! Implementations must be `Send + Sync` and guarantee read-your-writes
//! within a single `thread_id`: a `get_latest` issued after a `put` on the
//! same thread observes that `put`.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for graph checkpoints
///
/// Checkpoints for a thread form an append-only log ordered by index. Stores
/// never interpret the state blob.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to its thread's log
    ///
    /// Writing the same `(thread_id, index)` twice replaces the earlier
    /// snapshot; callers that never reuse indices get pure append semantics.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Fetch the highest-index checkpoint for a thread, if any
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// List all checkpoints for a thread in ascending index order
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete every checkpoint whose thread id starts with `prefix`
    ///
    /// Used for thread reset and case closure. Returns the number of
    /// checkpoints removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;
}
