//! Run repository for database operations
//!
//! Runs carry the observability half of per-case exclusion: the advisory
//! lock enforces correctness while these rows record who holds it, until
//! when, and what happened. The reaper reconciles rows whose TTL passed.

use crate::db::models::{Run, RunStatus};
use crate::db::DatabasePool;
use chrono::{DateTime, Duration, Utc};

/// Run repository for managing run lifecycle rows
pub struct RunRepository;

impl RunRepository {
    /// Insert a new run
    pub async fn create(pool: &DatabasePool, run: &Run) -> Result<Run, sqlx::Error> {
        sqlx::query_as::<_, Run>(
            "INSERT INTO runs (id, case_id, trigger_type, message_id, followup_id, proposal_id,
                               status, thread_id, node_trace, skip_reason, error_message,
                               interrupt_value, recovery_attempted, started_at, ended_at,
                               heartbeat_at, lock_expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&run.id)
        .bind(&run.case_id)
        .bind(&run.trigger_type)
        .bind(&run.message_id)
        .bind(&run.followup_id)
        .bind(&run.proposal_id)
        .bind(&run.status)
        .bind(&run.thread_id)
        .bind(&run.node_trace)
        .bind(&run.skip_reason)
        .bind(&run.error_message)
        .bind(&run.interrupt_value)
        .bind(run.recovery_attempted)
        .bind(&run.started_at)
        .bind(&run.ended_at)
        .bind(&run.heartbeat_at)
        .bind(&run.lock_expires_at)
        .bind(&run.created_at)
        .bind(&run.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Get a run by ID
    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<Run>, sqlx::Error> {
        sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Mark a run QUEUED once its job is on the queue
    pub async fn mark_queued(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE runs SET status = 'queued', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark a run RUNNING under the case lock
    ///
    /// Stamps `started_at`, the first heartbeat, and the authoritative
    /// `lock_expires_at`.
    pub async fn mark_running(
        pool: &DatabasePool,
        id: &str,
        thread_id: &str,
        lock_ttl: Duration,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let expires = now + lock_ttl;
        sqlx::query(
            "UPDATE runs
             SET status = 'running', thread_id = ?, started_at = ?, heartbeat_at = ?,
                 lock_expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(thread_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(expires.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refresh the heartbeat and extend the lock expiry
    pub async fn heartbeat(
        pool: &DatabasePool,
        id: &str,
        lock_ttl: Duration,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let expires = now + lock_ttl;
        sqlx::query(
            "UPDATE runs SET heartbeat_at = ?, lock_expires_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(now.to_rfc3339())
        .bind(expires.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Suspend a run at a human gate
    pub async fn mark_waiting(
        pool: &DatabasePool,
        id: &str,
        proposal_id: &str,
        interrupt_value: &str,
        node_trace: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs
             SET status = 'waiting', proposal_id = ?, interrupt_value = ?, node_trace = ?,
                 ended_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(proposal_id)
        .bind(interrupt_value)
        .bind(node_trace)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a run COMPLETED with its node trace
    pub async fn mark_completed(
        pool: &DatabasePool,
        id: &str,
        node_trace: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs SET status = 'completed', node_trace = ?, ended_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(node_trace)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a run FAILED with an error description
    pub async fn mark_failed(
        pool: &DatabasePool,
        id: &str,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs SET status = 'failed', error_message = ?, ended_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error_message)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a run SKIPPED with a reason
    pub async fn mark_skipped(
        pool: &DatabasePool,
        id: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs SET status = 'skipped', skip_reason = ?, ended_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(reason)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Link the proposal a run produced or resumed
    pub async fn link_proposal(
        pool: &DatabasePool,
        id: &str,
        proposal_id: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE runs SET proposal_id = ?, updated_at = ? WHERE id = ?")
            .bind(proposal_id)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// The RUNNING run for a case with a fresh heartbeat, if any
    ///
    /// A heartbeat older than `freshness` is stale: the holder is presumed
    /// dead and the row left for the reaper.
    pub async fn active_run(
        pool: &DatabasePool,
        case_id: &str,
        freshness: Duration,
    ) -> Result<Option<Run>, sqlx::Error> {
        let cutoff = (Utc::now() - freshness).to_rfc3339();
        sqlx::query_as::<_, Run>(
            "SELECT * FROM runs
             WHERE case_id = ? AND status = 'running' AND heartbeat_at > ?
             LIMIT 1",
        )
        .bind(case_id)
        .bind(&cutoff)
        .fetch_optional(pool)
        .await
    }

    /// RUNNING runs whose lock TTL has passed (reaper input)
    pub async fn list_expired(
        pool: &DatabasePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Run>, sqlx::Error> {
        sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE status = 'running' AND lock_expires_at < ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await
    }

    /// Transition an expired RUNNING run to TIMED_OUT
    ///
    /// Conditional on the row still being RUNNING so a racing completion
    /// wins. Returns whether the transition happened.
    pub async fn reap(pool: &DatabasePool, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE runs
             SET status = 'timed_out', recovery_attempted = 1, ended_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count runs for a case in a given status
    pub async fn count_by_status(
        pool: &DatabasePool,
        case_id: &str,
        status: RunStatus,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM runs WHERE case_id = ? AND status = ?")
                .bind(case_id)
                .bind(status.as_str())
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }
}
