//! Execution repository for database operations

use crate::db::models::Execution;
use crate::db::DatabasePool;
use chrono::Utc;

/// Execution repository for managing side-effect records
pub struct ExecutionRepository;

impl ExecutionRepository {
    /// Insert a new execution record
    ///
    /// `execution_key` is unique across the table, so a second insert for
    /// the same key fails with a unique-constraint error.
    pub async fn create(
        pool: &DatabasePool,
        execution: &Execution,
    ) -> Result<Execution, sqlx::Error> {
        sqlx::query_as::<_, Execution>(
            "INSERT INTO executions (id, proposal_id, execution_key, status, provider_ref,
                                     created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&execution.id)
        .bind(&execution.proposal_id)
        .bind(&execution.execution_key)
        .bind(&execution.status)
        .bind(&execution.provider_ref)
        .bind(&execution.created_at)
        .bind(&execution.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Get an execution by its key
    pub async fn get_by_key(
        pool: &DatabasePool,
        execution_key: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE execution_key = ?")
            .bind(execution_key)
            .fetch_optional(pool)
            .await
    }

    /// Mark an execution dispatched with the provider's reference
    pub async fn mark_dispatched(
        pool: &DatabasePool,
        id: &str,
        provider_ref: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE executions SET status = 'dispatched', provider_ref = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(provider_ref)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark an execution failed
    pub async fn mark_failed(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE executions SET status = 'failed', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Whether a proposal has an execution that is not failed
    ///
    /// Used by the resume pre-flight: a live execution means the side effect
    /// already happened (or is happening) and the resume must SKIP.
    pub async fn live_exists_for_proposal(
        pool: &DatabasePool,
        proposal_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM executions WHERE proposal_id = ? AND status != 'failed'",
        )
        .bind(proposal_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0 > 0)
    }

    /// Count executions referencing a proposal
    pub async fn count_for_proposal(
        pool: &DatabasePool,
        proposal_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM executions WHERE proposal_id = ?")
            .bind(proposal_id)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}
