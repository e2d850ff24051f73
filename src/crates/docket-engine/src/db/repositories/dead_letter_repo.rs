//! Dead-letter repository for database operations

use crate::db::models::DeadLetterEntry;
use crate::db::DatabasePool;
use chrono::Utc;

/// Dead-letter repository for managing failed-past-retries jobs
pub struct DeadLetterRepository;

impl DeadLetterRepository {
    /// Insert a new dead-letter entry
    pub async fn create(
        pool: &DatabasePool,
        entry: &DeadLetterEntry,
    ) -> Result<DeadLetterEntry, sqlx::Error> {
        sqlx::query_as::<_, DeadLetterEntry>(
            "INSERT INTO dead_letters (id, queue, job_name, payload, error, attempts, case_id,
                                       replayed_at, discarded_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&entry.id)
        .bind(&entry.queue)
        .bind(&entry.job_name)
        .bind(&entry.payload)
        .bind(&entry.error)
        .bind(entry.attempts)
        .bind(&entry.case_id)
        .bind(&entry.replayed_at)
        .bind(&entry.discarded_at)
        .bind(&entry.created_at)
        .fetch_one(pool)
        .await
    }

    /// Get an entry by ID
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<DeadLetterEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetterEntry>("SELECT * FROM dead_letters WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Entries still awaiting operator action, newest first
    pub async fn list_open(pool: &DatabasePool) -> Result<Vec<DeadLetterEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetterEntry>(
            "SELECT * FROM dead_letters
             WHERE replayed_at IS NULL AND discarded_at IS NULL
             ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
    }

    /// Record that an operator replayed this entry
    pub async fn mark_replayed(pool: &DatabasePool, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE dead_letters SET replayed_at = ?
             WHERE id = ? AND replayed_at IS NULL AND discarded_at IS NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that an operator discarded this entry
    pub async fn mark_discarded(pool: &DatabasePool, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE dead_letters SET discarded_at = ?
             WHERE id = ? AND replayed_at IS NULL AND discarded_at IS NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
