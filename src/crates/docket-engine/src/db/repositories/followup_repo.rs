//! Follow-up schedule repository for database operations

use crate::db::models::FollowUpSchedule;
use crate::db::DatabasePool;
use crate::error::is_unique_violation;
use chrono::{DateTime, Utc};

/// Follow-up repository for managing scheduled triggers
pub struct FollowUpRepository;

impl FollowUpRepository {
    /// Acquire the unique slot for a scheduled follow-up
    ///
    /// Inserts a row keyed by `scheduled_key`; returns `None` when the slot
    /// is already taken. Firing the same tick N times yields one row.
    pub async fn acquire_slot(
        pool: &DatabasePool,
        id: &str,
        case_id: &str,
        due_at: DateTime<Utc>,
        attempt: i64,
        scheduled_key: &str,
    ) -> Result<Option<FollowUpSchedule>, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query_as::<_, FollowUpSchedule>(
            "INSERT INTO followup_schedules (id, case_id, due_at, attempt, paused,
                                             scheduled_key, completed_at, created_at)
             VALUES (?, ?, ?, ?, 0, ?, NULL, ?)
             RETURNING *",
        )
        .bind(id)
        .bind(case_id)
        .bind(due_at.to_rfc3339())
        .bind(attempt)
        .bind(scheduled_key)
        .bind(&now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(schedule) => Ok(Some(schedule)),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Get a schedule by ID
    pub async fn get_by_id(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<FollowUpSchedule>, sqlx::Error> {
        sqlx::query_as::<_, FollowUpSchedule>("SELECT * FROM followup_schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Mark a schedule completed
    pub async fn mark_completed(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE followup_schedules SET completed_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Pause or unpause a schedule
    pub async fn set_paused(
        pool: &DatabasePool,
        id: &str,
        paused: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE followup_schedules SET paused = ? WHERE id = ?")
            .bind(i64::from(paused))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Live schedules due at or before `now` (scheduler tick input)
    pub async fn due_before(
        pool: &DatabasePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<FollowUpSchedule>, sqlx::Error> {
        sqlx::query_as::<_, FollowUpSchedule>(
            "SELECT * FROM followup_schedules
             WHERE paused = 0 AND completed_at IS NULL AND due_at <= ?
             ORDER BY due_at ASC",
        )
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await
    }
}
