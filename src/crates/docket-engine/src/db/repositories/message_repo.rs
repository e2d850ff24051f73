//! Message repository for database operations

use crate::db::models::Message;
use crate::db::DatabasePool;
use chrono::Utc;

/// Message repository for managing correspondence rows
pub struct MessageRepository;

impl MessageRepository {
    /// Insert a new message
    ///
    /// `provider_message_id` is unique; a duplicate webhook delivery fails
    /// with a unique-constraint error the caller treats as an idempotency
    /// hit.
    pub async fn create(pool: &DatabasePool, message: &Message) -> Result<Message, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, case_id, direction, provider_message_id, subject,
                                   body_ref, received_at, processed_at, processed_run_id,
                                   created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&message.id)
        .bind(&message.case_id)
        .bind(&message.direction)
        .bind(&message.provider_message_id)
        .bind(&message.subject)
        .bind(&message.body_ref)
        .bind(&message.received_at)
        .bind(&message.processed_at)
        .bind(&message.processed_run_id)
        .bind(&message.created_at)
        .fetch_one(pool)
        .await
    }

    /// Get a message by ID
    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Latest inbound message for a case
    pub async fn latest_inbound(
        pool: &DatabasePool,
        case_id: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE case_id = ? AND direction = 'inbound'
             ORDER BY received_at DESC
             LIMIT 1",
        )
        .bind(case_id)
        .fetch_optional(pool)
        .await
    }

    /// Conditionally mark a message processed by a run
    ///
    /// Returns `false` when `processed_at` was already set - at most one
    /// successful run ever processes an inbound message.
    pub async fn mark_processed(
        pool: &DatabasePool,
        message_id: &str,
        run_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE messages SET processed_at = ?, processed_run_id = ?
             WHERE id = ? AND processed_at IS NULL",
        )
        .bind(&now)
        .bind(run_id)
        .bind(message_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Case;
    use crate::db::repositories::CaseRepository;
    use crate::db::Database;
    use crate::error::is_unique_violation;

    async fn seed_case(db: &Database, id: &str) {
        let case = Case::new(id.into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_latest_inbound() {
        let db = Database::test_in_memory().await.unwrap();
        seed_case(&db, "c-1").await;

        let first = Message::inbound("m-1".into(), "c-1".into(), "prov-1".into());
        MessageRepository::create(db.pool(), &first).await.unwrap();

        let mut second = Message::inbound("m-2".into(), "c-1".into(), "prov-2".into());
        second.received_at = "2030-01-01T00:00:00+00:00".to_string();
        MessageRepository::create(db.pool(), &second).await.unwrap();

        let latest = MessageRepository::latest_inbound(db.pool(), "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "m-2");
    }

    #[tokio::test]
    async fn test_duplicate_provider_id_rejected() {
        let db = Database::test_in_memory().await.unwrap();
        seed_case(&db, "c-1").await;

        let first = Message::inbound("m-1".into(), "c-1".into(), "prov-dup".into());
        MessageRepository::create(db.pool(), &first).await.unwrap();

        let second = Message::inbound("m-2".into(), "c-1".into(), "prov-dup".into());
        let err = MessageRepository::create(db.pool(), &second)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_mark_processed_once() {
        let db = Database::test_in_memory().await.unwrap();
        seed_case(&db, "c-1").await;

        let msg = Message::inbound("m-1".into(), "c-1".into(), "prov-1".into());
        MessageRepository::create(db.pool(), &msg).await.unwrap();

        let first = MessageRepository::mark_processed(db.pool(), "m-1", "r-1")
            .await
            .unwrap();
        assert!(first);

        let second = MessageRepository::mark_processed(db.pool(), "m-1", "r-2")
            .await
            .unwrap();
        assert!(!second);

        let fetched = MessageRepository::get_by_id(db.pool(), "m-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.processed_run_id.as_deref(), Some("r-1"));
    }
}
