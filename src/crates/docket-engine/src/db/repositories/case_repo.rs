//! Case repository for database operations

use crate::db::models::{Case, CaseStatus, ReviewState};
use crate::db::DatabasePool;
use chrono::Utc;

/// Case repository for managing case rows
pub struct CaseRepository;

impl CaseRepository {
    /// Insert a new case
    pub async fn create(pool: &DatabasePool, case: &Case) -> Result<Case, sqlx::Error> {
        sqlx::query_as::<_, Case>(
            "INSERT INTO cases (id, agency_name, agency_email, jurisdiction, request_text,
                                status, review_state, autopilot_mode, constraints, scope_items,
                                fee_amount, fee_status, portal_url, response_deadline,
                                requires_human, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&case.id)
        .bind(&case.agency_name)
        .bind(&case.agency_email)
        .bind(&case.jurisdiction)
        .bind(&case.request_text)
        .bind(&case.status)
        .bind(&case.review_state)
        .bind(&case.autopilot_mode)
        .bind(&case.constraints)
        .bind(&case.scope_items)
        .bind(case.fee_amount)
        .bind(&case.fee_status)
        .bind(&case.portal_url)
        .bind(&case.response_deadline)
        .bind(case.requires_human)
        .bind(&case.created_at)
        .bind(&case.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Get a case by ID
    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<Case>, sqlx::Error> {
        sqlx::query_as::<_, Case>("SELECT * FROM cases WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Update case status
    pub async fn update_status(
        pool: &DatabasePool,
        id: &str,
        status: CaseStatus,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cases SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Update the review-state projection
    pub async fn update_review_state(
        pool: &DatabasePool,
        id: &str,
        review_state: ReviewState,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cases SET review_state = ?, updated_at = ? WHERE id = ?")
            .bind(review_state.as_str())
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Set or clear the human-attention flag
    pub async fn set_requires_human(
        pool: &DatabasePool,
        id: &str,
        requires_human: bool,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cases SET requires_human = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(requires_human))
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Replace the constraint-tag and scope-item JSON columns
    pub async fn update_constraints(
        pool: &DatabasePool,
        id: &str,
        constraints_json: &str,
        scope_items_json: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE cases SET constraints = ?, scope_items = ?, updated_at = ? WHERE id = ?",
        )
        .bind(constraints_json)
        .bind(scope_items_json)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a fee quote on the case
    pub async fn set_fee(
        pool: &DatabasePool,
        id: &str,
        amount: f64,
        fee_status: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cases SET fee_amount = ?, fee_status = ?, updated_at = ? WHERE id = ?")
            .bind(amount)
            .bind(fee_status)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a portal URL on the case
    pub async fn set_portal_url(
        pool: &DatabasePool,
        id: &str,
        portal_url: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE cases SET portal_url = ?, updated_at = ? WHERE id = ?")
            .bind(portal_url)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::test_in_memory().await.unwrap();

        let case = Case::new("c-1".into(), "Agency".into(), "all emails".into());
        let created = CaseRepository::create(db.pool(), &case).await.unwrap();
        assert_eq!(created.id, "c-1");

        let fetched = CaseRepository::get_by_id(db.pool(), "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.agency_name, "Agency");
        assert_eq!(fetched.status, "draft");
    }

    #[tokio::test]
    async fn test_status_and_review_state_updates() {
        let db = Database::test_in_memory().await.unwrap();
        let case = Case::new("c-1".into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();

        CaseRepository::update_status(db.pool(), "c-1", CaseStatus::PortalRequired)
            .await
            .unwrap();
        CaseRepository::update_review_state(db.pool(), "c-1", ReviewState::DecisionRequired)
            .await
            .unwrap();

        let fetched = CaseRepository::get_by_id(db.pool(), "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, "portal_required");
        assert_eq!(fetched.review_state, "decision_required");
    }

    #[tokio::test]
    async fn test_fee_and_portal_updates() {
        let db = Database::test_in_memory().await.unwrap();
        let case = Case::new("c-1".into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();

        CaseRepository::set_fee(db.pool(), "c-1", 250.0, "quoted")
            .await
            .unwrap();
        CaseRepository::set_portal_url(db.pool(), "c-1", "https://portal.example.com/X")
            .await
            .unwrap();

        let fetched = CaseRepository::get_by_id(db.pool(), "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.fee_amount, Some(250.0));
        assert_eq!(
            fetched.portal_url.as_deref(),
            Some("https://portal.example.com/X")
        );
    }

    #[tokio::test]
    async fn test_constraint_update() {
        let db = Database::test_in_memory().await.unwrap();
        let case = Case::new("c-1".into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();

        CaseRepository::update_constraints(
            db.pool(),
            "c-1",
            r#"["fee_required","id_required"]"#,
            r#"["2019-2021 emails"]"#,
        )
        .await
        .unwrap();

        let fetched = CaseRepository::get_by_id(db.pool(), "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            fetched.constraint_tags(),
            vec!["fee_required".to_string(), "id_required".to_string()]
        );
    }
}
