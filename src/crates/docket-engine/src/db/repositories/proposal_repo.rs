//! Proposal repository for database operations
//!
//! Holds the two atomic primitives the exactly-once guarantees hinge on:
//! [`ProposalRepository::claim_execution`] and
//! [`ProposalRepository::upsert_by_key`].

use crate::db::models::{HumanAction, PauseReason, Proposal, ProposalStatus};
use crate::db::DatabasePool;
use crate::error::is_unique_violation;
use chrono::Utc;

/// Proposal repository for managing candidate actions
pub struct ProposalRepository;

impl ProposalRepository {
    /// Insert a new proposal
    pub async fn create(pool: &DatabasePool, proposal: &Proposal) -> Result<Proposal, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(
            "INSERT INTO proposals (id, case_id, message_id, proposal_key, action_type, attempt,
                                    subject, body_ref, reasoning, risk_flags, confidence, status,
                                    pause_reason, execution_key, human_action, human_note,
                                    executed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&proposal.id)
        .bind(&proposal.case_id)
        .bind(&proposal.message_id)
        .bind(&proposal.proposal_key)
        .bind(&proposal.action_type)
        .bind(proposal.attempt)
        .bind(&proposal.subject)
        .bind(&proposal.body_ref)
        .bind(&proposal.reasoning)
        .bind(&proposal.risk_flags)
        .bind(proposal.confidence)
        .bind(&proposal.status)
        .bind(&proposal.pause_reason)
        .bind(&proposal.execution_key)
        .bind(&proposal.human_action)
        .bind(&proposal.human_note)
        .bind(&proposal.executed_at)
        .bind(&proposal.created_at)
        .bind(&proposal.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Get a proposal by ID
    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>("SELECT * FROM proposals WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Get a proposal by its deterministic key
    pub async fn get_by_key(
        pool: &DatabasePool,
        proposal_key: &str,
    ) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>("SELECT * FROM proposals WHERE proposal_key = ?")
            .bind(proposal_key)
            .fetch_optional(pool)
            .await
    }

    /// Insert-or-update by `proposal_key`, never duplicating
    ///
    /// - no existing row: insert the entry
    /// - existing non-terminal row: refresh its draft/reasoning fields
    /// - existing terminal row: return it unchanged
    ///
    /// A concurrent insert racing on the key is absorbed by re-reading the
    /// winner.
    pub async fn upsert_by_key(
        pool: &DatabasePool,
        entry: &Proposal,
    ) -> Result<Proposal, sqlx::Error> {
        if let Some(existing) = Self::get_by_key(pool, &entry.proposal_key).await? {
            return Self::refresh_existing(pool, &existing, entry).await;
        }

        match Self::create(pool, entry).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => {
                // Lost the insert race; the winner's row is the identity
                let existing = Self::get_by_key(pool, &entry.proposal_key)
                    .await?
                    .ok_or(err)?;
                Self::refresh_existing(pool, &existing, entry).await
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_existing(
        pool: &DatabasePool,
        existing: &Proposal,
        entry: &Proposal,
    ) -> Result<Proposal, sqlx::Error> {
        if existing.is_terminal() {
            return Ok(existing.clone());
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query_as::<_, Proposal>(
            "UPDATE proposals
             SET subject = ?, body_ref = ?, reasoning = ?, risk_flags = ?, confidence = ?,
                 updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(&entry.subject)
        .bind(&entry.body_ref)
        .bind(&entry.reasoning)
        .bind(&entry.risk_flags)
        .bind(entry.confidence)
        .bind(&now)
        .bind(&existing.id)
        .fetch_one(pool)
        .await
    }

    /// Atomically claim the execution slot for a proposal
    ///
    /// Succeeds iff the proposal is PENDING_APPROVAL or APPROVED and its
    /// `execution_key` is still null; sets the key and advances the status
    /// to APPROVED in the same statement. Never blocks.
    pub async fn claim_execution(
        pool: &DatabasePool,
        proposal_id: &str,
        execution_key: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE proposals
             SET execution_key = ?, status = 'approved', updated_at = ?
             WHERE id = ?
               AND execution_key IS NULL
               AND status IN ('pending_approval', 'approved')",
        )
        .bind(execution_key)
        .bind(&now)
        .bind(proposal_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a draft or auto-executable proposal into the human gate
    pub async fn mark_pending(
        pool: &DatabasePool,
        id: &str,
        pause_reason: PauseReason,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE proposals SET status = 'pending_approval', pause_reason = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(pause_reason.as_str())
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Advance a proposal to APPROVED from DRAFT or DECISION_RECEIVED
    ///
    /// Used on the auto-execute path (draft, no gate) and when applying an
    /// APPROVE decision. Returns `false` when the proposal is in any other
    /// status.
    pub async fn mark_approved(pool: &DatabasePool, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE proposals SET status = 'approved', updated_at = ?
             WHERE id = ? AND status IN ('draft', 'decision_received')",
        )
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a human decision on a pending proposal
    ///
    /// Returns `false` when the proposal was not PENDING_APPROVAL (already
    /// decided, superseded, or executed).
    pub async fn record_decision(
        pool: &DatabasePool,
        id: &str,
        action: HumanAction,
        note: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE proposals
             SET status = 'decision_received', human_action = ?, human_note = ?, updated_at = ?
             WHERE id = ? AND status = 'pending_approval'",
        )
        .bind(action.as_str())
        .bind(note)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unconditionally set a proposal status
    pub async fn update_status(
        pool: &DatabasePool,
        id: &str,
        status: ProposalStatus,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE proposals SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark an approved proposal executed
    pub async fn mark_executed(pool: &DatabasePool, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE proposals SET status = 'executed', executed_at = ?, updated_at = ?
             WHERE id = ? AND status = 'approved'",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Supersede every pending proposal on a case except the named one
    ///
    /// Returns how many rows transitioned. Run before persisting a new
    /// proposal when fresher inbound information makes the old one stale.
    pub async fn supersede_pending(
        pool: &DatabasePool,
        case_id: &str,
        except_id: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE proposals SET status = 'superseded', updated_at = ?
             WHERE case_id = ? AND status = 'pending_approval' AND id != ?",
        )
        .bind(&now)
        .bind(case_id)
        .bind(except_id.unwrap_or(""))
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// The pending proposal for a case, if one exists
    pub async fn pending_for_case(
        pool: &DatabasePool,
        case_id: &str,
    ) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(
            "SELECT * FROM proposals
             WHERE case_id = ? AND status = 'pending_approval'
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(case_id)
        .fetch_optional(pool)
        .await
    }

    /// The most recent proposal for a case regardless of status
    pub async fn latest_for_case(
        pool: &DatabasePool,
        case_id: &str,
    ) -> Result<Option<Proposal>, sqlx::Error> {
        sqlx::query_as::<_, Proposal>(
            "SELECT * FROM proposals
             WHERE case_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(case_id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ActionType, Case};
    use crate::db::repositories::CaseRepository;
    use crate::db::Database;

    async fn seed(db: &Database) {
        let case = Case::new("c-1".into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();
    }

    fn fee_proposal(id: &str, key: &str) -> Proposal {
        Proposal::draft(id.into(), "c-1".into(), key.into(), ActionType::AcceptFee)
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let first = fee_proposal("p-1", "c-1:m-1:accept_fee:0").with_draft("s1", "b1");
        let created = ProposalRepository::upsert_by_key(db.pool(), &first)
            .await
            .unwrap();
        assert_eq!(created.id, "p-1");

        // Same key, new draft content, different row id: must update in place
        let second = fee_proposal("p-2", "c-1:m-1:accept_fee:0").with_draft("s2", "b2");
        let updated = ProposalRepository::upsert_by_key(db.pool(), &second)
            .await
            .unwrap();
        assert_eq!(updated.id, "p-1");
        assert_eq!(updated.subject.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_upsert_returns_terminal_unchanged() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let first = fee_proposal("p-1", "key-1").with_draft("original", "b1");
        ProposalRepository::upsert_by_key(db.pool(), &first)
            .await
            .unwrap();
        ProposalRepository::update_status(db.pool(), "p-1", ProposalStatus::Dismissed)
            .await
            .unwrap();

        let retry = fee_proposal("p-2", "key-1").with_draft("rewritten", "b2");
        let result = ProposalRepository::upsert_by_key(db.pool(), &retry)
            .await
            .unwrap();
        assert_eq!(result.id, "p-1");
        assert_eq!(result.subject.as_deref(), Some("original"));
        assert_eq!(result.status, "dismissed");
    }

    #[tokio::test]
    async fn test_claim_execution_exactly_once() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let proposal = fee_proposal("p-1", "key-1");
        ProposalRepository::create(db.pool(), &proposal).await.unwrap();
        ProposalRepository::mark_pending(db.pool(), "p-1", PauseReason::FeeQuote)
            .await
            .unwrap();

        let first = ProposalRepository::claim_execution(db.pool(), "p-1", "exec-1")
            .await
            .unwrap();
        assert!(first);

        let second = ProposalRepository::claim_execution(db.pool(), "p-1", "exec-2")
            .await
            .unwrap();
        assert!(!second);

        let fetched = ProposalRepository::get_by_id(db.pool(), "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.execution_key.as_deref(), Some("exec-1"));
        assert_eq!(fetched.status, "approved");
    }

    #[tokio::test]
    async fn test_claim_rejected_on_draft_and_terminal() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let proposal = fee_proposal("p-1", "key-1");
        ProposalRepository::create(db.pool(), &proposal).await.unwrap();

        // Still DRAFT: not claimable
        assert!(!ProposalRepository::claim_execution(db.pool(), "p-1", "k")
            .await
            .unwrap());

        ProposalRepository::update_status(db.pool(), "p-1", ProposalStatus::Superseded)
            .await
            .unwrap();
        assert!(!ProposalRepository::claim_execution(db.pool(), "p-1", "k")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_record_decision_requires_pending() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let proposal = fee_proposal("p-1", "key-1");
        ProposalRepository::create(db.pool(), &proposal).await.unwrap();

        // DRAFT: no decision possible
        assert!(
            !ProposalRepository::record_decision(db.pool(), "p-1", HumanAction::Approve, None)
                .await
                .unwrap()
        );

        ProposalRepository::mark_pending(db.pool(), "p-1", PauseReason::FeeQuote)
            .await
            .unwrap();
        assert!(ProposalRepository::record_decision(
            db.pool(),
            "p-1",
            HumanAction::Approve,
            Some("go ahead")
        )
        .await
        .unwrap());

        let fetched = ProposalRepository::get_by_id(db.pool(), "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, "decision_received");
        assert_eq!(fetched.human_note.as_deref(), Some("go ahead"));
    }

    #[tokio::test]
    async fn test_supersede_pending() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let old = fee_proposal("p-1", "key-1");
        ProposalRepository::create(db.pool(), &old).await.unwrap();
        ProposalRepository::mark_pending(db.pool(), "p-1", PauseReason::FeeQuote)
            .await
            .unwrap();

        let new = fee_proposal("p-2", "key-2");
        ProposalRepository::create(db.pool(), &new).await.unwrap();

        let count = ProposalRepository::supersede_pending(db.pool(), "c-1", Some("p-2"))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let fetched = ProposalRepository::get_by_id(db.pool(), "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, "superseded");

        // A superseded proposal cannot receive a decision
        assert!(
            !ProposalRepository::record_decision(db.pool(), "p-1", HumanAction::Approve, None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_mark_executed_requires_approved() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;

        let proposal = fee_proposal("p-1", "key-1");
        ProposalRepository::create(db.pool(), &proposal).await.unwrap();
        assert!(!ProposalRepository::mark_executed(db.pool(), "p-1")
            .await
            .unwrap());

        ProposalRepository::mark_pending(db.pool(), "p-1", PauseReason::FeeQuote)
            .await
            .unwrap();
        ProposalRepository::claim_execution(db.pool(), "p-1", "exec-1")
            .await
            .unwrap();
        assert!(ProposalRepository::mark_executed(db.pool(), "p-1")
            .await
            .unwrap());

        let fetched = ProposalRepository::get_by_id(db.pool(), "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, "executed");
        assert!(fetched.executed_at.is_some());
    }
}
