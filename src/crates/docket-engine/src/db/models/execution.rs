//! Execution model - a record of a performed external side effect

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One dispatched side effect (e.g. an outbound send handed to the mail
/// collaborator)
///
/// `execution_key` is unique across the table; inserting a second row for
/// the same key fails at the database, which is what makes approval
/// double-clicks harmless.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    /// Unique execution identifier (UUID string)
    pub id: String,

    /// Proposal this execution belongs to
    pub proposal_id: String,

    /// Idempotency key shared with the executor collaborator
    pub execution_key: String,

    /// Dispatch status: pending, dispatched, failed
    pub status: String,

    /// Provider-side reference returned by the executor
    pub provider_ref: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,

    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl Execution {
    /// Create a pending execution for a claimed proposal
    pub fn pending(id: String, proposal_id: String, execution_key: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            proposal_id,
            execution_key,
            status: "pending".to_string(),
            provider_ref: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_execution() {
        let exec = Execution::pending(
            "e-1".into(),
            "p-1".into(),
            "email-accept_fee-c-1-proposal-p-1".into(),
        );
        assert_eq!(exec.status, "pending");
        assert!(exec.provider_ref.is_none());
    }
}
