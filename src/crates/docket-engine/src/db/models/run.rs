//! Run model - one engine attempt at one trigger for one case

use super::enums::{RunStatus, TriggerType};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One attempt to execute a trigger against a case
///
/// Allocated at job-enqueue time so the audit trail exists even when the
/// lock is contended and the run ends SKIPPED. The reaper reconciles rows
/// left RUNNING past their lock TTL.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    /// Unique run identifier (UUID string)
    pub id: String,

    /// Owning case
    pub case_id: String,

    /// What caused this run (see [`TriggerType`])
    pub trigger_type: String,

    /// Inbound message being processed, if any
    pub message_id: Option<String>,

    /// Follow-up schedule that fired, if any
    pub followup_id: Option<String>,

    /// Proposal produced or resumed by this run, if any
    pub proposal_id: Option<String>,

    /// Lifecycle status (see [`RunStatus`])
    pub status: String,

    /// Graph thread this run executed under
    pub thread_id: Option<String>,

    /// Ordered node names the graph executed, as a JSON array
    pub node_trace: String,

    /// Why the run was skipped, when status is `skipped`
    pub skip_reason: Option<String>,

    /// Error description, when status is `failed`
    pub error_message: Option<String>,

    /// Interrupt payload recorded when the run suspended, as JSON
    pub interrupt_value: Option<String>,

    /// Set by the reaper when it reclaimed this run
    pub recovery_attempted: i64,

    /// When the handler started executing (RFC3339)
    pub started_at: Option<String>,

    /// When the run reached a terminal or waiting state (RFC3339)
    pub ended_at: Option<String>,

    /// Last heartbeat refresh (RFC3339)
    pub heartbeat_at: Option<String>,

    /// Authoritative lock expiry; extended by each heartbeat (RFC3339)
    pub lock_expires_at: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,

    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl Run {
    /// Create a run in CREATED status
    pub fn new(id: String, case_id: String, trigger_type: TriggerType) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            case_id,
            trigger_type: trigger_type.as_str().to_string(),
            message_id: None,
            followup_id: None,
            proposal_id: None,
            status: RunStatus::Created.as_str().to_string(),
            thread_id: None,
            node_trace: "[]".to_string(),
            skip_reason: None,
            error_message: None,
            interrupt_value: None,
            recovery_attempted: 0,
            started_at: None,
            ended_at: None,
            heartbeat_at: None,
            lock_expires_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Builder method to link the inbound message
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Builder method to link the follow-up schedule
    pub fn with_followup(mut self, followup_id: impl Into<String>) -> Self {
        self.followup_id = Some(followup_id.into());
        self
    }

    /// Builder method to link the proposal being resumed
    pub fn with_proposal(mut self, proposal_id: impl Into<String>) -> Self {
        self.proposal_id = Some(proposal_id.into());
        self
    }

    /// Typed status, if the stored text is valid
    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }

    /// Typed trigger, if the stored text is valid
    pub fn trigger(&self) -> Option<TriggerType> {
        self.trigger_type.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run() {
        let run = Run::new("r-1".into(), "c-1".into(), TriggerType::InboundMessage)
            .with_message("m-1");

        assert_eq!(run.status, "created");
        assert_eq!(run.trigger(), Some(TriggerType::InboundMessage));
        assert_eq!(run.message_id.as_deref(), Some("m-1"));
        assert_eq!(run.recovery_attempted, 0);
    }
}
