//! Proposal model - an engine-authored candidate action for a case

use super::enums::{ActionType, ProposalStatus};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Candidate action awaiting auto-execution or human decision
///
/// `proposal_key` is deterministic per (case, message, action, attempt) so
/// duplicate enqueues collapse to a single row. `execution_key` is claimed
/// atomically at most once; the claim is the only exactly-once gate for side
/// effects.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Proposal {
    /// Unique proposal identifier (UUID string)
    pub id: String,

    /// Owning case
    pub case_id: String,

    /// Inbound message this proposal responds to, if any
    pub message_id: Option<String>,

    /// Deterministic identity: `{case}:{message|no-msg}:{action}:{attempt}`
    pub proposal_key: String,

    /// Proposed action (see [`ActionType`])
    pub action_type: String,

    /// Attempt counter within the proposal key
    pub attempt: i64,

    /// Draft subject for outbound correspondence
    pub subject: Option<String>,

    /// Reference to the draft body
    pub body_ref: Option<String>,

    /// Reasoning items as a JSON array
    pub reasoning: String,

    /// Risk flags as a JSON array
    pub risk_flags: String,

    /// Classifier/drafter confidence
    pub confidence: Option<f64>,

    /// Lifecycle status (see [`ProposalStatus`])
    pub status: String,

    /// Why the proposal paused for a human, when gated
    pub pause_reason: Option<String>,

    /// Claimed exactly once before dispatch; unique when set
    pub execution_key: Option<String>,

    /// Human decision recorded by the review UI
    pub human_action: Option<String>,

    /// Optional human instruction accompanying the decision
    pub human_note: Option<String>,

    /// When the side effect was confirmed dispatched (RFC3339)
    pub executed_at: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,

    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl Proposal {
    /// Create a new draft proposal
    pub fn draft(
        id: String,
        case_id: String,
        proposal_key: String,
        action_type: ActionType,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            case_id,
            message_id: None,
            proposal_key,
            action_type: action_type.as_str().to_string(),
            attempt: 0,
            subject: None,
            body_ref: None,
            reasoning: "[]".to_string(),
            risk_flags: "[]".to_string(),
            confidence: None,
            status: ProposalStatus::Draft.as_str().to_string(),
            pause_reason: None,
            execution_key: None,
            human_action: None,
            human_note: None,
            executed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Builder method to link the inbound message
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Builder method to set the draft content
    pub fn with_draft(mut self, subject: impl Into<String>, body_ref: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.body_ref = Some(body_ref.into());
        self
    }

    /// Typed status, if the stored text is valid
    pub fn proposal_status(&self) -> Option<ProposalStatus> {
        self.status.parse().ok()
    }

    /// Typed action, if the stored text is valid
    pub fn action(&self) -> Option<ActionType> {
        self.action_type.parse().ok()
    }

    /// Whether the proposal has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.proposal_status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}
