//! Case model - the aggregate for one records request
//!
//! Cases are created by collaborators and mutated only by the engine or
//! explicit human actions; they are never destroyed, only marked closed or
//! withdrawn.

use super::enums::{AutopilotMode, CaseStatus, ReviewState};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One public-records request to one agency
///
/// # Timestamps
/// All timestamp fields are RFC3339 strings due to SQLite type limitations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Case {
    /// Unique case identifier (UUID string)
    pub id: String,

    /// Agency the request was filed with
    pub agency_name: String,

    /// Agency contact address for outbound correspondence
    pub agency_email: Option<String>,

    /// Jurisdiction the request falls under
    pub jurisdiction: Option<String>,

    /// The records request text itself
    pub request_text: String,

    /// Current case status (see [`CaseStatus`])
    pub status: String,

    /// UI-visible review projection (see [`ReviewState`])
    pub review_state: String,

    /// Gate-bypass policy (see [`AutopilotMode`])
    pub autopilot_mode: String,

    /// Ordered constraint tags as a JSON array (e.g. `fee_required`)
    pub constraints: String,

    /// Ordered scope items as a JSON array
    pub scope_items: String,

    /// Quoted fee amount, if the agency quoted one
    pub fee_amount: Option<f64>,

    /// Status of the fee quote (quoted/accepted/declined)
    pub fee_status: Option<String>,

    /// Agency portal URL, if the agency redirected to a portal
    pub portal_url: Option<String>,

    /// Agency response deadline (RFC3339)
    pub response_deadline: Option<String>,

    /// Set when a safety rule or failure forces human attention
    pub requires_human: i64,

    /// Creation timestamp (RFC3339)
    pub created_at: String,

    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl Case {
    /// Create a new draft case
    pub fn new(id: String, agency_name: String, request_text: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            agency_name,
            agency_email: None,
            jurisdiction: None,
            request_text,
            status: CaseStatus::Draft.as_str().to_string(),
            review_state: ReviewState::Idle.as_str().to_string(),
            autopilot_mode: AutopilotMode::Supervised.as_str().to_string(),
            constraints: "[]".to_string(),
            scope_items: "[]".to_string(),
            fee_amount: None,
            fee_status: None,
            portal_url: None,
            response_deadline: None,
            requires_human: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Builder method to set the agency email
    pub fn with_agency_email(mut self, email: impl Into<String>) -> Self {
        self.agency_email = Some(email.into());
        self
    }

    /// Builder method to set the autopilot mode
    pub fn with_autopilot_mode(mut self, mode: AutopilotMode) -> Self {
        self.autopilot_mode = mode.as_str().to_string();
        self
    }

    /// Typed status, if the stored text is valid
    pub fn case_status(&self) -> Option<CaseStatus> {
        self.status.parse().ok()
    }

    /// Typed autopilot mode, defaulting to supervised on bad data
    pub fn mode(&self) -> AutopilotMode {
        self.autopilot_mode.parse().unwrap_or(AutopilotMode::Supervised)
    }

    /// Constraint tags decoded from the JSON column
    pub fn constraint_tags(&self) -> Vec<String> {
        serde_json::from_str(&self.constraints).unwrap_or_default()
    }
}
