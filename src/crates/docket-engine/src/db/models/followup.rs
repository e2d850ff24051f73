//! Follow-up schedule model - a pending scheduled trigger

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One scheduled follow-up for a case
///
/// `scheduled_key` (`followup:{case}:{attempt}:{yyyy-mm-dd}`) is unique, so
/// firing the same tick twice yields at most one run. Paused or completed
/// schedules produce SKIPPED runs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FollowUpSchedule {
    /// Unique schedule identifier (UUID string)
    pub id: String,

    /// Owning case
    pub case_id: String,

    /// When the follow-up is due (RFC3339)
    pub due_at: String,

    /// Attempt counter (1-based)
    pub attempt: i64,

    /// Set to pause the schedule without deleting it
    pub paused: i64,

    /// Deterministic slot identity
    pub scheduled_key: String,

    /// Set when the follow-up fired and its run completed
    pub completed_at: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,
}

impl FollowUpSchedule {
    /// Whether this schedule should still produce a run
    pub fn is_live(&self) -> bool {
        self.paused == 0 && self.completed_at.is_none()
    }
}
