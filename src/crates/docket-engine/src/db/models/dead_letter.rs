//! Dead-letter model - a failed-past-retries job preserved for diagnosis

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A job the queue gave up on
///
/// Carries enough context to diagnose and optionally replay: queue, job
/// name, original payload, final error, attempt count, and the owning case.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeadLetterEntry {
    /// Unique entry identifier (UUID string)
    pub id: String,

    /// Queue the job died on
    pub queue: String,

    /// Job name
    pub job_name: String,

    /// Original payload as JSON
    pub payload: String,

    /// Final error text
    pub error: String,

    /// Attempts consumed before dead-lettering
    pub attempts: i64,

    /// Owning case, when the payload named one
    pub case_id: Option<String>,

    /// Set when an operator replayed this entry (RFC3339)
    pub replayed_at: Option<String>,

    /// Set when an operator discarded this entry (RFC3339)
    pub discarded_at: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,
}

impl DeadLetterEntry {
    /// Whether the entry is still awaiting operator action
    pub fn is_open(&self) -> bool {
        self.replayed_at.is_none() && self.discarded_at.is_none()
    }
}
