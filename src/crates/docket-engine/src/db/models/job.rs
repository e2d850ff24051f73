//! Job model - one row in the durable queue

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A queued unit of work
///
/// `job_id` is the caller-supplied idempotency identity: while a job with a
/// given `job_id` is queued or active, further enqueues with the same id are
/// suppressed. `id` is the row's own identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique row identifier (UUID string)
    pub id: String,

    /// Caller-supplied idempotency identity
    pub job_id: String,

    /// Queue name (agent, email, analysis, generation, portal)
    pub queue: String,

    /// Job name routed to a handler (e.g. `run-inbound-message`)
    pub name: String,

    /// Payload as JSON
    pub payload: String,

    /// queued, active, completed, failed, dead
    pub status: String,

    /// Attempts consumed so far
    pub attempt: i64,

    /// Attempts allowed by the queue's retry profile
    pub max_attempts: i64,

    /// Earliest time the job may be claimed (RFC3339)
    pub run_at: String,

    /// Error from the most recent failed attempt
    pub last_error: Option<String>,

    /// When the job reached a terminal status (RFC3339)
    pub finished_at: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,

    /// Last update timestamp (RFC3339)
    pub updated_at: String,
}

impl Job {
    /// Decode the payload into a typed value
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Case id embedded in the payload, if present
    pub fn case_id(&self) -> Option<String> {
        self.payload_as::<serde_json::Value>()
            .ok()
            .and_then(|v| v.get("case_id").and_then(|c| c.as_str()).map(String::from))
    }
}
