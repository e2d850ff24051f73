//! Message model - one unit of correspondence on a case

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Inbound or outbound correspondence
///
/// Bodies live with the mail collaborator; the engine stores a reference.
/// Once `processed_at` is set the row is immutable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    /// Unique message identifier (UUID string)
    pub id: String,

    /// Owning case
    pub case_id: String,

    /// `inbound` or `outbound`
    pub direction: String,

    /// Provider-assigned identifier, unique across all messages
    pub provider_message_id: String,

    /// Subject line
    pub subject: Option<String>,

    /// Reference to the body held by the mail collaborator
    pub body_ref: Option<String>,

    /// When the provider received the message (RFC3339)
    pub received_at: String,

    /// Set exactly once, by the single run that processed this message
    pub processed_at: Option<String>,

    /// The run that processed this message
    pub processed_run_id: Option<String>,

    /// Row creation timestamp (RFC3339)
    pub created_at: String,
}

impl Message {
    /// Create a new inbound message
    pub fn inbound(id: String, case_id: String, provider_message_id: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            case_id,
            direction: "inbound".to_string(),
            provider_message_id,
            subject: None,
            body_ref: None,
            received_at: now.clone(),
            processed_at: None,
            processed_run_id: None,
            created_at: now,
        }
    }

    /// Builder method to set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Builder method to set the body reference
    pub fn with_body_ref(mut self, body_ref: impl Into<String>) -> Self {
        self.body_ref = Some(body_ref.into());
        self
    }

    /// Whether a run already processed this message
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
