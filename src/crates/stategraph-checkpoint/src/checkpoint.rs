//! Checkpoint data structure
//!
//! A [`Checkpoint`] captures everything needed to re-enter a suspended graph:
//! the accumulated state blob, the node the runtime should execute next, and
//! any pending interrupt payload awaiting a resume value. The state blob is
//! opaque to the store; its encoding is owned by the graph runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One snapshot of in-flight graph state for a thread
///
/// Checkpoints form an append-only log per `thread_id`, ordered by `index`.
/// The caller assigns indices; stores only persist and retrieve them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identity of the conversation this snapshot belongs to
    pub thread_id: String,

    /// Position in the thread's append-only log (monotonically increasing)
    pub index: i64,

    /// Accumulated graph state at this point
    pub state: Value,

    /// Node the runtime should execute next when re-entering the thread
    pub next_node: Option<String>,

    /// Pending interrupt payload, set when the thread is suspended at a gate
    pub interrupt: Option<Value>,

    /// When this snapshot was written
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint for the given thread and index
    pub fn new(thread_id: impl Into<String>, index: i64, state: Value) -> Self {
        Self {
            thread_id: thread_id.into(),
            index,
            state,
            next_node: None,
            interrupt: None,
            created_at: Utc::now(),
        }
    }

    /// Set the node to execute on re-entry
    pub fn with_next_node(mut self, node: impl Into<String>) -> Self {
        self.next_node = Some(node.into());
        self
    }

    /// Attach a pending interrupt payload
    pub fn with_interrupt(mut self, interrupt: Value) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Whether this checkpoint represents a suspended thread
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_builder() {
        let cp = Checkpoint::new("case:1", 3, json!({"step": "draft"}))
            .with_next_node("gate_or_execute")
            .with_interrupt(json!({"proposal_id": "p-1"}));

        assert_eq!(cp.thread_id, "case:1");
        assert_eq!(cp.index, 3);
        assert_eq!(cp.next_node.as_deref(), Some("gate_or_execute"));
        assert!(cp.is_interrupted());
    }

    #[test]
    fn test_checkpoint_serialization_round_trip() {
        let cp = Checkpoint::new("initial:42", 0, json!({"count": 1}));
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.thread_id, cp.thread_id);
        assert_eq!(decoded.index, cp.index);
        assert_eq!(decoded.state, cp.state);
        assert!(!decoded.is_interrupted());
    }
}
