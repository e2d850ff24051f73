//! Shared graph state
//!
//! Both case graphs operate on one state record. Nodes read the typed
//! [`CaseGraphState`] view and return partial JSON deltas; the runtime
//! merges them with the reducers declared in [`schema`].

use crate::collaborators::{Classification, Draft};
use crate::db::models::{ActionType, HumanAction, PauseReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_core::{Reducer, StateSchema};

/// Snapshot of the case loaded into state by `load_context`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSnapshot {
    /// Agency name
    pub agency_name: String,
    /// Agency contact address
    pub agency_email: Option<String>,
    /// Case status text
    pub status: String,
    /// Autopilot mode text
    pub autopilot_mode: String,
    /// The records request text
    pub request_text: String,
    /// Constraint tags
    pub constraints: Vec<String>,
    /// Portal URL, when one is on record
    pub portal_url: Option<String>,
    /// Quoted fee, when one is on record
    pub fee_amount: Option<f64>,
}

/// Snapshot of the message being processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    /// Message id
    pub id: String,
    /// Subject line
    pub subject: Option<String>,
    /// Body reference
    pub body_ref: Option<String>,
}

/// Decision produced by `decide_next_action`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Chosen action
    pub action_type: ActionType,
    /// Short reasoning items
    pub reasoning: Vec<String>,
    /// Whether the action may run without a human gate
    pub can_auto_execute: bool,
    /// Whether a human must look regardless
    pub requires_human: bool,
    /// Why the gate pauses, when it does
    pub pause_reason: Option<PauseReason>,
}

/// Human decision delivered through a resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeDecision {
    /// Proposal the decision applies to
    pub proposal_id: String,
    /// The action taken
    pub action: HumanAction,
    /// Optional instruction (ADJUST)
    pub instruction: Option<String>,
}

/// Outcome recorded by `execute_action`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether a side effect was dispatched by this run
    pub dispatched: bool,
    /// Set when the claim failed because the key was already taken
    pub skipped_duplicate_execution: bool,
    /// Provider reference, when dispatched
    pub provider_ref: Option<String>,
}

/// Typed view over the graph state record
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaseGraphState {
    /// Case being worked
    #[serde(default)]
    pub case_id: String,

    /// Run executing this invocation
    #[serde(default)]
    pub run_id: String,

    /// Trigger type text
    #[serde(default)]
    pub trigger: String,

    /// Message the trigger referenced, if any
    #[serde(default)]
    pub message_id: Option<String>,

    /// Case snapshot loaded by `load_context`
    #[serde(default)]
    pub case: Option<CaseSnapshot>,

    /// Message snapshot loaded by `load_context`
    #[serde(default)]
    pub message: Option<MessageSnapshot>,

    /// Classifier output
    #[serde(default)]
    pub classification: Option<Classification>,

    /// Decision policy output
    #[serde(default)]
    pub decision: Option<Decision>,

    /// Drafter output
    #[serde(default)]
    pub draft: Option<Draft>,

    /// Accumulated risk flags
    #[serde(default)]
    pub risk_flags: Vec<String>,

    /// Proposal persisted by the gate
    #[serde(default)]
    pub proposal_id: Option<String>,

    /// Execution outcome
    #[serde(default)]
    pub execution: Option<ExecutionOutcome>,

    /// Routing hint consumed by the validated routers
    #[serde(default)]
    pub next_node: Option<String>,

    /// Human decision injected on resume
    #[serde(default)]
    pub resume: Option<ResumeDecision>,

    /// Set when a WITHDRAW decision closes the case
    #[serde(default)]
    pub withdraw_case: bool,

    /// Scheduled follow-up key written by `schedule_followups`
    #[serde(default)]
    pub followup_key: Option<String>,

    /// Attempt counter of the follow-up schedule that fired (0 otherwise)
    #[serde(default)]
    pub followup_attempt: i64,

    /// Follow-up schedule the trigger referenced, if any
    #[serde(default)]
    pub followup_id: Option<String>,
}

impl CaseGraphState {
    /// Decode the typed view from the raw state record
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Initial state for a fresh invocation
    pub fn initial(case_id: &str, run_id: &str, trigger: &str, message_id: Option<&str>) -> Value {
        serde_json::json!({
            "case_id": case_id,
            "run_id": run_id,
            "trigger": trigger,
            "message_id": message_id,
        })
    }

    /// Initial state for a scheduled follow-up invocation
    pub fn initial_followup(case_id: &str, run_id: &str, followup_id: &str, attempt: i64) -> Value {
        serde_json::json!({
            "case_id": case_id,
            "run_id": run_id,
            "trigger": "scheduled_followup",
            "followup_id": followup_id,
            "followup_attempt": attempt,
        })
    }

    /// Autopilot mode of the loaded case, defaulting to supervised
    pub fn mode(&self) -> crate::db::models::AutopilotMode {
        self.case
            .as_ref()
            .and_then(|c| c.autopilot_mode.parse().ok())
            .unwrap_or(crate::db::models::AutopilotMode::Supervised)
    }

    /// Portal URL from the classification or the case record
    pub fn portal_url(&self) -> Option<String> {
        self.classification
            .as_ref()
            .and_then(|c| c.portal_url.clone())
            .or_else(|| self.case.as_ref().and_then(|c| c.portal_url.clone()))
    }
}

/// Reducer schema shared by both graphs
///
/// Log-like fields append; expensive collaborator outputs survive nodes
/// that return `null` for them; everything else overwrites.
pub fn schema() -> StateSchema {
    StateSchema::new()
        .with_field("risk_flags", Reducer::AppendUnique)
        .with_field("classification", Reducer::PreserveOnNull)
        .with_field("decision", Reducer::PreserveOnNull)
        .with_field("draft", Reducer::PreserveOnNull)
        .with_field("case", Reducer::PreserveOnNull)
        .with_field("message", Reducer::PreserveOnNull)
        .with_field("proposal_id", Reducer::PreserveOnNull)
        .with_field("resume", Reducer::PreserveOnNull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stategraph_core::apply_delta;

    #[test]
    fn test_initial_state_decodes() {
        let value = CaseGraphState::initial("c-1", "r-1", "inbound_message", Some("m-1"));
        let state = CaseGraphState::from_value(&value).unwrap();
        assert_eq!(state.case_id, "c-1");
        assert_eq!(state.run_id, "r-1");
        assert_eq!(state.message_id.as_deref(), Some("m-1"));
        assert!(state.classification.is_none());
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        // The runtime injects its resume key into the record
        let value = json!({"case_id": "c-1", "__resume__": {"action": "approve"}});
        let state = CaseGraphState::from_value(&value).unwrap();
        assert_eq!(state.case_id, "c-1");
    }

    #[test]
    fn test_schema_preserves_classification_on_null() {
        let s = schema();
        let state = json!({"classification": {"schema_version": "docket/v1", "classification": "denial", "classification_confidence": 0.8, "requires_response": true}});
        let next = apply_delta(&s, &state, &json!({"classification": null, "proposal_id": "p-1"}));
        assert_eq!(next["classification"]["classification"], "denial");
        assert_eq!(next["proposal_id"], "p-1");
    }

    #[test]
    fn test_schema_appends_risk_flags() {
        let s = schema();
        let state = json!({"risk_flags": ["low_confidence"]});
        let next = apply_delta(&s, &state, &json!({"risk_flags": ["sensitive_content"]}));
        assert_eq!(next["risk_flags"], json!(["low_confidence", "sensitive_content"]));
    }
}
