//! Case graph nodes
//!
//! Every node is a pure async function of `(state, services)`. Nodes return
//! partial deltas; the gate returns an interrupt when a human must decide.
//! Engine-level routing hints travel in the `next_node` state field and are
//! validated by [`next_node_router`] - an out-of-set hint is logged and
//! treated as unset, never followed.

use crate::collaborators::{ClassifyContext, DraftContext, SendRequest};
use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::db::models::{ActionType, CaseStatus, HumanAction, PauseReason, Proposal, ReviewState};
use crate::db::repositories::{
    CaseRepository, ExecutionRepository, FollowUpRepository, MessageRepository,
    ProposalRepository,
};
use crate::db::DatabasePool;
use crate::error::{is_unique_violation, EngineError};
use crate::graphs::names;
use crate::graphs::policy;
use crate::graphs::state::{
    CaseGraphState, CaseSnapshot, ExecutionOutcome, MessageSnapshot, ResumeDecision,
};
use crate::keys;
use crate::review::review_state_for;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use stategraph_core::{node_fn, GraphError, NodeFn, NodeOutput, RouterFn, RESUME_KEY};
use tracing::{debug, warn};
use uuid::Uuid;

/// Shared handles every node closure captures
pub struct NodeServices {
    /// Database pool
    pub pool: Arc<DatabasePool>,
    /// External collaborators
    pub collaborators: Collaborators,
    /// Engine configuration
    pub config: EngineConfig,
}

fn failure(node: &str, err: impl std::fmt::Display) -> GraphError {
    GraphError::Node {
        node: node.to_string(),
        message: err.to_string(),
    }
}

fn decode(node: &str, value: &Value) -> Result<CaseGraphState, GraphError> {
    CaseGraphState::from_value(value).map_err(|e| failure(node, e))
}

fn case_snapshot(case: &crate::db::models::Case) -> CaseSnapshot {
    CaseSnapshot {
        agency_name: case.agency_name.clone(),
        agency_email: case.agency_email.clone(),
        status: case.status.clone(),
        autopilot_mode: case.autopilot_mode.clone(),
        request_text: case.request_text.clone(),
        constraints: case.constraint_tags(),
        portal_url: case.portal_url.clone(),
        fee_amount: case.fee_amount,
    }
}

/// Router following the `next_node` state hint, validated against `allowed`
///
/// Hints outside the declared set are logged and treated as unset, falling
/// back to `fallback`.
pub fn next_node_router(
    node: &'static str,
    fallback: &'static str,
    allowed: Vec<&'static str>,
) -> RouterFn {
    Arc::new(move |state: &Value| {
        match state.get("next_node").and_then(|v| v.as_str()) {
            Some(hint) if allowed.contains(&hint) => hint.to_string(),
            Some(hint) => {
                warn!(node, hint, "Ignoring next_node hint outside declared set");
                fallback.to_string()
            }
            None => fallback.to_string(),
        }
    })
}

/// Fetch the case, the triggering message, and context into state
pub fn load_context(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::LOAD_CONTEXT;
            let state = decode(NODE, &value)?;

            let case = CaseRepository::get_by_id(&services.pool, &state.case_id)
                .await
                .map_err(|e| failure(NODE, e))?
                .ok_or_else(|| failure(NODE, format!("case {} not found", state.case_id)))?;

            let message = match &state.message_id {
                Some(id) => MessageRepository::get_by_id(&services.pool, id)
                    .await
                    .map_err(|e| failure(NODE, e))?,
                None if state.trigger == "inbound_message" => {
                    MessageRepository::latest_inbound(&services.pool, &state.case_id)
                        .await
                        .map_err(|e| failure(NODE, e))?
                }
                None => None,
            };

            let loaded_id = message.as_ref().map(|m| m.id.clone());
            let message_snapshot = message.map(|m| MessageSnapshot {
                id: m.id,
                subject: m.subject,
                body_ref: m.body_ref,
            });
            let message_id = state.message_id.clone().or(loaded_id);

            Ok(NodeOutput::update(json!({
                "case": case_snapshot(&case),
                "message": message_snapshot,
                "message_id": message_id,
            })))
        }
    })
}

/// Classify the latest inbound message through the classifier collaborator
pub fn classify_inbound(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::CLASSIFY_INBOUND;
            let state = decode(NODE, &value)?;

            let case = state
                .case
                .as_ref()
                .ok_or_else(|| failure(NODE, "case context not loaded"))?;
            let message = state
                .message
                .as_ref()
                .ok_or_else(|| failure(NODE, "no inbound message to classify"))?;

            let ctx = ClassifyContext {
                case_id: state.case_id.clone(),
                message_id: message.id.clone(),
                subject: message.subject.clone(),
                body: message.body_ref.clone().unwrap_or_default(),
                constraints: case.constraints.clone(),
                request_text: case.request_text.clone(),
            };

            let classification = services
                .collaborators
                .classifier
                .classify(&ctx)
                .await
                .map_err(|e| failure(NODE, e))?;
            classification
                .validate_schema()
                .map_err(|e| failure(NODE, e))?;

            debug!(
                case_id = %state.case_id,
                classification = %classification.classification,
                "Inbound message classified"
            );

            Ok(NodeOutput::update(json!({
                "classification": classification,
            })))
        }
    })
}

/// Merge classification-derived constraint tags and extractions into the case
pub fn update_constraints(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::UPDATE_CONSTRAINTS;
            let state = decode(NODE, &value)?;

            let Some(classification) = &state.classification else {
                return Ok(NodeOutput::noop());
            };
            let Some(case) = &state.case else {
                return Ok(NodeOutput::noop());
            };

            let mut constraints = case.constraints.clone();
            let mut push = |tag: &str| {
                if !constraints.iter().any(|c| c == tag) {
                    constraints.push(tag.to_string());
                }
            };
            match classification.classification.as_str() {
                "fee_request" => push("fee_required"),
                "denial" => push("denial_received"),
                "id_request" => push("id_required"),
                _ => {}
            }
            for tag in &classification.constraint_tags {
                if !constraints.iter().any(|c| c == tag) {
                    constraints.push(tag.clone());
                }
            }

            let mut scope_items = Vec::new();
            scope_items.extend(classification.scope_updates.iter().cloned());

            CaseRepository::update_constraints(
                &services.pool,
                &state.case_id,
                &serde_json::to_string(&constraints).map_err(|e| failure(NODE, e))?,
                &serde_json::to_string(&scope_items).map_err(|e| failure(NODE, e))?,
            )
            .await
            .map_err(|e| failure(NODE, e))?;

            if let Some(amount) = classification.extracted_fee_amount {
                CaseRepository::set_fee(&services.pool, &state.case_id, amount, "quoted")
                    .await
                    .map_err(|e| failure(NODE, e))?;
            }
            if let Some(portal_url) = &classification.portal_url {
                CaseRepository::set_portal_url(&services.pool, &state.case_id, portal_url)
                    .await
                    .map_err(|e| failure(NODE, e))?;
            }

            let mut snapshot = case.clone();
            snapshot.constraints = constraints;
            snapshot.fee_amount = classification.extracted_fee_amount.or(snapshot.fee_amount);
            snapshot.portal_url = classification.portal_url.clone().or(snapshot.portal_url);

            Ok(NodeOutput::update(json!({ "case": snapshot })))
        }
    })
}

/// Apply decision policy to choose the next action
pub fn decide_next_action(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::DECIDE_NEXT_ACTION;
            let state = decode(NODE, &value)?;

            // An ADJUST decision keeps the prior action and re-drafts with
            // the reviewer's instruction folded in
            if let (Some(resume), Some(decision)) = (&state.resume, &state.decision) {
                if resume.action == HumanAction::Adjust {
                    let mut adjusted = decision.clone();
                    if let Some(instruction) = &resume.instruction {
                        adjusted
                            .reasoning
                            .push(format!("adjusted per reviewer: {}", instruction));
                    }
                    return Ok(NodeOutput::update(json!({
                        "decision": adjusted,
                        "next_node": names::DRAFT_RESPONSE,
                    })));
                }
            }

            let classification = state
                .classification
                .as_ref()
                .ok_or_else(|| failure(NODE, "no classification to decide on"))?;

            let decision = policy::decide(classification, state.mode(), &services.config);
            let next = match decision.action_type {
                ActionType::None => names::COMMIT_STATE,
                ActionType::SubmitPortal => names::EXECUTE_ACTION,
                _ => names::DRAFT_RESPONSE,
            };

            debug!(
                case_id = %state.case_id,
                action = %decision.action_type,
                can_auto = decision.can_auto_execute,
                "Next action decided"
            );

            Ok(NodeOutput::update(json!({
                "decision": decision,
                "next_node": next,
            })))
        }
    })
}

/// Draft the initial request (or a scheduled follow-up)
///
/// The initial graph has no classifier stage, so this node also fixes the
/// decision from the trigger and autopilot mode.
pub fn draft_initial_request(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::DRAFT_INITIAL_REQUEST;
            let state = decode(NODE, &value)?;
            let case = state
                .case
                .as_ref()
                .ok_or_else(|| failure(NODE, "case context not loaded"))?;

            let mut decision = policy::initial_decision(&state.trigger, state.mode());
            let instruction = state.resume.as_ref().and_then(|r| {
                (r.action == HumanAction::Adjust)
                    .then(|| r.instruction.clone())
                    .flatten()
            });
            if let Some(instruction) = &instruction {
                decision
                    .reasoning
                    .push(format!("adjusted per reviewer: {}", instruction));
            }

            let draft = services
                .collaborators
                .drafter
                .draft(&DraftContext {
                    case_id: state.case_id.clone(),
                    action_type: decision.action_type.as_str().to_string(),
                    agency_name: case.agency_name.clone(),
                    request_text: case.request_text.clone(),
                    classification: None,
                    fee_amount: None,
                    instruction,
                })
                .await
                .map_err(|e| failure(NODE, e))?;
            draft.validate_schema().map_err(|e| failure(NODE, e))?;

            Ok(NodeOutput::update(json!({
                "decision": decision,
                "draft": draft,
            })))
        }
    })
}

/// Draft the response serving the already-decided action
pub fn draft_response(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::DRAFT_RESPONSE;
            let state = decode(NODE, &value)?;
            let case = state
                .case
                .as_ref()
                .ok_or_else(|| failure(NODE, "case context not loaded"))?;
            let decision = state
                .decision
                .as_ref()
                .ok_or_else(|| failure(NODE, "no decision to draft for"))?;

            let instruction = state.resume.as_ref().and_then(|r| {
                (r.action == HumanAction::Adjust)
                    .then(|| r.instruction.clone())
                    .flatten()
            });

            let draft = services
                .collaborators
                .drafter
                .draft(&DraftContext {
                    case_id: state.case_id.clone(),
                    action_type: decision.action_type.as_str().to_string(),
                    agency_name: case.agency_name.clone(),
                    request_text: case.request_text.clone(),
                    classification: state
                        .classification
                        .as_ref()
                        .map(|c| c.classification.clone()),
                    fee_amount: state
                        .classification
                        .as_ref()
                        .and_then(|c| c.extracted_fee_amount),
                    instruction,
                })
                .await
                .map_err(|e| failure(NODE, e))?;
            draft.validate_schema().map_err(|e| failure(NODE, e))?;

            Ok(NodeOutput::update(json!({ "draft": draft })))
        }
    })
}

/// Apply the hard and soft safety rules
pub fn safety_check(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::SAFETY_CHECK;
            let state = decode(NODE, &value)?;
            let decision = state
                .decision
                .as_ref()
                .ok_or_else(|| failure(NODE, "no decision to check"))?;

            let (adjusted, flags) = policy::apply_safety(decision, &state, &services.config);
            if adjusted.requires_human && !decision.requires_human {
                debug!(case_id = %state.case_id, "Safety rule forced the human gate");
            }

            Ok(NodeOutput::update(json!({
                "decision": adjusted,
                "risk_flags": flags,
            })))
        }
    })
}

/// Persist the proposal, then either gate for a human or proceed
///
/// On resume the raw runtime key carries the human decision: APPROVE routes
/// to execution, ADJUST loops back to re-decide/re-draft, DISMISS and
/// WITHDRAW settle the proposal and commit.
pub fn gate_or_execute(services: Arc<NodeServices>, initial: bool) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::GATE_OR_EXECUTE;
            let state = decode(NODE, &value)?;

            if let Some(raw) = value.get(RESUME_KEY) {
                let resume: ResumeDecision =
                    serde_json::from_value(raw.clone()).map_err(|e| failure(NODE, e))?;
                return apply_resume(&services, &state, resume, initial).await;
            }

            let decision = state
                .decision
                .as_ref()
                .ok_or_else(|| failure(NODE, "no decision to gate"))?;
            if decision.action_type == ActionType::None {
                return Ok(NodeOutput::update(json!({
                    "next_node": names::COMMIT_STATE,
                })));
            }

            let proposal_key = keys::proposal_key(
                &state.case_id,
                state.message_id.as_deref(),
                decision.action_type.as_str(),
                state.followup_attempt,
            );

            let mut entry = Proposal::draft(
                Uuid::new_v4().to_string(),
                state.case_id.clone(),
                proposal_key,
                decision.action_type,
            );
            entry.message_id = state.message_id.clone();
            if let Some(draft) = &state.draft {
                entry.subject = Some(draft.subject.clone());
                entry.body_ref = Some(draft.body.clone());
            }
            entry.reasoning =
                serde_json::to_string(&decision.reasoning).map_err(|e| failure(NODE, e))?;
            entry.risk_flags =
                serde_json::to_string(&state.risk_flags).map_err(|e| failure(NODE, e))?;
            entry.confidence = state
                .classification
                .as_ref()
                .map(|c| c.classification_confidence);

            let proposal = ProposalRepository::upsert_by_key(&services.pool, &entry)
                .await
                .map_err(|e| failure(NODE, e))?;
            if proposal.is_terminal() {
                // The deterministic key already ran its course; nothing to do
                return Ok(NodeOutput::update(json!({
                    "proposal_id": proposal.id,
                    "next_node": names::COMMIT_STATE,
                })));
            }

            // Fresh information supersedes any other still-pending proposal
            ProposalRepository::supersede_pending(&services.pool, &state.case_id, Some(&proposal.id))
                .await
                .map_err(|e| failure(NODE, e))?;

            if decision.can_auto_execute && !decision.requires_human {
                ProposalRepository::mark_approved(&services.pool, &proposal.id)
                    .await
                    .map_err(|e| failure(NODE, e))?;
                return Ok(NodeOutput::update(json!({
                    "proposal_id": proposal.id,
                    "next_node": names::EXECUTE_ACTION,
                })));
            }

            let pause_reason = decision.pause_reason.unwrap_or(PauseReason::PendingApproval);
            ProposalRepository::mark_pending(&services.pool, &proposal.id, pause_reason)
                .await
                .map_err(|e| failure(NODE, e))?;

            debug!(
                case_id = %state.case_id,
                proposal_id = %proposal.id,
                pause_reason = %pause_reason,
                "Gating for human decision"
            );

            Ok(NodeOutput::interrupt(json!({
                "proposal_id": proposal.id,
                "action_type": decision.action_type,
                "pause_reason": pause_reason,
            })))
        }
    })
}

async fn apply_resume(
    services: &NodeServices,
    state: &CaseGraphState,
    resume: ResumeDecision,
    initial: bool,
) -> Result<NodeOutput, GraphError> {
    const NODE: &str = names::GATE_OR_EXECUTE;

    match resume.action {
        HumanAction::Approve => {
            // DECISION_RECEIVED -> APPROVED; the atomic claim in execution
            // still guards exactly-once regardless
            ProposalRepository::mark_approved(&services.pool, &resume.proposal_id)
                .await
                .map_err(|e| failure(NODE, e))?;
            Ok(NodeOutput::update(json!({
                "proposal_id": resume.proposal_id,
                "resume": resume,
                "next_node": names::EXECUTE_ACTION,
            })))
        }
        HumanAction::Adjust => {
            let back_to = if initial {
                names::DRAFT_INITIAL_REQUEST
            } else {
                names::DECIDE_NEXT_ACTION
            };
            Ok(NodeOutput::update(json!({
                "proposal_id": resume.proposal_id,
                "resume": resume,
                "next_node": back_to,
            })))
        }
        HumanAction::Dismiss => {
            ProposalRepository::update_status(
                &services.pool,
                &resume.proposal_id,
                crate::db::models::ProposalStatus::Dismissed,
            )
            .await
            .map_err(|e| failure(NODE, e))?;
            Ok(NodeOutput::update(json!({
                "proposal_id": resume.proposal_id,
                "resume": resume,
                "next_node": names::COMMIT_STATE,
            })))
        }
        HumanAction::Withdraw => {
            ProposalRepository::update_status(
                &services.pool,
                &resume.proposal_id,
                crate::db::models::ProposalStatus::Cancelled,
            )
            .await
            .map_err(|e| failure(NODE, e))?;
            Ok(NodeOutput::update(json!({
                "proposal_id": resume.proposal_id,
                "resume": resume,
                "withdraw_case": true,
                "next_node": names::COMMIT_STATE,
            })))
        }
    }
}

/// Claim the execution slot and dispatch the side effect
pub fn execute_action(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::EXECUTE_ACTION;
            let state = decode(NODE, &value)?;
            let decision = state
                .decision
                .as_ref()
                .ok_or_else(|| failure(NODE, "no decision to execute"))?;
            let action = decision.action_type;

            // The direct decide -> execute path (portal submission) reaches
            // here without a gate-persisted proposal
            let proposal_id = match &state.proposal_id {
                Some(id) => id.clone(),
                None => {
                    let key = keys::proposal_key(
                        &state.case_id,
                        state.message_id.as_deref(),
                        action.as_str(),
                        state.followup_attempt,
                    );
                    let mut entry = Proposal::draft(
                        Uuid::new_v4().to_string(),
                        state.case_id.clone(),
                        key,
                        action,
                    );
                    entry.message_id = state.message_id.clone();
                    entry.reasoning = serde_json::to_string(&decision.reasoning)
                        .map_err(|e| failure(NODE, e))?;
                    let proposal = ProposalRepository::upsert_by_key(&services.pool, &entry)
                        .await
                        .map_err(|e| failure(NODE, e))?;
                    ProposalRepository::mark_approved(&services.pool, &proposal.id)
                        .await
                        .map_err(|e| failure(NODE, e))?;
                    proposal.id
                }
            };

            let execution_key = keys::execution_key(action.as_str(), &state.case_id, &proposal_id);

            let claimed =
                ProposalRepository::claim_execution(&services.pool, &proposal_id, &execution_key)
                    .await
                    .map_err(|e| failure(NODE, e))?;
            if !claimed {
                debug!(
                    proposal_id = %proposal_id,
                    "Execution already claimed; skipping dispatch"
                );
                return Ok(NodeOutput::update(json!({
                    "proposal_id": proposal_id,
                    "execution": ExecutionOutcome {
                        dispatched: false,
                        skipped_duplicate_execution: true,
                        provider_ref: None,
                    },
                })));
            }

            let execution = crate::db::models::Execution::pending(
                Uuid::new_v4().to_string(),
                proposal_id.clone(),
                execution_key.clone(),
            );
            let execution = match ExecutionRepository::create(&services.pool, &execution).await {
                Ok(execution) => execution,
                Err(err) if is_unique_violation(&err) => {
                    return Ok(NodeOutput::update(json!({
                        "proposal_id": proposal_id,
                        "execution": ExecutionOutcome {
                            dispatched: false,
                            skipped_duplicate_execution: true,
                            provider_ref: None,
                        },
                    })));
                }
                Err(err) => return Err(failure(NODE, err)),
            };

            let dispatch_result = dispatch(&services, &state, action, &execution_key, &proposal_id).await;
            let provider_ref = match dispatch_result {
                Ok(provider_ref) => provider_ref,
                Err(err) => {
                    ExecutionRepository::mark_failed(&services.pool, &execution.id)
                        .await
                        .map_err(|e| failure(NODE, e))?;
                    ProposalRepository::update_status(
                        &services.pool,
                        &proposal_id,
                        crate::db::models::ProposalStatus::Failed,
                    )
                    .await
                    .map_err(|e| failure(NODE, e))?;
                    return Err(failure(NODE, err));
                }
            };

            ExecutionRepository::mark_dispatched(
                &services.pool,
                &execution.id,
                provider_ref.as_deref(),
            )
            .await
            .map_err(|e| failure(NODE, e))?;
            ProposalRepository::mark_executed(&services.pool, &proposal_id)
                .await
                .map_err(|e| failure(NODE, e))?;

            debug!(proposal_id = %proposal_id, action = %action, "Side effect dispatched");

            Ok(NodeOutput::update(json!({
                "proposal_id": proposal_id,
                "execution": ExecutionOutcome {
                    dispatched: true,
                    skipped_duplicate_execution: false,
                    provider_ref,
                },
            })))
        }
    })
}

async fn dispatch(
    services: &NodeServices,
    state: &CaseGraphState,
    action: ActionType,
    execution_key: &str,
    proposal_id: &str,
) -> Result<Option<String>, EngineError> {
    match action {
        ActionType::SubmitPortal => {
            let portal_url = state.portal_url().ok_or_else(|| EngineError::Collaborator {
                service: "portal".to_string(),
                message: "no portal URL on record".to_string(),
            })?;
            services
                .collaborators
                .portal
                .submit(&state.case_id, &portal_url, 1)
                .await?;
            Ok(None)
        }
        ActionType::None => Ok(None),
        _ => {
            let case = state.case.as_ref().ok_or_else(|| EngineError::Collaborator {
                service: "email".to_string(),
                message: "case context not loaded".to_string(),
            })?;
            let recipient =
                case.agency_email
                    .clone()
                    .ok_or_else(|| EngineError::Collaborator {
                        service: "email".to_string(),
                        message: "no agency email on file".to_string(),
                    })?;
            let draft = state.draft.as_ref().ok_or_else(|| EngineError::Collaborator {
                service: "email".to_string(),
                message: "no draft to send".to_string(),
            })?;

            let dispatch = services
                .collaborators
                .email
                .send(&SendRequest {
                    execution_key: execution_key.to_string(),
                    proposal_id: proposal_id.to_string(),
                    recipient,
                    subject: draft.subject.clone(),
                    body: draft.body.clone(),
                })
                .await?;
            Ok(dispatch.provider_ref)
        }
    }
}

/// Insert the next follow-up slot (initial graph only)
pub fn schedule_followups(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::SCHEDULE_FOLLOWUPS;
            let state = decode(NODE, &value)?;

            // Only a dispatched send earns a follow-up
            let dispatched = state
                .execution
                .as_ref()
                .map(|e| e.dispatched)
                .unwrap_or(false);
            if !dispatched {
                return Ok(NodeOutput::noop());
            }

            let attempt = state.followup_attempt + 1;
            let due = Utc::now() + ChronoDuration::days(policy::FOLLOWUP_INTERVAL_DAYS);
            let scheduled_key = keys::scheduled_key(&state.case_id, attempt, due.date_naive());

            let slot = FollowUpRepository::acquire_slot(
                &services.pool,
                &Uuid::new_v4().to_string(),
                &state.case_id,
                due,
                attempt,
                &scheduled_key,
            )
            .await
            .map_err(|e| failure(NODE, e))?;

            match slot {
                Some(_) => {
                    debug!(case_id = %state.case_id, key = %scheduled_key, "Follow-up scheduled");
                    Ok(NodeOutput::update(json!({ "followup_key": scheduled_key })))
                }
                // Slot already taken: a parallel enqueue won the race
                None => Ok(NodeOutput::update(json!({ "followup_key": scheduled_key }))),
            }
        }
    })
}

/// Write the final case status, processed marker, and review projection
pub fn commit_state(services: Arc<NodeServices>) -> NodeFn {
    node_fn(move |value: Value| {
        let services = services.clone();
        async move {
            const NODE: &str = names::COMMIT_STATE;
            let state = decode(NODE, &value)?;

            if state.trigger == "inbound_message" {
                if let Some(message_id) = &state.message_id {
                    MessageRepository::mark_processed(&services.pool, message_id, &state.run_id)
                        .await
                        .map_err(|e| failure(NODE, e))?;
                }
            }

            if let Some(followup_id) = &state.followup_id {
                FollowUpRepository::mark_completed(&services.pool, followup_id)
                    .await
                    .map_err(|e| failure(NODE, e))?;
            }

            let executed = state
                .execution
                .as_ref()
                .map(|e| e.dispatched)
                .unwrap_or(false);
            let action = state.decision.as_ref().map(|d| d.action_type);

            let new_status = if state.withdraw_case {
                Some(CaseStatus::Withdrawn)
            } else if action == Some(ActionType::SubmitPortal) {
                Some(CaseStatus::PortalRequired)
            } else if state
                .classification
                .as_ref()
                .map(|c| c.classification == "records_ready")
                .unwrap_or(false)
            {
                Some(CaseStatus::RecordsReceived)
            } else if executed {
                match action {
                    Some(ActionType::SendInitialRequest) | Some(ActionType::SendFollowup) => {
                        Some(CaseStatus::RequestSent)
                    }
                    Some(ActionType::AcceptFee)
                    | Some(ActionType::NegotiateFee)
                    | Some(ActionType::DeclineFee) => Some(CaseStatus::InNegotiation),
                    _ => Some(CaseStatus::AwaitingAgency),
                }
            } else {
                None
            };

            if let Some(status) = new_status {
                CaseRepository::update_status(&services.pool, &state.case_id, status)
                    .await
                    .map_err(|e| failure(NODE, e))?;
            }

            // The run finishing this pass means no human is on the hook
            CaseRepository::set_requires_human(&services.pool, &state.case_id, false)
                .await
                .map_err(|e| failure(NODE, e))?;

            let case = CaseRepository::get_by_id(&services.pool, &state.case_id)
                .await
                .map_err(|e| failure(NODE, e))?
                .ok_or_else(|| failure(NODE, format!("case {} not found", state.case_id)))?;
            let latest_proposal = ProposalRepository::latest_for_case(&services.pool, &state.case_id)
                .await
                .map_err(|e| failure(NODE, e))?;

            let review = review_state_for(
                case.case_status().unwrap_or(CaseStatus::Draft),
                false,
                latest_proposal.and_then(|p| p.proposal_status()),
                None,
            );
            CaseRepository::update_review_state(&services.pool, &state.case_id, review)
                .await
                .map_err(|e| failure(NODE, e))?;

            if review == ReviewState::Idle || review == ReviewState::WaitingAgency {
                debug!(case_id = %state.case_id, review = %review, "Case settled");
            }

            Ok(NodeOutput::update(json!({ "next_node": Value::Null })))
        }
    })
}
