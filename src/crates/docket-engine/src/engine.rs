//! Run engine
//!
//! Owns the job-name → handler mapping. Each handler loads the run allocated
//! at enqueue time, wraps the graph invocation in the case lock plus a
//! wall-clock timeout, and interprets the outcome: COMPLETED, WAITING at a
//! human gate, SKIPPED on idempotency hits, or FAILED into the queue's
//! dead-letter policy.

use crate::collaborators::{notify_best_effort, Collaborators, NotifyEvent};
use crate::config::EngineConfig;
use crate::db::models::{CaseStatus, HumanAction, ReviewState, Run, TriggerType};
use crate::db::repositories::{
    CaseRepository, ExecutionRepository, FollowUpRepository, MessageRepository,
    ProposalRepository, RunRepository,
};
use crate::db::DatabasePool;
use crate::engine::job_names::{
    RESUME_RUN, RUN_FOLLOWUP_TRIGGER, RUN_INBOUND_MESSAGE, RUN_INITIAL_REQUEST,
};
use crate::error::{EngineError, Result};
use crate::graphs::state::CaseGraphState;
use crate::graphs::CaseGraphs;
use crate::keys;
use crate::lock::LockManager;
use crate::queue::worker::JobHandler;
use crate::queue::{EnqueueOutcome, JobQueue, AGENT_QUEUE};
use crate::review::review_state_for;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use stategraph_checkpoint::CheckpointStore;
use stategraph_core::{CompiledGraph, GraphInput, GraphOutcome};
use tracing::{info, warn};
use uuid::Uuid;

/// Job names routed by the engine
pub mod job_names {
    /// Send the initial outbound request for a case
    pub const RUN_INITIAL_REQUEST: &str = "run-initial-request";
    /// Process one inbound agency message
    pub const RUN_INBOUND_MESSAGE: &str = "run-inbound-message";
    /// Fire one scheduled follow-up
    pub const RUN_FOLLOWUP_TRIGGER: &str = "run-followup-trigger";
    /// Apply a human decision to a suspended thread
    pub const RESUME_RUN: &str = "resume-run";
}

#[derive(Debug, Serialize, Deserialize)]
struct InitialRequestPayload {
    run_id: String,
    case_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct InboundMessagePayload {
    run_id: String,
    case_id: String,
    message_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FollowupPayload {
    run_id: String,
    case_id: String,
    followup_id: String,
}

/// Decision attached to a resume job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    /// The action the reviewer took
    pub action: HumanAction,
    /// Optional instruction (ADJUST)
    pub instruction: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResumePayload {
    run_id: String,
    case_id: String,
    proposal_id: String,
    human_decision: HumanDecision,
}

/// The durable, interruptible run engine
pub struct RunEngine {
    pool: Arc<DatabasePool>,
    queue: JobQueue,
    graphs: CaseGraphs,
    locks: LockManager,
    collaborators: Collaborators,
    checkpointer: Arc<dyn CheckpointStore>,
    config: EngineConfig,
}

impl RunEngine {
    /// Wire an engine from its components
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<DatabasePool>,
        queue: JobQueue,
        graphs: CaseGraphs,
        locks: LockManager,
        collaborators: Collaborators,
        checkpointer: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            graphs,
            locks,
            collaborators,
            checkpointer,
            config,
        }
    }

    /// The queue this engine enqueues through
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    // -----------------------------------------------------------------------
    // Enqueue surface used by collaborators
    // -----------------------------------------------------------------------

    /// Enqueue the initial-request trigger for a case; returns the run id
    ///
    /// The run row is allocated here, before the job, so the audit trail
    /// exists even when the lock later turns out to be contended.
    pub async fn enqueue_initial_request(&self, case_id: &str) -> Result<String> {
        let run = Run::new(
            Uuid::new_v4().to_string(),
            case_id.to_string(),
            TriggerType::InitialRequest,
        );
        RunRepository::create(&self.pool, &run).await?;

        let payload = json!({ "run_id": run.id, "case_id": case_id });
        self.enqueue_agent_job(RUN_INITIAL_REQUEST, &run.id, payload)
            .await?;
        Ok(run.id)
    }

    /// Enqueue processing of one inbound message; returns the run id
    pub async fn enqueue_inbound_message(
        &self,
        case_id: &str,
        message_id: &str,
    ) -> Result<String> {
        let run = Run::new(
            Uuid::new_v4().to_string(),
            case_id.to_string(),
            TriggerType::InboundMessage,
        )
        .with_message(message_id);
        RunRepository::create(&self.pool, &run).await?;

        let payload = json!({
            "run_id": run.id,
            "case_id": case_id,
            "message_id": message_id,
        });
        self.enqueue_agent_job(RUN_INBOUND_MESSAGE, &run.id, payload)
            .await?;
        Ok(run.id)
    }

    /// Enqueue one scheduled follow-up tick; returns the run id
    pub async fn enqueue_followup_trigger(
        &self,
        case_id: &str,
        followup_id: &str,
    ) -> Result<String> {
        let run = Run::new(
            Uuid::new_v4().to_string(),
            case_id.to_string(),
            TriggerType::ScheduledFollowup,
        )
        .with_followup(followup_id);
        RunRepository::create(&self.pool, &run).await?;

        let payload = json!({
            "run_id": run.id,
            "case_id": case_id,
            "followup_id": followup_id,
        });
        self.enqueue_agent_job(RUN_FOLLOWUP_TRIGGER, &run.id, payload)
            .await?;
        Ok(run.id)
    }

    /// Record a human decision and enqueue the resume; returns the run id
    ///
    /// # Errors
    ///
    /// [`EngineError::ProposalTerminal`] when the proposal is not awaiting a
    /// decision (already decided, superseded, executed, …).
    pub async fn submit_decision(
        &self,
        proposal_id: &str,
        action: HumanAction,
        instruction: Option<&str>,
    ) -> Result<String> {
        let proposal = ProposalRepository::get_by_id(&self.pool, proposal_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("proposal {}", proposal_id)))?;

        if !ProposalRepository::record_decision(&self.pool, proposal_id, action, instruction)
            .await?
        {
            return Err(EngineError::ProposalTerminal(proposal_id.to_string()));
        }

        let run = Run::new(
            Uuid::new_v4().to_string(),
            proposal.case_id.clone(),
            TriggerType::Resume,
        )
        .with_proposal(proposal_id);
        RunRepository::create(&self.pool, &run).await?;

        let payload = json!({
            "run_id": run.id,
            "case_id": proposal.case_id,
            "proposal_id": proposal_id,
            "human_decision": HumanDecision {
                action,
                instruction: instruction.map(String::from),
            },
        });
        self.enqueue_agent_job(RESUME_RUN, &run.id, payload).await?;
        Ok(run.id)
    }

    async fn enqueue_agent_job(
        &self,
        name: &str,
        run_id: &str,
        payload: serde_json::Value,
    ) -> Result<EnqueueOutcome> {
        let outcome = self
            .queue
            .enqueue(AGENT_QUEUE, name, run_id, &payload)
            .await?;
        if outcome.is_created() {
            RunRepository::mark_queued(&self.pool, run_id).await?;
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn run_initial_request(&self, payload: InitialRequestPayload) -> Result<()> {
        let thread_id = keys::initial_thread_id(&payload.case_id);
        let input = GraphInput::start(CaseGraphState::initial(
            &payload.case_id,
            &payload.run_id,
            "initial_request",
            None,
        ));
        self.execute_graph(
            &payload.case_id,
            &payload.run_id,
            &thread_id,
            &self.graphs.initial,
            input,
        )
        .await
    }

    async fn run_inbound_message(&self, payload: InboundMessagePayload) -> Result<()> {
        let message = MessageRepository::get_by_id(&self.pool, &payload.message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("message {}", payload.message_id)))?;

        if message.is_processed() {
            info!(
                message_id = %payload.message_id,
                run_id = %payload.run_id,
                "Message already processed; skipping"
            );
            RunRepository::mark_skipped(&self.pool, &payload.run_id, "already_processed").await?;
            return Ok(());
        }

        let thread_id = keys::inbound_thread_id(&payload.case_id);
        let input = GraphInput::start(CaseGraphState::initial(
            &payload.case_id,
            &payload.run_id,
            "inbound_message",
            Some(&payload.message_id),
        ));
        self.execute_graph(
            &payload.case_id,
            &payload.run_id,
            &thread_id,
            &self.graphs.inbound,
            input,
        )
        .await
    }

    async fn run_followup_trigger(&self, payload: FollowupPayload) -> Result<()> {
        let schedule = FollowUpRepository::get_by_id(&self.pool, &payload.followup_id).await?;
        let Some(schedule) = schedule.filter(|s| s.is_live()) else {
            info!(
                followup_id = %payload.followup_id,
                "Follow-up paused or completed; skipping"
            );
            RunRepository::mark_skipped(&self.pool, &payload.run_id, "followup_inactive").await?;
            return Ok(());
        };

        let thread_id = keys::initial_thread_id(&payload.case_id);
        let input = GraphInput::start(CaseGraphState::initial_followup(
            &payload.case_id,
            &payload.run_id,
            &schedule.id,
            schedule.attempt,
        ));
        self.execute_graph(
            &payload.case_id,
            &payload.run_id,
            &thread_id,
            &self.graphs.initial,
            input,
        )
        .await
    }

    async fn resume_run(&self, payload: ResumePayload) -> Result<()> {
        let proposal = ProposalRepository::get_by_id(&self.pool, &payload.proposal_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("proposal {}", payload.proposal_id)))?;

        if ExecutionRepository::live_exists_for_proposal(&self.pool, &payload.proposal_id).await? {
            RunRepository::mark_skipped(
                &self.pool,
                &payload.run_id,
                "execution_already_claimed",
            )
            .await?;
            return Ok(());
        }
        if proposal.is_terminal() {
            RunRepository::mark_skipped(&self.pool, &payload.run_id, "proposal_terminal").await?;
            return Ok(());
        }

        let initial_side = matches!(
            proposal.action_type.as_str(),
            "send_initial_request" | "send_followup"
        );
        let (thread_id, graph) = if initial_side {
            (
                keys::initial_thread_id(&payload.case_id),
                &self.graphs.initial,
            )
        } else {
            (
                keys::inbound_thread_id(&payload.case_id),
                &self.graphs.inbound,
            )
        };

        CaseRepository::update_review_state(
            &self.pool,
            &payload.case_id,
            ReviewState::DecisionApplying,
        )
        .await?;

        let input = GraphInput::resume(json!({
            "proposal_id": payload.proposal_id,
            "action": payload.human_decision.action,
            "instruction": payload.human_decision.instruction,
        }));
        self.execute_graph(&payload.case_id, &payload.run_id, &thread_id, graph, input)
            .await
    }

    // -----------------------------------------------------------------------
    // Graph execution core
    // -----------------------------------------------------------------------

    async fn execute_graph(
        &self,
        case_id: &str,
        run_id: &str,
        thread_id: &str,
        graph: &CompiledGraph,
        input: GraphInput,
    ) -> Result<()> {
        let timeout = self.config.graph_timeout();
        let outcome = self
            .locks
            .with_case_lock(case_id, run_id, thread_id, || async {
                // When the deadline fires the in-flight invocation is
                // dropped; the thread's gate is only resumed by an explicit
                // resume-run job, never implicitly
                tokio::time::timeout(timeout, graph.invoke(input, thread_id))
                    .await
                    .map_err(|_| EngineError::Timeout("graph_execution_timeout".to_string()))?
                    .map_err(EngineError::from)
            })
            .await;

        match outcome {
            Ok(GraphOutcome::Completed { state, trace }) => {
                let trace_json = serde_json::to_string(&trace)?;
                RunRepository::mark_completed(&self.pool, run_id, &trace_json).await?;
                if let Some(proposal_id) = state.get("proposal_id").and_then(|v| v.as_str()) {
                    RunRepository::link_proposal(&self.pool, run_id, proposal_id).await?;
                }
                info!(case_id, run_id, "Run completed");
                Ok(())
            }
            Ok(GraphOutcome::Interrupted {
                interrupt, trace, ..
            }) => {
                let proposal_id = interrupt
                    .get("proposal_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let pause_reason = interrupt
                    .get("pause_reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("pending_approval")
                    .to_string();

                let trace_json = serde_json::to_string(&trace)?;
                RunRepository::mark_waiting(
                    &self.pool,
                    run_id,
                    &proposal_id,
                    &interrupt.to_string(),
                    &trace_json,
                )
                .await?;

                CaseRepository::set_requires_human(&self.pool, case_id, true).await?;
                CaseRepository::update_review_state(
                    &self.pool,
                    case_id,
                    ReviewState::DecisionRequired,
                )
                .await?;

                notify_best_effort(
                    self.collaborators.notifier.as_ref(),
                    NotifyEvent::CaseNeedsReview {
                        case_id: case_id.to_string(),
                        proposal_id,
                        pause_reason,
                    },
                )
                .await;

                info!(case_id, run_id, "Run waiting on human decision");
                Ok(())
            }
            Err(err) if err.is_skippable() => {
                // The run row already carries the skip; the job is done
                info!(case_id, run_id, reason = err.skip_reason(), "Run skipped");
                Ok(())
            }
            Err(err) => {
                // The lock manager recorded FAILED on the run; surface the
                // failure to the case and operators, then let the queue's
                // policy decide (agent queue: straight to dead letter)
                CaseRepository::update_review_state(
                    &self.pool,
                    case_id,
                    ReviewState::DecisionRequired,
                )
                .await?;
                notify_best_effort(
                    self.collaborators.notifier.as_ref(),
                    NotifyEvent::RunFailed {
                        case_id: case_id.to_string(),
                        run_id: run_id.to_string(),
                        error: err.to_string(),
                    },
                )
                .await;
                warn!(case_id, run_id, error = %err, "Run failed");
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Thread maintenance
    // -----------------------------------------------------------------------

    /// Purge a case's graph threads (explicit reset)
    pub async fn reset_threads(&self, case_id: &str) -> Result<u64> {
        let mut purged = 0;
        purged += self
            .checkpointer
            .delete_by_prefix(&keys::inbound_thread_id(case_id))
            .await?;
        purged += self
            .checkpointer
            .delete_by_prefix(&keys::initial_thread_id(case_id))
            .await?;
        Ok(purged)
    }

    /// Close a case and purge its threads
    pub async fn close_case(&self, case_id: &str) -> Result<()> {
        CaseRepository::update_status(&self.pool, case_id, CaseStatus::Closed).await?;
        CaseRepository::update_review_state(&self.pool, case_id, ReviewState::Idle).await?;
        ProposalRepository::supersede_pending(&self.pool, case_id, None).await?;
        self.reset_threads(case_id).await?;
        Ok(())
    }

    /// Review-state projection for a case as it stands right now
    pub async fn project_review_state(&self, case_id: &str) -> Result<ReviewState> {
        let case = CaseRepository::get_by_id(&self.pool, case_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("case {}", case_id)))?;
        let proposal = ProposalRepository::latest_for_case(&self.pool, case_id).await?;
        let active = RunRepository::active_run(
            &self.pool,
            case_id,
            chrono::Duration::seconds((self.config.heartbeat_secs * 4).max(60) as i64),
        )
        .await?;

        Ok(review_state_for(
            case.case_status().unwrap_or(CaseStatus::Draft),
            case.requires_human != 0,
            proposal.and_then(|p| p.proposal_status()),
            active.and_then(|r| r.run_status()),
        ))
    }
}

#[async_trait]
impl JobHandler for RunEngine {
    async fn handle(&self, job: &crate::db::models::Job) -> Result<()> {
        match job.name.as_str() {
            RUN_INITIAL_REQUEST => self.run_initial_request(job.payload_as()?).await,
            RUN_INBOUND_MESSAGE => self.run_inbound_message(job.payload_as()?).await,
            RUN_FOLLOWUP_TRIGGER => self.run_followup_trigger(job.payload_as()?).await,
            RESUME_RUN => self.resume_run(job.payload_as()?).await,
            other => Err(EngineError::NotFound(format!("no handler for job {}", other))),
        }
    }
}
