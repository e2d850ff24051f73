//! Collaborator contracts
//!
//! Everything outside the engine core - the LLM classifier and drafter, the
//! transactional email executor, the portal-task executor, and the notifier
//! relay - is reached through the traits here. The engine validates a schema
//! tag on LLM outputs and rejects anything else; executor deduplication is
//! keyed on `execution_key`; notifier failures are never fatal.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Schema tag the engine requires on classifier and drafter output
pub const SCHEMA_VERSION: &str = "docket/v1";

/// Structured context handed to the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyContext {
    /// Owning case
    pub case_id: String,
    /// Message being classified
    pub message_id: String,
    /// Subject line of the inbound message
    pub subject: Option<String>,
    /// Body text of the inbound message
    pub body: String,
    /// Current constraint tags on the case
    pub constraints: Vec<String>,
    /// The original request text for context
    pub request_text: String,
}

/// Classifier output for one inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Output schema tag; must equal [`SCHEMA_VERSION`]
    pub schema_version: String,
    /// Message category (fee_request, denial, portal_redirect, …)
    pub classification: String,
    /// Confidence in the category
    pub classification_confidence: f64,
    /// Overall tone of the message
    pub sentiment: Option<String>,
    /// Fee amount extracted from the message, if any
    pub extracted_fee_amount: Option<f64>,
    /// Deadline extracted from the message (RFC3339), if any
    pub extracted_deadline: Option<String>,
    /// Whether the agency expects a response from us
    pub requires_response: bool,
    /// Portal URL found in the message, if any
    pub portal_url: Option<String>,
    /// Action the classifier suggests
    pub suggested_action: Option<String>,
    /// Why no response is needed, when `requires_response` is false
    pub reason_no_response: Option<String>,
    /// For denials, how firm the denial reads (weak/strong)
    pub denial_strength: Option<String>,
    /// Additional constraint tags the classifier derived
    #[serde(default)]
    pub constraint_tags: Vec<String>,
    /// Scope-item updates the classifier derived
    #[serde(default)]
    pub scope_updates: Vec<String>,
}

impl Classification {
    /// Reject output that does not carry the expected schema tag
    pub fn validate_schema(&self) -> Result<()> {
        if self.schema_version == SCHEMA_VERSION {
            Ok(())
        } else {
            Err(EngineError::SchemaMismatch {
                expected: SCHEMA_VERSION.to_string(),
                got: self.schema_version.clone(),
            })
        }
    }
}

/// Structured context handed to the drafter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftContext {
    /// Owning case
    pub case_id: String,
    /// Already-decided action the draft must serve
    pub action_type: String,
    /// Agency being addressed
    pub agency_name: String,
    /// The original request text
    pub request_text: String,
    /// Classification of the message being answered, if any
    pub classification: Option<String>,
    /// Quoted fee, when drafting a fee response
    pub fee_amount: Option<f64>,
    /// Human instruction from an ADJUST decision, if any
    pub instruction: Option<String>,
}

/// Drafter output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Output schema tag; must equal [`SCHEMA_VERSION`]
    pub schema_version: String,
    /// Draft subject line
    pub subject: String,
    /// Draft body text
    pub body: String,
    /// Short reasoning items behind the draft
    pub reasoning: Vec<String>,
}

impl Draft {
    /// Reject output that does not carry the expected schema tag
    pub fn validate_schema(&self) -> Result<()> {
        if self.schema_version == SCHEMA_VERSION {
            Ok(())
        } else {
            Err(EngineError::SchemaMismatch {
                expected: SCHEMA_VERSION.to_string(),
                got: self.schema_version.clone(),
            })
        }
    }
}

/// LLM collaborator that classifies inbound messages
///
/// Non-retryable inside a run: a failure fails the run.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one inbound message in its case context
    async fn classify(&self, ctx: &ClassifyContext) -> Result<Classification>;
}

/// LLM collaborator that drafts outbound correspondence
#[async_trait]
pub trait Drafter: Send + Sync {
    /// Produce a draft for the already-decided action
    async fn draft(&self, ctx: &DraftContext) -> Result<Draft>;
}

/// Outbound send handed to the email executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Idempotency key; the executor must deduplicate on it
    pub execution_key: String,
    /// Proposal being executed
    pub proposal_id: String,
    /// Recipient address
    pub recipient: String,
    /// Subject line
    pub subject: String,
    /// Body text
    pub body: String,
}

/// Executor acknowledgement of a dispatched send
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Provider-side reference, when the provider returned one
    pub provider_ref: Option<String>,
    /// True when the executor had already seen this `execution_key`
    pub deduplicated: bool,
}

/// Email executor collaborator
#[async_trait]
pub trait EmailExecutor: Send + Sync {
    /// Dispatch an outbound send, deduplicating on `execution_key`
    async fn send(&self, request: &SendRequest) -> Result<Dispatch>;
}

/// Status reported by the portal-task executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalTaskStatus {
    /// Task accepted, not started
    Pending,
    /// Task in progress
    InProgress,
    /// Task finished
    Done,
    /// Task failed
    Failed,
}

/// Portal-task executor collaborator
#[async_trait]
pub trait PortalExecutor: Send + Sync {
    /// Create or advance a portal submission task for a case
    async fn submit(&self, case_id: &str, portal_url: &str, attempt: i64)
        -> Result<PortalTaskStatus>;
}

/// Structured events relayed to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A proposal paused for human decision
    CaseNeedsReview {
        /// Case awaiting review
        case_id: String,
        /// Pending proposal
        proposal_id: String,
        /// Why it paused
        pause_reason: String,
    },
    /// A job exhausted its retries
    JobMovedToDlq {
        /// Queue the job died on
        queue: String,
        /// Job name
        job_name: String,
        /// Owning case, when known
        case_id: Option<String>,
    },
    /// A run ended FAILED
    RunFailed {
        /// Owning case
        case_id: String,
        /// Failed run
        run_id: String,
        /// Error description
        error: String,
    },
}

/// Notifier collaborator; failures are logged and swallowed
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Relay one event
    async fn notify(&self, event: NotifyEvent) -> Result<()>;
}

/// Fire a notification without letting a relay failure surface
pub async fn notify_best_effort(notifier: &dyn Notifier, event: NotifyEvent) {
    if let Err(err) = notifier.notify(event).await {
        warn!(error = %err, "Notifier failed; continuing");
    }
}

// ---------------------------------------------------------------------------
// Built-in implementations
// ---------------------------------------------------------------------------

/// Email executor that records sends instead of dispatching them
///
/// Deduplicates on `execution_key` exactly like the production executor and
/// returns synthetic success. Used in dry-run mode and tests.
#[derive(Debug, Default)]
pub struct DryRunEmailExecutor {
    seen: Mutex<HashSet<String>>,
    sent: Mutex<Vec<SendRequest>>,
}

impl DryRunEmailExecutor {
    /// Create an executor with no recorded sends
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests dispatched so far (deduplicated)
    pub async fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailExecutor for DryRunEmailExecutor {
    async fn send(&self, request: &SendRequest) -> Result<Dispatch> {
        let mut seen = self.seen.lock().await;
        if !seen.insert(request.execution_key.clone()) {
            return Ok(Dispatch {
                provider_ref: None,
                deduplicated: true,
            });
        }
        drop(seen);

        self.sent.lock().await.push(request.clone());
        info!(execution_key = %request.execution_key, "Dry-run send recorded");
        Ok(Dispatch {
            provider_ref: Some(format!("dry-run-{}", request.execution_key)),
            deduplicated: false,
        })
    }
}

/// Portal executor that always accepts the task
#[derive(Debug, Default)]
pub struct DryRunPortalExecutor {
    submitted: Mutex<Vec<(String, String)>>,
}

impl DryRunPortalExecutor {
    /// Create an executor with no recorded tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// All (case_id, portal_url) pairs submitted so far
    pub async fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl PortalExecutor for DryRunPortalExecutor {
    async fn submit(
        &self,
        case_id: &str,
        portal_url: &str,
        _attempt: i64,
    ) -> Result<PortalTaskStatus> {
        self.submitted
            .lock()
            .await
            .push((case_id.to_string(), portal_url.to_string()));
        Ok(PortalTaskStatus::Pending)
    }
}

/// Notifier that records events in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    /// Create a notifier with no recorded events
    pub fn new() -> Self {
        Self::default()
    }

    /// All events relayed so far
    pub async fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotifyEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Deterministic keyword classifier used in dry-run mode
///
/// Applies fixed rules over the subject and body text: a portal link wins,
/// then a quoted fee amount, denial language, clarification requests, and
/// records-ready notices. The production classifier is an external LLM
/// service (see [`crate::remote`]); this one exists so a dry-run worker can
/// drive the whole engine without it.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Create a keyword classifier
    pub fn new() -> Self {
        Self
    }

    fn extract_portal_url(text: &str) -> Option<String> {
        text.split_whitespace()
            .find(|token| token.starts_with("http") && token.to_lowercase().contains("portal"))
            .map(|token| token.trim_end_matches(['.', ',', ';', ')']).to_string())
    }

    fn extract_fee(text: &str) -> Option<f64> {
        let start = text.find('$')?;
        let rest = &text[start + 1..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != ',')
            .unwrap_or(rest.len());
        rest[..end].replace(',', "").parse().ok()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, ctx: &ClassifyContext) -> Result<Classification> {
        let text = format!("{} {}", ctx.subject.as_deref().unwrap_or(""), ctx.body);
        let lower = text.to_lowercase();

        let mut out = classification("other");
        out.classification_confidence = 0.7;

        if let Some(portal_url) = Self::extract_portal_url(&text) {
            out.classification = "portal_redirect".to_string();
            out.portal_url = Some(portal_url);
            out.requires_response = false;
            out.suggested_action = Some("use_portal".to_string());
            out.reason_no_response = Some("agency routes requests through its portal".to_string());
        } else if let Some(amount) = Self::extract_fee(&text) {
            out.classification = "fee_request".to_string();
            out.extracted_fee_amount = Some(amount);
        } else if lower.contains("denied") || lower.contains("denial") || lower.contains("exempt") {
            out.classification = "denial".to_string();
            let strength = if lower.contains("appeal") { "weak" } else { "strong" };
            out.denial_strength = Some(strength.to_string());
        } else if lower.contains("clarify") || lower.contains("narrow") {
            out.classification = "clarification_request".to_string();
        } else if lower.contains("records are ready") || lower.contains("records are available") {
            out.classification = "records_ready".to_string();
        } else if lower.contains("received your request") || lower.contains("acknowledg") {
            out.classification = "acknowledgement".to_string();
            out.requires_response = false;
            out.reason_no_response = Some("automatic acknowledgement".to_string());
        }

        Ok(out)
    }
}

/// Classifier driven by a queue of scripted outputs
///
/// Each call pops the next queued classification; tests script exactly what
/// the LLM collaborator would have said.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    outputs: Mutex<Vec<Classification>>,
}

impl ScriptedClassifier {
    /// Create a classifier with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next output
    pub async fn push(&self, classification: Classification) {
        self.outputs.lock().await.push(classification);
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, ctx: &ClassifyContext) -> Result<Classification> {
        let mut outputs = self.outputs.lock().await;
        if outputs.is_empty() {
            return Err(EngineError::Collaborator {
                service: "classifier".to_string(),
                message: format!("no scripted output for message {}", ctx.message_id),
            });
        }
        Ok(outputs.remove(0))
    }
}

/// Drafter producing deterministic template drafts
///
/// Stands in for the LLM drafter in dry-run mode and tests; the subject and
/// body are derived from the action type and case context.
#[derive(Debug, Default)]
pub struct TemplateDrafter;

impl TemplateDrafter {
    /// Create a template drafter
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Drafter for TemplateDrafter {
    async fn draft(&self, ctx: &DraftContext) -> Result<Draft> {
        let subject = match ctx.action_type.as_str() {
            "send_initial_request" => format!("Public records request - {}", ctx.agency_name),
            "accept_fee" => format!(
                "RE: records request - fee of ${:.2} accepted",
                ctx.fee_amount.unwrap_or(0.0)
            ),
            "negotiate_fee" => "RE: records request - fee discussion".to_string(),
            "decline_fee" => "RE: records request - fee declined".to_string(),
            "send_rebuttal" => "RE: records request - reconsideration requested".to_string(),
            "send_followup" => "Follow-up on pending records request".to_string(),
            other => format!("RE: records request ({})", other),
        };

        let mut body = format!(
            "To {},\n\nRegarding the request: {}\n",
            ctx.agency_name, ctx.request_text
        );
        if let Some(instruction) = &ctx.instruction {
            body.push_str(&format!("\nNote: {}\n", instruction));
        }

        Ok(Draft {
            schema_version: SCHEMA_VERSION.to_string(),
            subject,
            body,
            reasoning: vec![format!("template draft for {}", ctx.action_type)],
        })
    }
}

/// Convenience: a scripted classification with the valid schema tag
pub fn classification(kind: &str) -> Classification {
    Classification {
        schema_version: SCHEMA_VERSION.to_string(),
        classification: kind.to_string(),
        classification_confidence: 0.9,
        sentiment: None,
        extracted_fee_amount: None,
        extracted_deadline: None,
        requires_response: true,
        portal_url: None,
        suggested_action: None,
        reason_no_response: None,
        denial_strength: None,
        constraint_tags: Vec::new(),
        scope_updates: Vec::new(),
    }
}

/// Notifier that logs events through tracing
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotifyEvent) -> Result<()> {
        info!(event = ?event, "Notification");
        Ok(())
    }
}

/// Bundle of collaborator handles the engine is wired with
#[derive(Clone)]
pub struct Collaborators {
    /// Inbound-message classifier
    pub classifier: Arc<dyn Classifier>,
    /// Outbound drafter
    pub drafter: Arc<dyn Drafter>,
    /// Email executor
    pub email: Arc<dyn EmailExecutor>,
    /// Portal-task executor
    pub portal: Arc<dyn PortalExecutor>,
    /// Event notifier
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Dry-run wiring: keyword classifier, template drafter, recording
    /// executors, log notifier
    ///
    /// Fully functional without any external service; side effects are
    /// recorded instead of dispatched. Production wiring uses
    /// [`Collaborators::remote`] against configured endpoints.
    pub fn dry_run() -> Self {
        Self {
            classifier: Arc::new(KeywordClassifier::new()),
            drafter: Arc::new(TemplateDrafter::new()),
            email: Arc::new(DryRunEmailExecutor::new()),
            portal: Arc::new(DryRunPortalExecutor::new()),
            notifier: Arc::new(LogNotifier),
        }
    }
}
