//! Durable job queue
//!
//! SQLite-backed, at-least-once delivery with idempotent enqueue, delayed
//! jobs, per-queue retry profiles, retention pruning, and a dead-letter sink.
//!
//! The engine's stateful work rides the `agent` queue with a single attempt:
//! retrying a half-executed graph invocation automatically would race the
//! idempotency guards, so recovery is explicit (reaper + human resume).

pub mod policy;
pub mod queue;
pub mod worker;

pub use policy::{Backoff, RetentionWindow, RetryPolicy};
pub use queue::{EnqueueOutcome, FailOutcome, JobQueue};
pub use worker::{JobHandler, Worker};

/// Queue carrying stateful agent runs (attempts = 1)
pub const AGENT_QUEUE: &str = "agent";
/// Queue carrying outbound email dispatches
pub const EMAIL_QUEUE: &str = "email";
/// Queue carrying classification work
pub const ANALYSIS_QUEUE: &str = "analysis";
/// Queue carrying drafting work
pub const GENERATION_QUEUE: &str = "generation";
/// Queue carrying portal submissions
pub const PORTAL_QUEUE: &str = "portal";
