//! SQLite-backed job queue implementation
//!
//! At-least-once delivery over the `jobs` table. Enqueue is idempotent on
//! `job_id` while a job with that id is queued or active; claiming flips the
//! oldest due job to `active` in one statement; failure either reschedules
//! per the queue's retry profile or moves the job to the dead-letter table
//! and notifies operators.

use crate::collaborators::{notify_best_effort, Notifier, NotifyEvent};
use crate::db::models::{DeadLetterEntry, Job};
use crate::db::DatabasePool;
use crate::error::{is_unique_violation, EngineError, Result};
use crate::queue::policy::RetryPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of an enqueue that handles idempotency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Job was enqueued; returns the new row id
    Created(String),
    /// A live job with this `job_id` already exists; returns its row id
    Duplicate(String),
}

impl EnqueueOutcome {
    /// The row id regardless of whether it was created or duplicate
    pub fn row_id(&self) -> &str {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }

    /// True when this enqueue created a new job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// What happened to a failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled for another attempt at the given time
    Retried(DateTime<Utc>),
    /// Attempts exhausted; a dead-letter entry was written
    DeadLettered(String),
}

/// Durable FIFO over the `jobs` table
#[derive(Clone)]
pub struct JobQueue {
    pool: Arc<DatabasePool>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl JobQueue {
    /// Create a queue over a connection pool
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self {
            pool,
            notifier: None,
        }
    }

    /// Attach a notifier for dead-letter events
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Enqueue a job for immediate delivery
    ///
    /// While a job with the same `job_id` is queued or active, further
    /// enqueues return [`EnqueueOutcome::Duplicate`] - callers may issue the
    /// same job many times without creating duplicates.
    pub async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        job_id: &str,
        payload: &Value,
    ) -> Result<EnqueueOutcome> {
        self.enqueue_at(queue, name, job_id, payload, Utc::now()).await
    }

    /// Enqueue a job for delivery at or after `run_at`
    pub async fn enqueue_at(
        &self,
        queue: &str,
        name: &str,
        job_id: &str,
        payload: &Value,
        run_at: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let policy = RetryPolicy::for_queue(queue);
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let inserted = sqlx::query(
            "INSERT INTO jobs (id, job_id, queue, name, payload, status, attempt, max_attempts,
                               run_at, last_error, finished_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'queued', 0, ?, ?, NULL, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(job_id)
        .bind(queue)
        .bind(name)
        .bind(payload.to_string())
        .bind(policy.max_attempts)
        .bind(run_at.to_rfc3339())
        .bind(&now)
        .bind(&now)
        .execute(self.pool.as_ref())
        .await;

        match inserted {
            Ok(_) => {
                debug!(queue, name, job_id, "Job enqueued");
                Ok(EnqueueOutcome::Created(id))
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = self.find_live(job_id).await?.ok_or_else(|| {
                    EngineError::DuplicateKey(format!("live job vanished for {}", job_id))
                })?;
                debug!(queue, name, job_id, "Enqueue suppressed as duplicate");
                Ok(EnqueueOutcome::Duplicate(existing.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find the live (queued or active) job with a given `job_id`
    pub async fn find_live(&self, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE job_id = ? AND status IN ('queued', 'active') LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(job)
    }

    /// Claim the oldest due job on a queue
    ///
    /// Flips `queued -> active` and increments the attempt counter in one
    /// statement, so concurrent workers never claim the same row.
    pub async fn claim(&self, queue: &str) -> Result<Option<Job>> {
        let now = Utc::now().to_rfc3339();
        let job = sqlx::query_as::<_, Job>(
            "UPDATE jobs
             SET status = 'active', attempt = attempt + 1, updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = ? AND status = 'queued' AND run_at <= ?
                 ORDER BY run_at ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(&now)
        .bind(queue)
        .bind(&now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(job) = &job {
            debug!(queue, name = %job.name, attempt = job.attempt, "Job claimed");
        }
        Ok(job)
    }

    /// Mark an active job completed
    pub async fn complete(&self, job: &Job) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE jobs SET status = 'completed', finished_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(&job.id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Record a failed attempt
    ///
    /// Reschedules per the queue's retry profile when attempts remain;
    /// otherwise marks the job dead, writes a [`DeadLetterEntry`], and
    /// notifies operators.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<FailOutcome> {
        let policy = RetryPolicy::for_queue(&job.queue);
        let now = Utc::now().to_rfc3339();

        if job.attempt < policy.max_attempts {
            let delay = policy.backoff.delay(job.attempt);
            let next = Utc::now() + ChronoDuration::from_std(delay).unwrap_or_default();
            sqlx::query(
                "UPDATE jobs SET status = 'queued', run_at = ?, last_error = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(next.to_rfc3339())
            .bind(error)
            .bind(&now)
            .bind(&job.id)
            .execute(self.pool.as_ref())
            .await?;

            info!(
                queue = %job.queue,
                name = %job.name,
                attempt = job.attempt,
                next_run = %next,
                "Job rescheduled after failure"
            );
            return Ok(FailOutcome::Retried(next));
        }

        sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = ?, finished_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(&now)
        .bind(&now)
        .bind(&job.id)
        .execute(self.pool.as_ref())
        .await?;

        let entry = DeadLetterEntry {
            id: Uuid::new_v4().to_string(),
            queue: job.queue.clone(),
            job_name: job.name.clone(),
            payload: job.payload.clone(),
            error: error.to_string(),
            attempts: job.attempt,
            case_id: job.case_id(),
            replayed_at: None,
            discarded_at: None,
            created_at: now,
        };
        crate::db::repositories::DeadLetterRepository::create(self.pool.as_ref(), &entry).await?;

        warn!(
            queue = %job.queue,
            name = %job.name,
            attempts = job.attempt,
            "Job moved to dead letter"
        );

        if let Some(notifier) = &self.notifier {
            notify_best_effort(
                notifier.as_ref(),
                NotifyEvent::JobMovedToDlq {
                    queue: job.queue.clone(),
                    job_name: job.name.clone(),
                    case_id: job.case_id(),
                },
            )
            .await;
        }

        Ok(FailOutcome::DeadLettered(entry.id))
    }

    /// Replay a dead-letter entry as a fresh job with the original payload
    pub async fn replay_dead_letter(&self, entry_id: &str) -> Result<EnqueueOutcome> {
        let entry =
            crate::db::repositories::DeadLetterRepository::get_by_id(self.pool.as_ref(), entry_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("dead letter {}", entry_id)))?;

        if !crate::db::repositories::DeadLetterRepository::mark_replayed(
            self.pool.as_ref(),
            entry_id,
        )
        .await?
        {
            return Err(EngineError::DuplicateKey(format!(
                "dead letter {} already resolved",
                entry_id
            )));
        }

        let payload: Value = serde_json::from_str(&entry.payload)?;
        // A replay gets a fresh job_id: the original identity is spent
        let job_id = format!("replay-{}", Uuid::new_v4());
        self.enqueue(&entry.queue, &entry.job_name, &job_id, &payload)
            .await
    }

    /// Apply the queue's retention windows to finished rows
    pub async fn prune(&self, queue: &str) -> Result<u64> {
        let policy = RetryPolicy::for_queue(queue);
        let mut removed = 0u64;

        removed += self
            .prune_status(queue, "completed", policy.keep_completed)
            .await?;
        for status in ["failed", "dead"] {
            removed += self.prune_status(queue, status, policy.keep_failed).await?;
        }

        if removed > 0 {
            debug!(queue, removed, "Pruned finished jobs");
        }
        Ok(removed)
    }

    async fn prune_status(
        &self,
        queue: &str,
        status: &str,
        window: crate::queue::policy::RetentionWindow,
    ) -> Result<u64> {
        let cutoff = (Utc::now() - ChronoDuration::seconds(window.age_secs)).to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE queue = ? AND status = ?
               AND (finished_at < ?
                    OR id NOT IN (
                        SELECT id FROM jobs
                        WHERE queue = ? AND status = ?
                        ORDER BY finished_at DESC
                        LIMIT ?
                    ))",
        )
        .bind(queue)
        .bind(status)
        .bind(&cutoff)
        .bind(queue)
        .bind(status)
        .bind(window.count)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}
