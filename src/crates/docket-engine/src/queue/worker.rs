//! Queue worker loop
//!
//! Polls a queue, hands claimed jobs to a [`JobHandler`], and settles the
//! job with the queue afterwards. Handler-level skip outcomes are not queue
//! failures: the handler records them on the run and returns `Ok`, so the
//! queue job completes.

use crate::db::models::Job;
use crate::error::Result;
use crate::queue::queue::JobQueue;
use crate::shutdown::ShutdownCoordinator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Receiver for claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one claimed job
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Single-queue polling worker
pub struct Worker {
    queue: JobQueue,
    queue_name: String,
    handler: Arc<dyn JobHandler>,
    shutdown: ShutdownCoordinator,
    poll_interval: Duration,
}

impl Worker {
    /// Create a worker over a queue and handler
    pub fn new(
        queue: JobQueue,
        queue_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            handler,
            shutdown,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until shutdown is requested
    ///
    /// Each claimed job runs to completion before the next claim; per-case
    /// concurrency is the lock manager's concern, not the worker's.
    pub async fn run(&self) -> Result<()> {
        info!(queue = %self.queue_name, "Worker started");

        while !self.shutdown.is_requested() {
            match self.queue.claim(&self.queue_name).await? {
                Some(job) => self.dispatch(&job).await?,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = self.shutdown.wait() => {}
                    }
                }
            }
        }

        info!(queue = %self.queue_name, "Worker stopped");
        Ok(())
    }

    /// Process one job and settle it with the queue
    pub async fn dispatch(&self, job: &Job) -> Result<()> {
        match self.handler.handle(job).await {
            Ok(()) => self.queue.complete(job).await,
            Err(err) => {
                error!(name = %job.name, error = %err, "Job handler failed");
                self.queue.fail(job, &err.to_string()).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::EngineError;
    use crate::queue::AGENT_QUEUE;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct FlakyHandler {
        succeed_after: i64,
        calls: Mutex<i64>,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<()> {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            if *calls >= self.succeed_after {
                Ok(())
            } else {
                Err(EngineError::Collaborator {
                    service: "test".to_string(),
                    message: "transient".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_completes_successful_job() {
        let db = Database::test_in_memory().await.unwrap();
        let queue = JobQueue::new(Arc::new(db.pool().clone()));
        let handler = Arc::new(FlakyHandler {
            succeed_after: 1,
            calls: Mutex::new(0),
        });
        let worker = Worker::new(
            queue.clone(),
            AGENT_QUEUE,
            handler,
            ShutdownCoordinator::new(),
        );

        queue
            .enqueue(AGENT_QUEUE, "job", "j-1", &json!({}))
            .await
            .unwrap();
        let job = queue.claim(AGENT_QUEUE).await.unwrap().unwrap();
        worker.dispatch(&job).await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, "completed");
    }

    #[tokio::test]
    async fn test_dispatch_fails_job_into_queue_policy() {
        let db = Database::test_in_memory().await.unwrap();
        let queue = JobQueue::new(Arc::new(db.pool().clone()));
        let handler = Arc::new(FlakyHandler {
            succeed_after: 99,
            calls: Mutex::new(0),
        });
        let worker = Worker::new(
            queue.clone(),
            AGENT_QUEUE,
            handler,
            ShutdownCoordinator::new(),
        );

        queue
            .enqueue(AGENT_QUEUE, "job", "j-1", &json!({}))
            .await
            .unwrap();
        let job = queue.claim(AGENT_QUEUE).await.unwrap().unwrap();
        worker.dispatch(&job).await.unwrap();

        // Agent queue: one attempt, straight to dead
        let row: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, "dead");
    }
}
