//! Per-case mutual exclusion and crash recovery
//!
//! Exclusion is twofold. The advisory lock gives correctness under
//! concurrent workers: it is session-scoped, so a crashed holder's guard
//! drops and the case can never deadlock. The run row gives observability
//! and crash recovery: it records the holder, its heartbeat, and an
//! authoritative `lock_expires_at` that each heartbeat extends. The reaper
//! reconciles runs whose TTL passed without touching the advisory lock.

use crate::collaborators::{notify_best_effort, Notifier, NotifyEvent};
use crate::config::EngineConfig;
use crate::db::repositories::RunRepository;
use crate::db::DatabasePool;
use crate::error::{EngineError, Result};
use crate::keys::case_lock_key;
use crate::shutdown::ShutdownCoordinator;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Process-wide advisory locks keyed by hashed identifiers
///
/// Guards are owned: dropping one (normally or by task abort) releases the
/// lock, which is the session-scoped behaviour the engine depends on.
#[derive(Default)]
pub struct AdvisoryLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AdvisoryLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting at most `wait`
    ///
    /// # Errors
    ///
    /// [`EngineError::LockUnavailable`] when the wait times out.
    pub async fn acquire(
        &self,
        key: i64,
        wait: std::time::Duration,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| EngineError::LockUnavailable(format!("advisory lock {}", key)))
    }
}

/// Per-case lock orchestration around a run body
pub struct LockManager {
    pool: Arc<DatabasePool>,
    locks: Arc<AdvisoryLocks>,
    config: EngineConfig,
}

impl LockManager {
    /// Create a lock manager over the shared pool and registry
    pub fn new(pool: Arc<DatabasePool>, locks: Arc<AdvisoryLocks>, config: EngineConfig) -> Self {
        Self {
            pool,
            locks,
            config,
        }
    }

    /// Heartbeats older than this mean the holder is presumed dead
    fn heartbeat_freshness(&self) -> ChronoDuration {
        ChronoDuration::seconds((self.config.heartbeat_secs * 4).max(60) as i64)
    }

    /// Execute `body` while holding the case lock
    ///
    /// 1. Acquire the advisory lock hashed from `case:{case_id}`.
    /// 2. Skip when another run is RUNNING with a fresh heartbeat.
    /// 3. Mark the run RUNNING with `lock_expires_at = now + lock_ttl`.
    /// 4. Tick a heartbeat that extends the expiry while `body` executes.
    /// 5. Record FAILED (or SKIPPED for idempotency hits) on error;
    ///    successful bodies write their own terminal status.
    pub async fn with_case_lock<F, Fut, T>(
        &self,
        case_id: &str,
        run_id: &str,
        thread_id: &str,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = case_lock_key(case_id);
        let guard = match self.locks.acquire(key, self.config.lock_wait()).await {
            Ok(guard) => guard,
            Err(err) => {
                RunRepository::mark_skipped(self.pool.as_ref(), run_id, err.skip_reason()).await?;
                return Err(err);
            }
        };

        if let Some(active) =
            RunRepository::active_run(self.pool.as_ref(), case_id, self.heartbeat_freshness())
                .await?
        {
            if active.id != run_id {
                debug!(case_id, run_id, active_run = %active.id, "Active run holds the case");
                RunRepository::mark_skipped(self.pool.as_ref(), run_id, "active_run").await?;
                drop(guard);
                return Err(EngineError::LockUnavailable(format!(
                    "case {} has active run {}",
                    case_id, active.id
                )));
            }
        }

        let lock_ttl = ChronoDuration::seconds(self.config.lock_ttl_secs as i64);
        RunRepository::mark_running(self.pool.as_ref(), run_id, thread_id, lock_ttl).await?;
        debug!(case_id, run_id, "Run started under case lock");

        let ticker = self.spawn_heartbeat(run_id.to_string(), lock_ttl);
        let result = body().await;
        ticker.abort();

        match &result {
            Ok(_) => {}
            Err(err) if err.is_skippable() => {
                RunRepository::mark_skipped(self.pool.as_ref(), run_id, err.skip_reason()).await?;
            }
            Err(err) => {
                RunRepository::mark_failed(self.pool.as_ref(), run_id, &err.to_string()).await?;
            }
        }

        drop(guard);
        result
    }

    fn spawn_heartbeat(
        &self,
        run_id: String,
        lock_ttl: ChronoDuration,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let interval = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(err) = RunRepository::heartbeat(&pool, &run_id, lock_ttl).await {
                    warn!(run_id = %run_id, error = %err, "Heartbeat refresh failed");
                }
            }
        })
    }
}

/// Background reaper for runs whose lock TTL passed
pub struct Reaper {
    pool: Arc<DatabasePool>,
    notifier: Option<Arc<dyn Notifier>>,
    interval: std::time::Duration,
}

impl Reaper {
    /// Create a reaper over the shared pool
    pub fn new(pool: Arc<DatabasePool>, config: &EngineConfig) -> Self {
        Self {
            pool,
            notifier: None,
            interval: std::time::Duration::from_secs(config.reaper_interval_secs),
        }
    }

    /// Attach a notifier for reclaimed runs
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// One sweep: expired RUNNING runs become TIMED_OUT
    ///
    /// The advisory lock is untouched - the crashed session released it (or
    /// will, when the holder task dies). Returns how many runs were
    /// reclaimed.
    pub async fn sweep(&self) -> Result<u64> {
        let expired = RunRepository::list_expired(self.pool.as_ref(), Utc::now()).await?;
        let mut reclaimed = 0u64;

        for run in expired {
            if RunRepository::reap(self.pool.as_ref(), &run.id).await? {
                reclaimed += 1;
                info!(run_id = %run.id, case_id = %run.case_id, "Stale run reclaimed");

                if let Some(notifier) = &self.notifier {
                    notify_best_effort(
                        notifier.as_ref(),
                        NotifyEvent::RunFailed {
                            case_id: run.case_id.clone(),
                            run_id: run.id.clone(),
                            error: "lock_expired".to_string(),
                        },
                    )
                    .await;
                }
            }
        }

        Ok(reclaimed)
    }

    /// Run sweeps on the configured interval until shutdown
    pub fn spawn(self, shutdown: ShutdownCoordinator) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Reaper started");
            while !shutdown.is_requested() {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {
                        if let Err(err) = self.sweep().await {
                            warn!(error = %err, "Reaper sweep failed");
                        }
                    }
                    _ = shutdown.wait() => {}
                }
            }
            info!("Reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Case, Run, TriggerType};
    use crate::db::repositories::CaseRepository;
    use crate::db::Database;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig::new().with_lock_ttl(60).with_heartbeat(1)
    }

    async fn seed(db: &Database) {
        let case = Case::new("c-1".into(), "Agency".into(), "req".into());
        CaseRepository::create(db.pool(), &case).await.unwrap();
    }

    async fn seed_run(db: &Database, id: &str) {
        let run = Run::new(id.into(), "c-1".into(), TriggerType::InboundMessage);
        RunRepository::create(db.pool(), &run).await.unwrap();
    }

    #[tokio::test]
    async fn test_advisory_lock_blocks_second_holder() {
        let locks = AdvisoryLocks::new();

        let guard = locks.acquire(7, Duration::from_millis(50)).await.unwrap();
        let denied = locks.acquire(7, Duration::from_millis(50)).await;
        assert!(matches!(denied, Err(EngineError::LockUnavailable(_))));

        drop(guard);
        assert!(locks.acquire(7, Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = AdvisoryLocks::new();
        let _a = locks.acquire(1, Duration::from_millis(50)).await.unwrap();
        let _b = locks.acquire(2, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn test_with_case_lock_runs_body() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;

        let manager = LockManager::new(
            Arc::new(db.pool().clone()),
            Arc::new(AdvisoryLocks::new()),
            test_config(),
        );

        let result = manager
            .with_case_lock("c-1", "r-1", "case:c-1", || async { Ok(21 * 2) })
            .await
            .unwrap();
        assert_eq!(result, 42);

        // Body ran with the run marked RUNNING; final status is the body's
        // to write, so it is still running here
        let run = RunRepository::get_by_id(db.pool(), "r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, "running");
        assert!(run.lock_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_with_case_lock_skips_on_active_run() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;
        seed_run(&db, "r-2").await;

        // r-1 is running with a fresh heartbeat
        RunRepository::mark_running(db.pool(), "r-1", "case:c-1", ChronoDuration::minutes(30))
            .await
            .unwrap();

        let manager = LockManager::new(
            Arc::new(db.pool().clone()),
            Arc::new(AdvisoryLocks::new()),
            test_config(),
        );

        let err = manager
            .with_case_lock("c-1", "r-2", "case:c-1", || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockUnavailable(_)));

        let run = RunRepository::get_by_id(db.pool(), "r-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, "skipped");
        assert_eq!(run.skip_reason.as_deref(), Some("active_run"));
    }

    #[tokio::test]
    async fn test_with_case_lock_marks_failed_on_error() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;

        let manager = LockManager::new(
            Arc::new(db.pool().clone()),
            Arc::new(AdvisoryLocks::new()),
            test_config(),
        );

        let err = manager
            .with_case_lock("c-1", "r-1", "case:c-1", || async {
                Err::<(), _>(EngineError::Timeout("graph_execution_timeout".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));

        let run = RunRepository::get_by_id(db.pool(), "r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, "failed");
        assert!(run
            .error_message
            .unwrap()
            .contains("graph_execution_timeout"));
    }

    #[tokio::test]
    async fn test_serialized_bodies_on_same_case() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;
        seed_run(&db, "r-2").await;

        let manager = Arc::new(LockManager::new(
            Arc::new(db.pool().clone()),
            Arc::new(AdvisoryLocks::new()),
            test_config().with_lock_ttl(60),
        ));

        // First body completes its run, so the second may proceed after it
        manager
            .with_case_lock("c-1", "r-1", "case:c-1", || async {
                RunRepository::mark_completed(db.pool(), "r-1", "[]").await?;
                Ok(())
            })
            .await
            .unwrap();

        manager
            .with_case_lock("c-1", "r-2", "case:c-1", || async {
                RunRepository::mark_completed(db.pool(), "r-2", "[]").await?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            RunRepository::count_by_status(db.pool(), "c-1", crate::db::models::RunStatus::Completed)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_reaper_reclaims_expired_run() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;

        RunRepository::mark_running(db.pool(), "r-1", "case:c-1", ChronoDuration::minutes(30))
            .await
            .unwrap();
        sqlx::query(
            "UPDATE runs SET lock_expires_at = '2000-01-01T00:00:00+00:00',
                             heartbeat_at = '2000-01-01T00:00:00+00:00'
             WHERE id = 'r-1'",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let reaper = Reaper::new(Arc::new(db.pool().clone()), &test_config());
        assert_eq!(reaper.sweep().await.unwrap(), 1);

        let run = RunRepository::get_by_id(db.pool(), "r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, "timed_out");
        assert_eq!(run.recovery_attempted, 1);

        // The case is free again: a new run can take the lock
        seed_run(&db, "r-2").await;
        let manager = LockManager::new(
            Arc::new(db.pool().clone()),
            Arc::new(AdvisoryLocks::new()),
            test_config(),
        );
        manager
            .with_case_lock("c-1", "r-2", "case:c-1", || async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reaper_sweep_is_idempotent() {
        let db = Database::test_in_memory().await.unwrap();
        seed(&db).await;
        seed_run(&db, "r-1").await;

        RunRepository::mark_running(db.pool(), "r-1", "case:c-1", ChronoDuration::minutes(30))
            .await
            .unwrap();
        sqlx::query("UPDATE runs SET lock_expires_at = '2000-01-01T00:00:00+00:00' WHERE id = 'r-1'")
            .execute(db.pool())
            .await
            .unwrap();

        let reaper = Reaper::new(Arc::new(db.pool().clone()), &test_config());
        assert_eq!(reaper.sweep().await.unwrap(), 1);
        assert_eq!(reaper.sweep().await.unwrap(), 0);
    }
}
