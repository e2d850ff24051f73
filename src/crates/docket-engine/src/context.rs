//! Application context
//!
//! Components are wired in dependency order - persistent store, checkpoint
//! store, queue, lock manager, graph runtime, run engine - and torn down in
//! reverse. Nothing here is a singleton: every handle flows through this
//! context.

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::engine::RunEngine;
use crate::error::Result;
use crate::graphs::nodes::NodeServices;
use crate::graphs::CaseGraphs;
use crate::lock::{AdvisoryLocks, LockManager, Reaper};
use crate::queue::{JobQueue, Worker, AGENT_QUEUE};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use stategraph_checkpoint::{CheckpointStore, SqliteCheckpointStore};
use tracing::info;

/// Wired application context
pub struct AppContext {
    /// Persistent store
    pub database: Database,
    /// Durable checkpoint store (always the SQLite backend in production)
    pub checkpointer: Arc<dyn CheckpointStore>,
    /// Job queue
    pub queue: JobQueue,
    /// Run engine
    pub engine: Arc<RunEngine>,
    /// Shutdown coordinator shared by all background tasks
    pub shutdown: ShutdownCoordinator,
    /// Engine configuration
    pub config: EngineConfig,
}

impl AppContext {
    /// Initialize against the configured database path
    pub async fn init(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        let database = Database::initialize(&config.database_path).await?;
        Self::wire(database, config, collaborators).await
    }

    /// Initialize against an in-memory database (tests)
    pub async fn init_in_memory(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let database = Database::test_in_memory().await?;
        Self::wire(database, config, collaborators).await
    }

    async fn wire(
        database: Database,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let pool = Arc::new(database.pool().clone());

        let sqlite_store = SqliteCheckpointStore::new(database.pool().clone());
        sqlite_store.ensure_schema().await?;
        let checkpointer: Arc<dyn CheckpointStore> = Arc::new(sqlite_store);

        let queue = JobQueue::new(pool.clone()).with_notifier(collaborators.notifier.clone());

        let locks = LockManager::new(pool.clone(), Arc::new(AdvisoryLocks::new()), config.clone());

        let services = Arc::new(NodeServices {
            pool: pool.clone(),
            collaborators: collaborators.clone(),
            config: config.clone(),
        });
        let graphs = CaseGraphs::compile(services, checkpointer.clone(), &config)?;

        let engine = Arc::new(RunEngine::new(
            pool,
            queue.clone(),
            graphs,
            locks,
            collaborators,
            checkpointer.clone(),
            config.clone(),
        ));

        info!("Application context initialized");
        Ok(Self {
            database,
            checkpointer,
            queue,
            engine,
            shutdown: ShutdownCoordinator::new(),
            config,
        })
    }

    /// Spawn the agent-queue worker loop
    pub fn spawn_worker(&self) -> tokio::task::JoinHandle<Result<()>> {
        let worker = Worker::new(
            self.queue.clone(),
            AGENT_QUEUE,
            self.engine.clone(),
            self.shutdown.clone(),
        );
        tokio::spawn(async move { worker.run().await })
    }

    /// Spawn the run reaper
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let reaper = Reaper::new(
            Arc::new(self.database.pool().clone()),
            &self.config,
        );
        reaper.spawn(self.shutdown.clone())
    }

    /// Tear down in reverse initialization order
    pub async fn teardown(self) {
        self.shutdown.request();
        self.database.close().await;
        info!("Application context torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_in_memory_and_teardown() {
        let ctx = AppContext::init_in_memory(
            EngineConfig::default().with_dry_run(true),
            Collaborators::dry_run(),
        )
        .await
        .unwrap();

        ctx.database.health_check().await.unwrap();
        ctx.teardown().await;
    }
}
