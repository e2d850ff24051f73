//! Database management and migrations
//!
//! SQLite connection pooling, embedded migrations, and the typed models and
//! repositories the engine persists through. The database is the sole source
//! of truth; the checkpoint store is a cache beside it.

pub mod models;
pub mod repositories;

use crate::error::{EngineError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating if missing) the SQLite database at `path`
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| EngineError::Config("invalid database path".to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Config(format!("failed to create database directory: {}", e))
                })?;
            }
        }

        let url = format!("sqlite:{}", path_str);
        debug!(url = %url, "Connecting to database");
        Self::connect(&url, 5).await
    }

    /// Connect to a database URL with a custom pool size
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(EngineError::Sqlx)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(EngineError::Sqlx)?;

        info!(url = %database_url, "Database connection established");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run embedded migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| EngineError::Config(format!("migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(EngineError::Sqlx)?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Open the database and run migrations in one step
    pub async fn initialize<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let db = Self::new(database_path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// In-memory database with migrations applied, for tests
    pub async fn test_in_memory() -> Result<Self> {
        let db = Self::connect("sqlite::memory:", 1).await?;
        db.run_migrations().await?;
        Ok(db)
    }
}
