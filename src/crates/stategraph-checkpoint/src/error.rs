//! Error types for checkpoint operations

use thiserror::Error;

/// Result type alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by checkpoint stores
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Backend storage failure
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    /// Checkpoint state could not be (de)serialized
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite backend failure
    #[error("checkpoint database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}
