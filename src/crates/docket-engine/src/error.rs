//! Error types for the run engine
//!
//! Two families matter to callers: errors that are *recovered locally*
//! (idempotency hits and lock contention end the run in SKIPPED) and errors
//! that terminate the run in FAILED. [`EngineError::is_skippable`] draws the
//! line.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the run engine and its components
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unique-constraint violation treated as an idempotency hit
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Another run holds the case lock
    #[error("case lock unavailable: {0}")]
    LockUnavailable(String),

    /// Resume attempted on a proposal past its terminal status
    #[error("proposal {0} is terminal")]
    ProposalTerminal(String),

    /// An execution key was already claimed for this proposal
    #[error("execution already claimed for proposal {0}")]
    ExecutionAlreadyClaimed(String),

    /// Wall-clock deadline exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// An external collaborator failed
    #[error("collaborator {service} failed: {message}")]
    Collaborator {
        /// Which collaborator failed
        service: String,
        /// Failure description
        message: String,
    },

    /// Collaborator output did not carry the expected schema tag
    #[error("schema mismatch: expected {expected}, got {got}")]
    SchemaMismatch {
        /// Schema tag the engine requires
        expected: String,
        /// Tag found on the output
        got: String,
    },

    /// A safety rule blocked the action
    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Graph runtime failure
    #[error(transparent)]
    Graph(#[from] stategraph_core::GraphError),

    /// Checkpoint store failure
    #[error(transparent)]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),

    /// Database failure
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether a run hitting this error should end SKIPPED instead of FAILED
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateKey(_)
                | EngineError::LockUnavailable(_)
                | EngineError::ProposalTerminal(_)
                | EngineError::ExecutionAlreadyClaimed(_)
        )
    }

    /// Short machine-readable reason recorded on skipped runs
    pub fn skip_reason(&self) -> &'static str {
        match self {
            EngineError::DuplicateKey(_) => "duplicate_key",
            EngineError::LockUnavailable(_) => "case_locked",
            EngineError::ProposalTerminal(_) => "proposal_terminal",
            EngineError::ExecutionAlreadyClaimed(_) => "execution_already_claimed",
            _ => "error",
        }
    }
}

/// Whether an sqlx error is a SQLite unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.message().contains("UNIQUE constraint failed")
                || db_err.code().as_deref() == Some("2067")
        }
        _ => false,
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            EngineError::DuplicateKey(err.to_string())
        } else {
            EngineError::Sqlx(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skippable_classification() {
        assert!(EngineError::DuplicateKey("k".into()).is_skippable());
        assert!(EngineError::LockUnavailable("c".into()).is_skippable());
        assert!(EngineError::ProposalTerminal("p".into()).is_skippable());
        assert!(EngineError::ExecutionAlreadyClaimed("p".into()).is_skippable());
        assert!(!EngineError::Timeout("graph".into()).is_skippable());
        assert!(!EngineError::SchemaMismatch {
            expected: "v1".into(),
            got: "v0".into()
        }
        .is_skippable());
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(
            EngineError::LockUnavailable("c".into()).skip_reason(),
            "case_locked"
        );
        assert_eq!(
            EngineError::ExecutionAlreadyClaimed("p".into()).skip_reason(),
            "execution_already_claimed"
        );
    }
}
