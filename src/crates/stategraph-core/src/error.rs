//! Error types for graph construction and execution

use thiserror::Error;

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or executing a graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph definition failed validation
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Execution reached a node name with no definition
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A conditional router returned a label outside its declared destinations
    #[error("router at {node} returned undeclared destination: {label}")]
    InvalidRoute {
        /// Node whose outgoing router misbehaved
        node: String,
        /// The undeclared label it returned
        label: String,
    },

    /// A node was visited more often than the configured bound allows
    #[error("node {node} exceeded {limit} visits")]
    IterationLimit {
        /// Node that looped
        node: String,
        /// Configured per-node visit bound
        limit: u32,
    },

    /// Resume was requested for a thread with no checkpoint
    #[error("no checkpoint for thread: {0}")]
    NoCheckpoint(String),

    /// Resume was requested for a thread that is not suspended
    #[error("thread {0} has no pending interrupt to resume")]
    NotInterrupted(String),

    /// A node executor failed
    #[error("node {node} failed: {message}")]
    Node {
        /// Node that failed
        node: String,
        /// Error description from the executor
        message: String,
    },

    /// Checkpoint store failure
    #[error(transparent)]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),

    /// State could not be (de)serialized
    #[error("graph state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
