//! Engine configuration
//!
//! All knobs have defaults matching production behaviour; tests shrink the
//! time-based ones. A TOML file can override any field.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fee at or below which AUTO mode approves without gating
pub const FEE_AUTO_APPROVE_MAX: f64 = 100.0;

/// Fee at or below which the engine proposes acceptance (gated); above,
/// negotiation is proposed instead
pub const FEE_NEGOTIATE_THRESHOLD: f64 = 500.0;

/// Endpoints for HTTP-backed collaborator services
///
/// Each URL receives the structured context for its contract as a JSON POST
/// and must answer with the matching schema-tagged JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorEndpoints {
    /// Classifier service URL
    pub classifier_url: String,
    /// Drafter service URL
    pub drafter_url: String,
    /// Email executor URL
    pub email_url: String,
    /// Portal-task executor URL
    pub portal_url: String,
    /// Notifier URL; omitted means notifications are only logged
    pub notify_url: Option<String>,
}

/// Tunable parameters for the run engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// How long a run may hold the case lock before the reaper reclaims it
    pub lock_ttl_secs: u64,

    /// Interval between heartbeat refreshes while a run is executing
    pub heartbeat_secs: u64,

    /// How long to wait for the advisory lock before skipping
    pub lock_wait_secs: u64,

    /// Interval between reaper sweeps
    pub reaper_interval_secs: u64,

    /// Wall-clock deadline for one graph invocation
    pub graph_timeout_secs: u64,

    /// Per-node visit bound within one graph invocation
    pub max_node_visits: u32,

    /// Fee auto-approve ceiling for AUTO mode
    pub fee_auto_approve_max: f64,

    /// Fee negotiation threshold
    pub fee_negotiate_threshold: f64,

    /// When set, executors return synthetic success without side effects
    pub dry_run: bool,

    /// Remote collaborator endpoints; required when `dry_run` is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaborators: Option<CollaboratorEndpoints>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "docket.db".to_string(),
            lock_ttl_secs: 1800,
            heartbeat_secs: 30,
            lock_wait_secs: 10,
            reaper_interval_secs: 60,
            graph_timeout_secs: 120,
            max_node_visits: 5,
            fee_auto_approve_max: FEE_AUTO_APPROVE_MAX,
            fee_negotiate_threshold: FEE_NEGOTIATE_THRESHOLD,
            dry_run: false,
            collaborators: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(format!("cannot read config file: {}", e)))?;
        toml::from_str(&raw).map_err(|e| EngineError::Config(format!("invalid config: {}", e)))
    }

    /// Set the database path
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set the lock TTL
    pub fn with_lock_ttl(mut self, secs: u64) -> Self {
        self.lock_ttl_secs = secs;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat(mut self, secs: u64) -> Self {
        self.heartbeat_secs = secs;
        self
    }

    /// Set the graph execution timeout
    pub fn with_graph_timeout(mut self, secs: u64) -> Self {
        self.graph_timeout_secs = secs;
        self
    }

    /// Enable or disable dry-run execution
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the remote collaborator endpoints
    pub fn with_collaborators(mut self, endpoints: CollaboratorEndpoints) -> Self {
        self.collaborators = Some(endpoints);
        self
    }

    /// Lock TTL as a [`Duration`]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Heartbeat interval as a [`Duration`]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Advisory-lock wait as a [`Duration`]
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    /// Graph timeout as a [`Duration`]
    pub fn graph_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_ttl_secs, 1800);
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.reaper_interval_secs, 60);
        assert_eq!(config.graph_timeout_secs, 120);
        assert_eq!(config.max_node_visits, 5);
        assert_eq!(config.fee_auto_approve_max, 100.0);
        assert_eq!(config.fee_negotiate_threshold, 500.0);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_lock_ttl(60)
            .with_heartbeat(5)
            .with_graph_timeout(10)
            .with_dry_run(true);

        assert_eq!(config.lock_ttl(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.graph_timeout(), Duration::from_secs(10));
        assert!(config.dry_run);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::new().with_database_path("/tmp/x.db");
        let raw = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.database_path, "/tmp/x.db");
        assert_eq!(parsed.lock_ttl_secs, 1800);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: EngineConfig = toml::from_str("graph_timeout_secs = 15").unwrap();
        assert_eq!(parsed.graph_timeout_secs, 15);
        assert_eq!(parsed.lock_ttl_secs, 1800);
        assert!(parsed.collaborators.is_none());
    }

    #[test]
    fn test_collaborator_endpoints_from_toml() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            dry_run = false

            [collaborators]
            classifier_url = "http://llm.internal/classify"
            drafter_url = "http://llm.internal/draft"
            email_url = "http://mailer.internal/send"
            portal_url = "http://portal.internal/tasks"
            "#,
        )
        .unwrap();

        let endpoints = parsed.collaborators.unwrap();
        assert_eq!(endpoints.classifier_url, "http://llm.internal/classify");
        assert_eq!(endpoints.email_url, "http://mailer.internal/send");
        assert!(endpoints.notify_url.is_none());
    }
}
