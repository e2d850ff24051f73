//! Durable agent run engine for public-records request cases
//!
//! This crate executes one *trigger* - an initial request, an inbound agency
//! reply, a scheduled follow-up, or a human-decision resume - against a case,
//! with exactly-once side effects, human-in-the-loop gating, per-case mutual
//! exclusion, crash recovery, and dead-letter handling.
//!
//! Components, leaves first:
//!
//! - [`db`] - SQLite persistence: entities, repositories, atomic primitives
//! - [`queue`] - durable job queue with idempotent enqueue and retry profiles
//! - [`lock`] - per-case exclusion, heartbeats, and the run reaper
//! - [`graphs`] - the two case graphs (initial-request, inbound-response)
//! - [`collaborators`] - traits for the classifier, drafter, executors, notifier
//! - [`remote`] - HTTP-backed implementations of the collaborator traits
//! - [`engine`] - job-to-handler routing and run lifecycle interpretation
//! - [`context`] - ordered wiring of the above into an application context

pub mod collaborators;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod graphs;
pub mod keys;
pub mod lock;
pub mod queue;
pub mod remote;
pub mod review;
pub mod shutdown;

pub use config::EngineConfig;
pub use context::AppContext;
pub use engine::RunEngine;
pub use error::{EngineError, Result};
