//! Per-queue retry profiles
//!
//! Each queue carries a profile: attempt budget, backoff curve, and how long
//! finished rows are retained for inspection before pruning.

use rand::Rng;
use std::time::Duration;

/// Backoff curve between retry attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// No delay (single-attempt queues never consult this)
    None,
    /// Constant delay between attempts
    Fixed {
        /// Delay in seconds
        delay_secs: u64,
    },
    /// Delay doubles per attempt, with up to 25% random jitter
    Exponential {
        /// Delay before the first retry, in seconds
        initial_secs: u64,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: i64) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
            Backoff::Exponential { initial_secs } => {
                let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
                let base = initial_secs.saturating_mul(2u64.saturating_pow(exponent));
                let jitter = (base as f64 * 0.25 * rand::thread_rng().gen::<f64>()) as u64;
                Duration::from_secs(base + jitter)
            }
        }
    }
}

/// Retention window for finished jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    /// Keep at most this many rows
    pub count: i64,
    /// Keep rows no older than this many seconds
    pub age_secs: i64,
}

/// Retry profile for one queue
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed (first try included)
    pub max_attempts: i64,
    /// Backoff curve between attempts
    pub backoff: Backoff,
    /// Retention for completed jobs
    pub keep_completed: RetentionWindow,
    /// Retention for failed/dead jobs
    pub keep_failed: RetentionWindow,
}

impl RetryPolicy {
    /// Registered profile for a queue name
    ///
    /// Unknown queues get the conservative agent profile.
    pub fn for_queue(queue: &str) -> Self {
        match queue {
            super::AGENT_QUEUE => Self {
                max_attempts: 1,
                backoff: Backoff::None,
                keep_completed: RetentionWindow {
                    count: 100,
                    age_secs: 86_400,
                },
                keep_failed: RetentionWindow {
                    count: 200,
                    age_secs: 604_800,
                },
            },
            super::EMAIL_QUEUE => Self {
                max_attempts: 5,
                backoff: Backoff::Exponential { initial_secs: 5 },
                keep_completed: RetentionWindow {
                    count: 100,
                    age_secs: 86_400,
                },
                keep_failed: RetentionWindow {
                    count: 500,
                    age_secs: 604_800,
                },
            },
            super::ANALYSIS_QUEUE => Self {
                max_attempts: 3,
                backoff: Backoff::Exponential { initial_secs: 10 },
                keep_completed: RetentionWindow {
                    count: 50,
                    age_secs: 43_200,
                },
                keep_failed: RetentionWindow {
                    count: 200,
                    age_secs: 259_200,
                },
            },
            super::GENERATION_QUEUE => Self {
                max_attempts: 3,
                backoff: Backoff::Exponential { initial_secs: 15 },
                keep_completed: RetentionWindow {
                    count: 50,
                    age_secs: 43_200,
                },
                keep_failed: RetentionWindow {
                    count: 200,
                    age_secs: 259_200,
                },
            },
            super::PORTAL_QUEUE => Self {
                max_attempts: 2,
                backoff: Backoff::Fixed { delay_secs: 60 },
                keep_completed: RetentionWindow {
                    count: 50,
                    age_secs: 43_200,
                },
                keep_failed: RetentionWindow {
                    count: 200,
                    age_secs: 259_200,
                },
            },
            _ => Self {
                max_attempts: 1,
                backoff: Backoff::None,
                keep_completed: RetentionWindow {
                    count: 100,
                    age_secs: 86_400,
                },
                keep_failed: RetentionWindow {
                    count: 200,
                    age_secs: 604_800,
                },
            },
        }
    }
}
