//! Repositories for database operations
//!
//! Stateless structs with async methods over a [`DatabasePool`]. All writes
//! that back an idempotency guarantee are single conditional statements; the
//! caller learns the outcome from the affected-row count or a unique-key
//! conflict.
//!
//! [`DatabasePool`]: crate::db::DatabasePool

pub mod case_repo;
pub mod dead_letter_repo;
pub mod execution_repo;
pub mod followup_repo;
pub mod message_repo;
pub mod proposal_repo;
pub mod run_repo;

pub use case_repo::CaseRepository;
pub use dead_letter_repo::DeadLetterRepository;
pub use execution_repo::ExecutionRepository;
pub use followup_repo::FollowUpRepository;
pub use message_repo::MessageRepository;
pub use proposal_repo::ProposalRepository;
pub use run_repo::RunRepository;
