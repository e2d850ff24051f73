//! Database models
//!
//! Row structs mirror the SQLite schema: ids are TEXT UUIDs, timestamps are
//! RFC3339 TEXT, and enum-valued columns are TEXT validated through the
//! types in [`enums`].

pub mod case;
pub mod dead_letter;
pub mod enums;
pub mod execution;
pub mod followup;
pub mod job;
pub mod message;
pub mod proposal;
pub mod run;

pub use case::Case;
pub use dead_letter::DeadLetterEntry;
pub use enums::{
    ActionType, AutopilotMode, CaseStatus, HumanAction, PauseReason, ProposalStatus, ReviewState,
    RunStatus, TriggerType,
};
pub use execution::Execution;
pub use followup::FollowUpSchedule;
pub use job::Job;
pub use message::Message;
pub use proposal::Proposal;
pub use run::Run;
