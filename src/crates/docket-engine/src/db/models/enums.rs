//! Enumerated column values
//!
//! Stored as snake_case TEXT. Each enum round-trips through `as_str` /
//! `parse` and serializes the same way, so the database, the graph state,
//! and collaborator payloads all agree on spelling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// TEXT form stored in the database
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

text_enum! {
    /// Lifecycle status of a case
    CaseStatus {
        Draft => "draft",
        RequestSent => "request_sent",
        AwaitingAgency => "awaiting_agency",
        InNegotiation => "in_negotiation",
        PortalRequired => "portal_required",
        RecordsReceived => "records_received",
        Closed => "closed",
        Withdrawn => "withdrawn",
    }
}

text_enum! {
    /// UI-visible projection of where a case sits in the review loop
    ReviewState {
        Idle => "idle",
        WaitingAgency => "waiting_agency",
        Processing => "processing",
        DecisionRequired => "decision_required",
        DecisionApplying => "decision_applying",
    }
}

text_enum! {
    /// Per-case policy for bypassing human gates on low-risk actions
    AutopilotMode {
        Auto => "auto",
        Supervised => "supervised",
        Manual => "manual",
    }
}

text_enum! {
    /// Closed set of actions the engine may propose
    ActionType {
        SendInitialRequest => "send_initial_request",
        SendFollowup => "send_followup",
        SendRebuttal => "send_rebuttal",
        SendClarification => "send_clarification",
        AcceptFee => "accept_fee",
        NegotiateFee => "negotiate_fee",
        DeclineFee => "decline_fee",
        SubmitPortal => "submit_portal",
        Escalate => "escalate",
        None => "none",
    }
}

impl ActionType {
    /// Whether this action sends outbound correspondence
    pub fn is_send(&self) -> bool {
        matches!(
            self,
            ActionType::SendInitialRequest
                | ActionType::SendFollowup
                | ActionType::SendRebuttal
                | ActionType::SendClarification
        )
    }
}

text_enum! {
    /// Lifecycle status of a proposal
    ProposalStatus {
        Draft => "draft",
        PendingApproval => "pending_approval",
        DecisionReceived => "decision_received",
        Approved => "approved",
        Executed => "executed",
        Dismissed => "dismissed",
        Superseded => "superseded",
        Cancelled => "cancelled",
        Failed => "failed",
    }
}

impl ProposalStatus {
    /// Terminal statuses freeze the proposal's fields other than timestamps
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Executed
                | ProposalStatus::Dismissed
                | ProposalStatus::Superseded
                | ProposalStatus::Cancelled
                | ProposalStatus::Failed
        )
    }
}

text_enum! {
    /// Lifecycle status of a run
    RunStatus {
        Created => "created",
        Queued => "queued",
        Running => "running",
        Waiting => "waiting",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
        TimedOut => "timed_out",
    }
}

impl RunStatus {
    /// Whether the run has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Skipped | RunStatus::TimedOut
        )
    }
}

text_enum! {
    /// What caused a run
    TriggerType {
        InitialRequest => "initial_request",
        InboundMessage => "inbound_message",
        ScheduledFollowup => "scheduled_followup",
        Resume => "resume",
    }
}

text_enum! {
    /// Why a proposal paused for human review
    PauseReason {
        FeeQuote => "fee_quote",
        Denial => "denial",
        Scope => "scope",
        IdRequired => "id_required",
        Sensitive => "sensitive",
        CloseAction => "close_action",
        PendingApproval => "pending_approval",
    }
}

text_enum! {
    /// Decision a human can take on a pending proposal
    HumanAction {
        Approve => "approve",
        Adjust => "adjust",
        Dismiss => "dismiss",
        Withdraw => "withdraw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_action_types() {
        for action in [
            ActionType::SendInitialRequest,
            ActionType::SendFollowup,
            ActionType::SendRebuttal,
            ActionType::SendClarification,
            ActionType::AcceptFee,
            ActionType::NegotiateFee,
            ActionType::DeclineFee,
            ActionType::SubmitPortal,
            ActionType::Escalate,
            ActionType::None,
        ] {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
    }

    #[test]
    fn test_send_classification() {
        assert!(ActionType::SendRebuttal.is_send());
        assert!(ActionType::SendInitialRequest.is_send());
        assert!(!ActionType::AcceptFee.is_send());
        assert!(!ActionType::SubmitPortal.is_send());
        assert!(!ActionType::None.is_send());
    }

    #[test]
    fn test_proposal_terminal_set() {
        assert!(ProposalStatus::Executed.is_terminal());
        assert!(ProposalStatus::Superseded.is_terminal());
        assert!(ProposalStatus::Failed.is_terminal());
        assert!(!ProposalStatus::PendingApproval.is_terminal());
        assert!(!ProposalStatus::DecisionReceived.is_terminal());
        assert!(!ProposalStatus::Approved.is_terminal());
    }

    #[test]
    fn test_run_terminal_set() {
        assert!(RunStatus::TimedOut.is_terminal());
        assert!(RunStatus::Skipped.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_unknown_text_rejected() {
        assert!("bogus".parse::<CaseStatus>().is_err());
        assert!("bogus".parse::<TriggerType>().is_err());
    }

    #[test]
    fn test_serde_matches_as_str() {
        let encoded = serde_json::to_string(&PauseReason::FeeQuote).unwrap();
        assert_eq!(encoded, "\"fee_quote\"");
        let decoded: PauseReason = serde_json::from_str("\"denial\"").unwrap();
        assert_eq!(decoded, PauseReason::Denial);
    }
}
