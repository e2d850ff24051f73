//! Review-state projection
//!
//! The UI-visible review state is a pure function of (case status,
//! requires-human flag, active proposal status, active run status).
//! Identical inputs always produce identical outputs; nothing here reads
//! the database.

use crate::db::models::{CaseStatus, ProposalStatus, ReviewState, RunStatus};

/// Project the review state for a case
///
/// Precedence, first match wins:
/// 1. closed/withdrawn cases are idle
/// 2. a run in flight is processing
/// 3. a received-but-unapplied decision is applying
/// 4. anything needing a human is decision-required
/// 5. cases waiting on the agency are waiting
/// 6. otherwise idle
pub fn review_state_for(
    case_status: CaseStatus,
    requires_human: bool,
    proposal_status: Option<ProposalStatus>,
    run_status: Option<RunStatus>,
) -> ReviewState {
    if matches!(case_status, CaseStatus::Closed | CaseStatus::Withdrawn) {
        return ReviewState::Idle;
    }

    if matches!(
        run_status,
        Some(RunStatus::Created) | Some(RunStatus::Queued) | Some(RunStatus::Running)
    ) {
        return ReviewState::Processing;
    }

    if proposal_status == Some(ProposalStatus::DecisionReceived) {
        return ReviewState::DecisionApplying;
    }

    if requires_human
        || run_status == Some(RunStatus::Waiting)
        || matches!(run_status, Some(RunStatus::Failed) | Some(RunStatus::TimedOut))
        || proposal_status == Some(ProposalStatus::PendingApproval)
    {
        return ReviewState::DecisionRequired;
    }

    if matches!(
        case_status,
        CaseStatus::RequestSent
            | CaseStatus::AwaitingAgency
            | CaseStatus::InNegotiation
            | CaseStatus::PortalRequired
    ) {
        return ReviewState::WaitingAgency;
    }

    ReviewState::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_cases_are_idle_regardless() {
        assert_eq!(
            review_state_for(
                CaseStatus::Closed,
                true,
                Some(ProposalStatus::PendingApproval),
                Some(RunStatus::Waiting),
            ),
            ReviewState::Idle
        );
        assert_eq!(
            review_state_for(CaseStatus::Withdrawn, false, None, None),
            ReviewState::Idle
        );
    }

    #[test]
    fn test_running_run_is_processing() {
        assert_eq!(
            review_state_for(
                CaseStatus::AwaitingAgency,
                false,
                None,
                Some(RunStatus::Running)
            ),
            ReviewState::Processing
        );
    }

    #[test]
    fn test_waiting_run_requires_decision() {
        assert_eq!(
            review_state_for(
                CaseStatus::AwaitingAgency,
                false,
                Some(ProposalStatus::PendingApproval),
                Some(RunStatus::Waiting),
            ),
            ReviewState::DecisionRequired
        );
    }

    #[test]
    fn test_failed_run_requires_decision() {
        assert_eq!(
            review_state_for(CaseStatus::AwaitingAgency, false, None, Some(RunStatus::Failed)),
            ReviewState::DecisionRequired
        );
    }

    #[test]
    fn test_decision_received_is_applying() {
        assert_eq!(
            review_state_for(
                CaseStatus::AwaitingAgency,
                false,
                Some(ProposalStatus::DecisionReceived),
                Some(RunStatus::Waiting),
            ),
            ReviewState::DecisionApplying
        );
    }

    #[test]
    fn test_request_sent_waits_on_agency() {
        assert_eq!(
            review_state_for(
                CaseStatus::RequestSent,
                false,
                Some(ProposalStatus::Executed),
                Some(RunStatus::Completed),
            ),
            ReviewState::WaitingAgency
        );
    }

    #[test]
    fn test_draft_case_is_idle() {
        assert_eq!(
            review_state_for(CaseStatus::Draft, false, None, None),
            ReviewState::Idle
        );
    }

    #[test]
    fn test_projection_is_deterministic() {
        let inputs = (
            CaseStatus::InNegotiation,
            true,
            Some(ProposalStatus::PendingApproval),
            Some(RunStatus::Waiting),
        );
        let first = review_state_for(inputs.0, inputs.1, inputs.2, inputs.3);
        let second = review_state_for(inputs.0, inputs.1, inputs.2, inputs.3);
        assert_eq!(first, second);
    }
}
