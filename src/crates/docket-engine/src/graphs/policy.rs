//! Decision and safety policy
//!
//! Pure functions: the decision table mapping a classification to an action
//! (with autopilot-mode gating and the fee thresholds), and the safety rules
//! applied to a drafted action before it may execute.

use crate::collaborators::Classification;
use crate::config::EngineConfig;
use crate::db::models::{ActionType, AutopilotMode, PauseReason};
use crate::graphs::state::{CaseGraphState, Decision};

/// Days between scheduled follow-ups
pub const FOLLOWUP_INTERVAL_DAYS: i64 = 7;

/// Classifier confidence below which a soft risk flag is raised
pub const LOW_CONFIDENCE_FLOOR: f64 = 0.6;

/// Draft content containing any of these forces a human gate
pub const SENSITIVE_KEYWORDS: &[&str] = &[
    "lawsuit",
    "litigation",
    "attorney",
    "subpoena",
    "minor",
    "victim",
    "confidential informant",
];

fn gated(action: ActionType, pause: PauseReason, reasoning: Vec<String>) -> Decision {
    Decision {
        action_type: action,
        reasoning,
        can_auto_execute: false,
        requires_human: true,
        pause_reason: Some(pause),
    }
}

fn auto(action: ActionType, reasoning: Vec<String>) -> Decision {
    Decision {
        action_type: action,
        reasoning,
        can_auto_execute: true,
        requires_human: false,
        pause_reason: None,
    }
}

/// Decide the next action for an inbound message
///
/// Rules, in order:
/// - a portal signal beats fee and denial signals: the action becomes
///   `submit_portal` and no outbound email is proposed
/// - no response required means no action
/// - fee quotes: at or under the auto ceiling in AUTO mode the fee is
///   accepted unattended; at or under the negotiation threshold acceptance
///   is proposed but gated; above it negotiation is proposed, gated
/// - weak denials in AUTO mode get an unattended rebuttal; everything else
///   denial-shaped is gated
/// - MANUAL mode never auto-executes anything
pub fn decide(
    classification: &Classification,
    mode: AutopilotMode,
    config: &EngineConfig,
) -> Decision {
    if let Some(portal_url) = &classification.portal_url {
        return auto(
            ActionType::SubmitPortal,
            vec![format!("agency redirected to portal {}", portal_url)],
        );
    }

    if !classification.requires_response {
        return Decision {
            action_type: ActionType::None,
            reasoning: vec![classification
                .reason_no_response
                .clone()
                .unwrap_or_else(|| "no response required".to_string())],
            can_auto_execute: false,
            requires_human: false,
            pause_reason: None,
        };
    }

    let manual = mode == AutopilotMode::Manual;

    let decision = match classification.classification.as_str() {
        "fee_request" => match classification.extracted_fee_amount {
            Some(amount) if amount <= config.fee_auto_approve_max => {
                if mode == AutopilotMode::Auto {
                    auto(
                        ActionType::AcceptFee,
                        vec![format!("fee ${:.2} within auto-approve ceiling", amount)],
                    )
                } else {
                    gated(
                        ActionType::AcceptFee,
                        PauseReason::FeeQuote,
                        vec![format!("fee ${:.2} requires sign-off in {} mode", amount, mode)],
                    )
                }
            }
            Some(amount) if amount <= config.fee_negotiate_threshold => gated(
                ActionType::AcceptFee,
                PauseReason::FeeQuote,
                vec![format!("fee ${:.2} above auto ceiling", amount)],
            ),
            Some(amount) => gated(
                ActionType::NegotiateFee,
                PauseReason::FeeQuote,
                vec![format!(
                    "fee ${:.2} above negotiation threshold ${:.2}",
                    amount, config.fee_negotiate_threshold
                )],
            ),
            None => gated(
                ActionType::SendClarification,
                PauseReason::FeeQuote,
                vec!["fee requested but no amount extracted".to_string()],
            ),
        },
        "denial" => {
            let weak = classification.denial_strength.as_deref() == Some("weak");
            if weak && mode == AutopilotMode::Auto {
                auto(
                    ActionType::SendRebuttal,
                    vec!["weak denial; rebutting citable exemption".to_string()],
                )
            } else {
                gated(
                    ActionType::SendRebuttal,
                    PauseReason::Denial,
                    vec!["denial received".to_string()],
                )
            }
        }
        "id_request" => gated(
            ActionType::Escalate,
            PauseReason::IdRequired,
            vec!["agency requires requester identification".to_string()],
        ),
        "records_ready" => Decision {
            action_type: ActionType::None,
            reasoning: vec!["records produced; nothing to send".to_string()],
            can_auto_execute: false,
            requires_human: false,
            pause_reason: None,
        },
        "clarification_request" => gated(
            ActionType::SendClarification,
            PauseReason::Scope,
            vec!["agency asked to narrow or clarify scope".to_string()],
        ),
        other => gated(
            ActionType::SendClarification,
            PauseReason::PendingApproval,
            vec![format!("unrecognized reply category: {}", other)],
        ),
    };

    if manual && decision.can_auto_execute {
        return Decision {
            can_auto_execute: false,
            requires_human: true,
            pause_reason: Some(PauseReason::PendingApproval),
            ..decision
        };
    }
    decision
}

/// Decision for the initial-request and scheduled-follow-up triggers
pub fn initial_decision(trigger: &str, mode: AutopilotMode) -> Decision {
    let action = if trigger == "scheduled_followup" {
        ActionType::SendFollowup
    } else {
        ActionType::SendInitialRequest
    };

    if mode == AutopilotMode::Auto {
        auto(action, vec![format!("{} dispatch in auto mode", action)])
    } else {
        gated(
            action,
            PauseReason::PendingApproval,
            vec![format!("{} requires sign-off in {} mode", action, mode)],
        )
    }
}

/// Apply the safety rules to a drafted decision
///
/// Hard rules force the human gate; soft rules only annotate. Returns the
/// adjusted decision plus any new risk flags.
pub fn apply_safety(
    decision: &Decision,
    state: &CaseGraphState,
    config: &EngineConfig,
) -> (Decision, Vec<String>) {
    let mut adjusted = decision.clone();
    let mut flags = Vec::new();

    // Hard: a portal on record blocks every outbound send
    if state.portal_url().is_some() && adjusted.action_type.is_send() {
        flags.push("portal_blocks_send".to_string());
        adjusted.can_auto_execute = false;
        adjusted.requires_human = true;
        adjusted.pause_reason.get_or_insert(PauseReason::PendingApproval);
    }

    // Hard: an over-ceiling fee may never execute unattended
    if adjusted.can_auto_execute {
        let fee = state
            .classification
            .as_ref()
            .and_then(|c| c.extracted_fee_amount)
            .or_else(|| state.case.as_ref().and_then(|c| c.fee_amount));
        if let Some(amount) = fee {
            if amount > config.fee_auto_approve_max
                && matches!(
                    adjusted.action_type,
                    ActionType::AcceptFee | ActionType::NegotiateFee | ActionType::DeclineFee
                )
            {
                flags.push("fee_above_auto_ceiling".to_string());
                adjusted.can_auto_execute = false;
                adjusted.requires_human = true;
                adjusted.pause_reason.get_or_insert(PauseReason::FeeQuote);
            }
        }
    }

    // Hard: sensitive draft content
    if let Some(draft) = &state.draft {
        let content = format!("{} {}", draft.subject, draft.body).to_lowercase();
        if SENSITIVE_KEYWORDS.iter().any(|kw| content.contains(kw)) {
            flags.push("sensitive_content".to_string());
            adjusted.can_auto_execute = false;
            adjusted.requires_human = true;
            adjusted.pause_reason = Some(PauseReason::Sensitive);
        }
    }

    // Soft: low classifier confidence
    if let Some(classification) = &state.classification {
        if classification.classification_confidence < LOW_CONFIDENCE_FLOOR {
            flags.push("low_confidence".to_string());
        }
        if classification.denial_strength.as_deref() == Some("strong") {
            flags.push("strong_denial".to_string());
        }
    }

    (adjusted, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{classification, Draft, SCHEMA_VERSION};
    use crate::graphs::state::CaseSnapshot;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn fee(amount: f64) -> Classification {
        let mut c = classification("fee_request");
        c.extracted_fee_amount = Some(amount);
        c
    }

    #[test]
    fn test_low_fee_auto_mode_executes_unattended() {
        let decision = decide(&fee(50.0), AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::AcceptFee);
        assert!(decision.can_auto_execute);
        assert!(!decision.requires_human);
    }

    #[test]
    fn test_low_fee_supervised_mode_gated() {
        let decision = decide(&fee(50.0), AutopilotMode::Supervised, &config());
        assert_eq!(decision.action_type, ActionType::AcceptFee);
        assert!(!decision.can_auto_execute);
        assert_eq!(decision.pause_reason, Some(PauseReason::FeeQuote));
    }

    #[test]
    fn test_mid_fee_gated_accept() {
        let decision = decide(&fee(250.0), AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::AcceptFee);
        assert!(!decision.can_auto_execute);
        assert_eq!(decision.pause_reason, Some(PauseReason::FeeQuote));
    }

    #[test]
    fn test_high_fee_negotiated() {
        let decision = decide(&fee(900.0), AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::NegotiateFee);
        assert!(!decision.can_auto_execute);
    }

    #[test]
    fn test_boundary_fees() {
        // Exactly at the auto ceiling: still auto
        let at_ceiling = decide(&fee(100.0), AutopilotMode::Auto, &config());
        assert!(at_ceiling.can_auto_execute);

        // Exactly at the negotiation threshold: accept, gated
        let at_threshold = decide(&fee(500.0), AutopilotMode::Auto, &config());
        assert_eq!(at_threshold.action_type, ActionType::AcceptFee);
        assert!(!at_threshold.can_auto_execute);
    }

    #[test]
    fn test_portal_beats_fee() {
        let mut c = fee(50.0);
        c.portal_url = Some("https://portal.example.com/X".to_string());

        let decision = decide(&c, AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::SubmitPortal);
        assert!(decision.can_auto_execute);
    }

    #[test]
    fn test_no_response_means_no_action() {
        let mut c = classification("acknowledgement");
        c.requires_response = false;
        c.reason_no_response = Some("auto-ack only".to_string());

        let decision = decide(&c, AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::None);
        assert!(!decision.requires_human);
    }

    #[test]
    fn test_weak_denial_auto_rebuttal() {
        let mut c = classification("denial");
        c.denial_strength = Some("weak".to_string());

        let decision = decide(&c, AutopilotMode::Auto, &config());
        assert_eq!(decision.action_type, ActionType::SendRebuttal);
        assert!(decision.can_auto_execute);

        let gated = decide(&c, AutopilotMode::Supervised, &config());
        assert!(!gated.can_auto_execute);
        assert_eq!(gated.pause_reason, Some(PauseReason::Denial));
    }

    #[test]
    fn test_strong_denial_always_gated() {
        let mut c = classification("denial");
        c.denial_strength = Some("strong".to_string());

        let decision = decide(&c, AutopilotMode::Auto, &config());
        assert!(!decision.can_auto_execute);
        assert_eq!(decision.pause_reason, Some(PauseReason::Denial));
    }

    #[test]
    fn test_manual_mode_never_auto() {
        let decision = decide(&fee(10.0), AutopilotMode::Manual, &config());
        assert!(!decision.can_auto_execute);
        assert!(decision.requires_human);
    }

    #[test]
    fn test_initial_decision_modes() {
        let auto = initial_decision("initial_request", AutopilotMode::Auto);
        assert_eq!(auto.action_type, ActionType::SendInitialRequest);
        assert!(auto.can_auto_execute);

        let supervised = initial_decision("initial_request", AutopilotMode::Supervised);
        assert!(!supervised.can_auto_execute);

        let followup = initial_decision("scheduled_followup", AutopilotMode::Auto);
        assert_eq!(followup.action_type, ActionType::SendFollowup);
    }

    #[test]
    fn test_safety_portal_blocks_send() {
        let decision = auto(ActionType::SendRebuttal, vec![]);
        let state = CaseGraphState {
            case: Some(CaseSnapshot {
                agency_name: "Agency".into(),
                agency_email: None,
                status: "awaiting_agency".into(),
                autopilot_mode: "auto".into(),
                request_text: "req".into(),
                constraints: vec![],
                portal_url: Some("https://portal.example.com/X".into()),
                fee_amount: None,
            }),
            ..Default::default()
        };

        let (adjusted, flags) = apply_safety(&decision, &state, &config());
        assert!(!adjusted.can_auto_execute);
        assert!(adjusted.requires_human);
        assert!(flags.contains(&"portal_blocks_send".to_string()));
    }

    #[test]
    fn test_safety_sensitive_keywords_force_human() {
        let decision = auto(ActionType::SendRebuttal, vec![]);
        let state = CaseGraphState {
            draft: Some(Draft {
                schema_version: SCHEMA_VERSION.to_string(),
                subject: "RE: request".into(),
                body: "our attorney will follow up".into(),
                reasoning: vec![],
            }),
            ..Default::default()
        };

        let (adjusted, flags) = apply_safety(&decision, &state, &config());
        assert!(adjusted.requires_human);
        assert_eq!(adjusted.pause_reason, Some(PauseReason::Sensitive));
        assert!(flags.contains(&"sensitive_content".to_string()));
    }

    #[test]
    fn test_safety_soft_flags_do_not_gate() {
        let decision = auto(ActionType::AcceptFee, vec![]);
        let mut c = fee(50.0);
        c.classification_confidence = 0.3;
        let state = CaseGraphState {
            classification: Some(c),
            ..Default::default()
        };

        let (adjusted, flags) = apply_safety(&decision, &state, &config());
        assert!(adjusted.can_auto_execute);
        assert!(flags.contains(&"low_confidence".to_string()));
    }

    #[test]
    fn test_safety_fee_ceiling_overrides_auto() {
        // A decision that wrongly claims auto for a large fee is corrected
        let decision = auto(ActionType::AcceptFee, vec![]);
        let state = CaseGraphState {
            classification: Some(fee(900.0)),
            ..Default::default()
        };

        let (adjusted, flags) = apply_safety(&decision, &state, &config());
        assert!(!adjusted.can_auto_execute);
        assert_eq!(adjusted.pause_reason, Some(PauseReason::FeeQuote));
        assert!(flags.contains(&"fee_above_auto_ceiling".to_string()));
    }
}
