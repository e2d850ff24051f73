//! Deterministic key composition
//!
//! Every identity the engine relies on for idempotency is composed here, in
//! one place, so all enqueue paths produce byte-identical keys and duplicate
//! work collapses even across worker restarts.

use chrono::NaiveDate;

/// Thread id for inbound-response graph invocations on a case
pub fn inbound_thread_id(case_id: &str) -> String {
    format!("case:{}", case_id)
}

/// Thread id for initial-request graph invocations on a case
pub fn initial_thread_id(case_id: &str) -> String {
    format!("initial:{}", case_id)
}

/// Proposal key: `{case_id}:{message_id|no-msg}:{action_type}:{attempt}`
pub fn proposal_key(
    case_id: &str,
    message_id: Option<&str>,
    action_type: &str,
    attempt: i64,
) -> String {
    format!(
        "{}:{}:{}:{}",
        case_id,
        message_id.unwrap_or("no-msg"),
        action_type,
        attempt
    )
}

/// Default execution key when the caller did not supply one
pub fn execution_key(action_type: &str, case_id: &str, proposal_id: &str) -> String {
    format!("email-{}-{}-proposal-{}", action_type, case_id, proposal_id)
}

/// Scheduled-followup key: `followup:{case_id}:{attempt}:{yyyy-mm-dd}`
pub fn scheduled_key(case_id: &str, attempt: i64, due: NaiveDate) -> String {
    format!("followup:{}:{}:{}", case_id, attempt, due.format("%Y-%m-%d"))
}

/// Advisory lock key for a case, hashed from `case:{case_id}`
///
/// FNV-1a over the string form, folded to i64. Stable across processes and
/// restarts - the same case always maps to the same lock.
pub fn case_lock_key(case_id: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in format!("case:{}", case_id).bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}
