// Withdrawal entity. Named in §3's persistent-state table and in §4.R's
// "Withdrawal consistency: symmetric [to deposit]" check, but — unlike
// Deposit and Bridge — never given its own status DAG or owning module in
// spec.md. Modeled here as the minimal two-hop lifecycle sufficient to
// reconcile against: a withdrawal is requested, then the bank rail reports
// it settled or failed. The full off-ramp-out orchestration (equivalent to
// Deposit Orchestrator but in reverse) is out of scope for this workspace;
// see DESIGN.md.

use crate::{Money, UserId, WithdrawalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }

    pub fn can_transition_to(self, to: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!((self, to), (Pending, Completed) | (Pending, Failed))
    }
}

#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Money,
    pub bank_rail_payment_intent_id: Option<String>,
    pub status: WithdrawalStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::WithdrawalStatus::*;

    #[test]
    fn legal_transitions() {
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
    }
}
