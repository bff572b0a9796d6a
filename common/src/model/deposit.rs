use crate::{DepositId, Money, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    OffRampInitiated,
    OffRampCompleted,
    BrokerFunded,
    Failed,
    Expired,
}

impl DepositStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DepositStatus::BrokerFunded | DepositStatus::Failed | DepositStatus::Expired)
    }

    /// The legal-edge table from spec.md §3/§4.D, encoded as a lookup
    /// instead of scattered conditionals (§9 design note).
    pub fn can_transition_to(self, to: DepositStatus) -> bool {
        use DepositStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Confirmed, OffRampInitiated)
                | (Confirmed, Failed)
                | (OffRampInitiated, OffRampCompleted)
                | (OffRampInitiated, Failed)
                | (OffRampCompleted, BrokerFunded)
                | (OffRampCompleted, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Deposit {
    pub id: DepositId,
    pub user_id: UserId,
    pub chain: String,
    pub tx_hash: String,
    pub token: String,
    pub amount: Money,
    pub status: DepositStatus,
    pub virtual_account_id: Option<String>,
    pub off_ramp_tx_id: Option<String>,
    pub broker_funding_tx_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub off_ramp_initiated_at: Option<DateTime<Utc>>,
    pub off_ramp_completed_at: Option<DateTime<Utc>>,
    pub broker_funded_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::DepositStatus::*;

    #[test]
    fn legal_path_to_broker_funded() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(OffRampInitiated));
        assert!(OffRampInitiated.can_transition_to(OffRampCompleted));
        assert!(OffRampCompleted.can_transition_to(BrokerFunded));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [BrokerFunded, Failed, Expired] {
            for to in [Pending, Confirmed, OffRampInitiated, OffRampCompleted, BrokerFunded, Failed, Expired] {
                assert!(!terminal.can_transition_to(to), "{terminal:?} -> {to:?} should be illegal");
            }
        }
    }

    #[test]
    fn cannot_skip_steps() {
        assert!(!Pending.can_transition_to(OffRampInitiated));
        assert!(!Pending.can_transition_to(BrokerFunded));
        assert!(!Confirmed.can_transition_to(BrokerFunded));
    }
}
