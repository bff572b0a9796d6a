use crate::{BridgeId, Money, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BridgeStatus {
    Pending,
    Burning,
    Attesting,
    Minting,
    Completed,
    Failed,
}

impl BridgeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeStatus::Completed | BridgeStatus::Failed)
    }

    pub fn can_transition_to(self, to: BridgeStatus) -> bool {
        use BridgeStatus::*;
        matches!(
            (self, to),
            (Pending, Burning)
                | (Pending, Failed)
                | (Burning, Attesting)
                | (Burning, Failed)
                | (Attesting, Minting)
                | (Attesting, Failed)
                | (Minting, Completed)
                | (Minting, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct BridgeTransaction {
    pub id: BridgeId,
    pub user_id: UserId,
    pub source_chain: String,
    pub dest_chain: String,
    pub amount: Money,
    pub dest_address: String,
    pub status: BridgeStatus,
    pub source_tx_hash: Option<String>,
    pub message_hash: Option<String>,
    pub attestation: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::BridgeStatus::*;

    #[test]
    fn full_cycle_is_legal() {
        assert!(Pending.can_transition_to(Burning));
        assert!(Burning.can_transition_to(Attesting));
        assert!(Attesting.can_transition_to(Minting));
        assert!(Minting.can_transition_to(Completed));
    }

    #[test]
    fn cannot_jump_from_pending_to_minting() {
        assert!(!Pending.can_transition_to(Minting));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states_are_closed() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Completed.can_transition_to(Failed));
    }
}
