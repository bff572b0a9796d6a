use crate::{AllocationEventId, Money, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct SmartAllocationMode {
    pub user_id: UserId,
    pub active: bool,
    pub ratio_spending: Decimal,
    pub ratio_stash: Decimal,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl SmartAllocationMode {
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            user_id,
            active: true,
            ratio_spending: "0.70".parse().unwrap(),
            ratio_stash: "0.30".parse().unwrap(),
            paused_at: None,
            resumed_at: None,
        }
    }

    /// Ratios must be non-negative and sum to 1 within 1e-4 (§3 invariant).
    pub fn ratios_are_valid(&self) -> bool {
        let tolerance = Decimal::new(1, 4);
        self.ratio_spending >= Decimal::ZERO
            && self.ratio_stash >= Decimal::ZERO
            && (self.ratio_spending + self.ratio_stash - Decimal::ONE).abs() <= tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AllocationEventType {
    Deposit,
    FiatDeposit,
    CryptoDeposit,
    Cashback,
    Roundup,
    Transfer,
}

#[derive(Debug, Clone)]
pub struct AllocationEvent {
    pub id: AllocationEventId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub stash_amount: Money,
    pub spending_amount: Money,
    pub event_type: AllocationEventType,
    pub source_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WeeklyAllocationSummary {
    pub user_id: UserId,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_income: Money,
    pub stash_added: Money,
    pub spending_added: Money,
    pub spending_used: Money,
    pub declines_count: u32,
    pub mode_active_days: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ratio_is_70_30() {
        let mode = SmartAllocationMode::default_for(UserId::new());
        assert!(mode.ratios_are_valid());
        assert_eq!(mode.ratio_spending.to_string(), "0.70");
        assert_eq!(mode.ratio_stash.to_string(), "0.30");
    }

    #[test]
    fn ratios_outside_tolerance_are_invalid() {
        let mut mode = SmartAllocationMode::default_for(UserId::new());
        mode.ratio_stash = "0.5".parse().unwrap();
        assert!(!mode.ratios_are_valid());
    }
}
