// Allocation Engine (spec.md §4.A). Splits inbound user credits into
// spending/stash sub-balances under a per-user ratio, and gates outbound
// spending on the spending sub-balance while a mode is active.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use money_common::model::*;
use money_common::{AccountType, AllocationEventId, Clock, Currency, Error, Money, UserId};
use money_ledger::LedgerPort;
use money_store::Storage;
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct AllocationEngine {
    store: Arc<dyn Storage>,
    ledger: Arc<dyn LedgerPort>,
    clock: Arc<dyn Clock>,
}

/// Maps an inbound-funds event type to the system account it is funded
/// from. Crypto-flavored events settle out of the custodian buffer;
/// fiat-flavored ones (cashback, roundups, internal transfers) settle out
/// of the brokerage operational account. Not named explicitly in spec.md
/// — §4.A only says "from the system `broker_operational` or
/// `system_buffer_usdc` source appropriate to event_type" — this mapping
/// is the concrete policy.
fn funding_source(event_type: AllocationEventType) -> AccountType {
    match event_type {
        AllocationEventType::Deposit | AllocationEventType::CryptoDeposit => AccountType::SystemBufferUsdc,
        AllocationEventType::FiatDeposit
        | AllocationEventType::Cashback
        | AllocationEventType::Roundup
        | AllocationEventType::Transfer => AccountType::BrokerOperational,
    }
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn Storage>, ledger: Arc<dyn LedgerPort>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ledger, clock }
    }

    /// §4.A ProcessIncomingFunds. `idempotency_key` is supplied by the
    /// caller (Deposit/Bridge orchestrator) using its own deterministic
    /// convention (SPEC_FULL "idempotent outbox pattern") — the allocation
    /// engine does not invent one, since it has no natural dedupe key of
    /// its own.
    pub async fn process_incoming_funds(
        &self,
        user_id: UserId,
        amount: Money,
        currency: Currency,
        event_type: AllocationEventType,
        source_tx_id: Option<String>,
        idempotency_key: String,
    ) -> Result<AllocationEvent, Error> {
        if amount.is_zero() || amount.is_negative() {
            return Err(Error::validation("incoming funds amount must be positive"));
        }

        let mode = self.store.get_mode(user_id).await?;
        let (stash_amount, spending_amount) = match &mode {
            Some(m) if m.active => {
                let stash = amount.mul_ratio_rounded(m.ratio_stash, currency);
                let spending = amount - stash;
                (stash, spending)
            }
            _ => (Money::ZERO, amount),
        };

        let source_account = self
            .ledger
            .get_or_create_account(None, funding_source(event_type), currency)
            .await?;
        let spending_account = self
            .ledger
            .get_or_create_account(Some(user_id), AccountType::SpendingBalance, currency)
            .await?;

        let mut entries = vec![
            EntryRequest { account_id: source_account.id, entry_type: EntryType::Debit, amount, currency },
        ];
        if spending_amount.is_positive() {
            entries.push(EntryRequest {
                account_id: spending_account.id,
                entry_type: EntryType::Credit,
                amount: spending_amount,
                currency,
            });
        }
        if stash_amount.is_positive() {
            let stash_account = self
                .ledger
                .get_or_create_account(Some(user_id), AccountType::StashBalance, currency)
                .await?;
            entries.push(EntryRequest {
                account_id: stash_account.id,
                entry_type: EntryType::Credit,
                amount: stash_amount,
                currency,
            });
        }

        self.ledger
            .post_transaction(PostTransactionRequest {
                user_id: Some(user_id),
                transaction_type: TransactionType::Deposit,
                idempotency_key,
                reference_id: source_tx_id.clone(),
                reference_type: Some("allocation".to_string()),
                metadata: serde_json::json!({ "event_type": event_type.to_string() }),
                entries,
            })
            .await?;

        let event = AllocationEvent {
            id: AllocationEventId::new(),
            user_id,
            total_amount: amount,
            stash_amount,
            spending_amount,
            event_type,
            source_tx_id,
            created_at: self.clock.now(),
        };
        let event = self.store.insert_event(event).await?;
        log::info!(
            "allocation event for user {user_id}: total={} stash={} spending={}",
            event.total_amount,
            event.stash_amount,
            event.spending_amount
        );
        Ok(event)
    }

    /// §4.A CanSpend. Outbound flows MUST call this before debiting a user
    /// account while a mode is active and unpaused.
    pub async fn can_spend(&self, user_id: UserId, amount: Money, currency: Currency) -> Result<bool, Error> {
        let mode = self.store.get_mode(user_id).await?;
        let gated = matches!(&mode, Some(m) if m.active && m.paused_at.is_none());
        if !gated {
            return Ok(true);
        }
        let balances = self.ledger_user_balances(user_id, currency).await?;
        let allowed = balances.spending_balance >= amount;
        if !allowed {
            self.store.record_decline(user_id, self.clock.now()).await?;
            log::info!("declined spend of {amount} for user {user_id}: spending_balance={}", balances.spending_balance);
        }
        Ok(allowed)
    }

    async fn ledger_user_balances(&self, user_id: UserId, currency: Currency) -> Result<UserBalances, Error> {
        // AllocationEngine only needs GetUserBalances, which LedgerPort does
        // not expose (it only exposes the write side). Routed through the
        // store directly — the same data LedgerEngine's read path serves.
        self.store.get_user_balances(user_id, currency).await
    }

    pub async fn enable_mode(&self, user_id: UserId, ratio_spending: Decimal, ratio_stash: Decimal) -> Result<SmartAllocationMode, Error> {
        let tolerance = Decimal::new(1, 4);
        if ratio_spending < Decimal::ZERO || ratio_stash < Decimal::ZERO {
            return Err(Error::validation("allocation ratios must be non-negative"));
        }
        if (ratio_spending + ratio_stash - Decimal::ONE).abs() > tolerance {
            return Err(Error::validation("allocation ratios must sum to 1 within 1e-4"));
        }
        let mode = SmartAllocationMode {
            user_id,
            active: true,
            ratio_spending,
            ratio_stash,
            paused_at: None,
            resumed_at: None,
        };
        self.store.upsert_mode(mode).await
    }

    pub async fn pause_mode(&self, user_id: UserId) -> Result<SmartAllocationMode, Error> {
        let mut mode = self
            .store
            .get_mode(user_id)
            .await?
            .ok_or_else(|| Error::not_found("no allocation mode for user"))?;
        if mode.paused_at.is_none() {
            mode.paused_at = Some(self.clock.now());
        }
        self.store.upsert_mode(mode).await
    }

    pub async fn resume_mode(&self, user_id: UserId) -> Result<SmartAllocationMode, Error> {
        let mut mode = self
            .store
            .get_mode(user_id)
            .await?
            .ok_or_else(|| Error::not_found("no allocation mode for user"))?;
        if mode.paused_at.is_some() {
            mode.paused_at = None;
            mode.resumed_at = Some(self.clock.now());
        }
        self.store.upsert_mode(mode).await
    }

    /// §4.A RollupWeekly. `week_start` is the Monday that opens the
    /// [week_start, week_end) interval being summarized.
    pub async fn rollup_weekly(&self, user_id: UserId, week_start: NaiveDate) -> Result<WeeklyAllocationSummary, Error> {
        let week_end = week_start + Duration::days(7);
        let from: DateTime<Utc> = week_start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let to: DateTime<Utc> = week_end.and_hms_opt(0, 0, 0).unwrap().and_utc();

        let events = self.store.list_events_in_range(user_id, from, to).await?;
        let declines = self.store.count_declines_in_range(user_id, from, to).await?;

        let mut total_income = Money::ZERO;
        let mut stash_added = Money::ZERO;
        let mut spending_added = Money::ZERO;
        for event in &events {
            total_income = total_income + event.total_amount;
            stash_added = stash_added + event.stash_amount;
            spending_added = spending_added + event.spending_amount;
        }

        let mode_active_days = match self.store.get_mode(user_id).await? {
            Some(m) if m.active && m.paused_at.is_none() => 7,
            Some(m) if m.active => {
                // Paused mid-week: count days before the pause as active,
                // capped to the interval.
                match m.paused_at {
                    Some(paused_at) if paused_at >= from && paused_at < to => {
                        (paused_at.date_naive() - week_start).num_days().clamp(0, 7) as u8
                    }
                    _ => 0,
                }
            }
            _ => 0,
        };

        let summary = WeeklyAllocationSummary {
            user_id,
            week_start,
            week_end,
            total_income,
            stash_added,
            spending_added,
            spending_used: Money::ZERO,
            declines_count: declines,
            mode_active_days,
        };
        self.store.upsert_weekly_summary(summary).await
    }
}

/// Capability-record port so outbound flows (withdrawal, investment, card
/// payment services) can depend on "something that gates spending" without
/// linking the full engine.
#[async_trait]
pub trait SpendGate: Send + Sync {
    async fn can_spend(&self, user_id: UserId, amount: Money, currency: Currency) -> Result<bool, Error>;
}

#[async_trait]
impl SpendGate for AllocationEngine {
    async fn can_spend(&self, user_id: UserId, amount: Money, currency: Currency) -> Result<bool, Error> {
        AllocationEngine::can_spend(self, user_id, amount, currency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_common::{FixedClock, Money};
    use money_ledger::LedgerEngine;
    use money_store::memory::MemoryStorage;
    use std::str::FromStr;

    fn money(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn engine() -> (AllocationEngine, Arc<dyn Storage>) {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ledger: Arc<dyn LedgerPort> = Arc::new(LedgerEngine::new(store.clone()));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        (AllocationEngine::new(store.clone(), ledger, clock), store)
    }

    #[tokio::test]
    async fn happy_path_allocation_deposit() {
        let (engine, _store) = engine();
        let user = UserId::new();
        engine
            .enable_mode(user, Decimal::from_str("0.70").unwrap(), Decimal::from_str("0.30").unwrap())
            .await
            .unwrap();

        let event = engine
            .process_incoming_funds(user, money("100.00"), Currency::Usd, AllocationEventType::Deposit, None, "evt-1".into())
            .await
            .unwrap();

        assert_eq!(event.spending_amount, money("70.00"));
        assert_eq!(event.stash_amount, money("30.00"));
    }

    #[tokio::test]
    async fn dust_is_preserved_under_half_even_rounding() {
        let (engine, _store) = engine();
        let user = UserId::new();
        engine
            .enable_mode(user, Decimal::from_str("0.70").unwrap(), Decimal::from_str("0.30").unwrap())
            .await
            .unwrap();

        let event = engine
            .process_incoming_funds(user, money("0.01"), Currency::Usd, AllocationEventType::Deposit, None, "evt-2".into())
            .await
            .unwrap();

        assert_eq!(event.stash_amount, money("0.00"));
        assert_eq!(event.spending_amount, money("0.01"));
        assert_eq!(event.stash_amount + event.spending_amount, event.total_amount);
    }

    #[tokio::test]
    async fn inactive_mode_routes_everything_to_spending() {
        let (engine, _store) = engine();
        let user = UserId::new();

        let event = engine
            .process_incoming_funds(user, money("50.00"), Currency::Usd, AllocationEventType::Deposit, None, "evt-3".into())
            .await
            .unwrap();

        assert_eq!(event.stash_amount, money("0"));
        assert_eq!(event.spending_amount, money("50.00"));
    }

    #[tokio::test]
    async fn can_spend_gates_on_spending_balance_when_active() {
        let (engine, _store) = engine();
        let user = UserId::new();
        engine
            .enable_mode(user, Decimal::from_str("0.70").unwrap(), Decimal::from_str("0.30").unwrap())
            .await
            .unwrap();
        engine
            .process_incoming_funds(user, money("100.00"), Currency::Usd, AllocationEventType::Deposit, None, "evt-4".into())
            .await
            .unwrap();

        assert!(engine.can_spend(user, money("50.00"), Currency::Usd).await.unwrap());
        assert!(!engine.can_spend(user, money("1000.00"), Currency::Usd).await.unwrap());
    }

    #[tokio::test]
    async fn paused_mode_allows_full_spend() {
        let (engine, _store) = engine();
        let user = UserId::new();
        engine
            .enable_mode(user, Decimal::from_str("0.70").unwrap(), Decimal::from_str("0.30").unwrap())
            .await
            .unwrap();
        engine.pause_mode(user).await.unwrap();

        assert!(engine.can_spend(user, money("10000.00"), Currency::Usd).await.unwrap());
    }
}
