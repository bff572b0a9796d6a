// Deposit Orchestrator (spec.md §4.D). Drives a single deposit through
// the status DAG in §3 from on-chain webhook detection through off-ramp
// to brokerage funding.

use chrono::{Duration, Utc};
use money_adapters::brokerage::BrokerageAdapter;
use money_allocation::AllocationEngine;
use money_common::model::*;
use money_common::{Clock, Currency, DepositId, Error, Money, UserId};
use money_ledger::LedgerPort;
use money_store::Storage;
use std::sync::Arc;

pub struct DepositOrchestrator {
    store: Arc<dyn Storage>,
    allocation: Arc<AllocationEngine>,
    ledger: Arc<dyn LedgerPort>,
    brokerage: Arc<BrokerageAdapter>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
}

impl DepositOrchestrator {
    pub fn new(
        store: Arc<dyn Storage>,
        allocation: Arc<AllocationEngine>,
        ledger: Arc<dyn LedgerPort>,
        brokerage: Arc<BrokerageAdapter>,
        clock: Arc<dyn Clock>,
        expiry: Duration,
    ) -> Self {
        Self { store, allocation, ledger, brokerage, clock, expiry }
    }

    /// §4.D "chain webhook received": validate signature happens at the
    /// HTTP layer (§6) before this is called. Dedupes on `tx_hash` — a
    /// duplicate webhook for an already-seen hash is a no-op success, not
    /// an error, per §8 scenario 3.
    pub async fn record_chain_deposit(
        &self,
        user_id: UserId,
        chain: String,
        tx_hash: String,
        token: String,
        amount: Money,
    ) -> Result<(Deposit, bool), Error> {
        if let Some(existing) = self.store.find_by_tx_hash(&tx_hash).await? {
            return Ok((existing, true));
        }

        let deposit = Deposit {
            id: DepositId::new(),
            user_id,
            chain,
            tx_hash,
            token,
            amount,
            status: DepositStatus::Pending,
            virtual_account_id: None,
            off_ramp_tx_id: None,
            broker_funding_tx_id: None,
            error_message: None,
            created_at: self.clock.now(),
            confirmed_at: None,
            off_ramp_initiated_at: None,
            off_ramp_completed_at: None,
            broker_funded_at: None,
        };

        let tx_hash = deposit.tx_hash.clone();
        match self.store.create_deposit(deposit).await {
            Ok(created) => Ok((created, false)),
            Err(Error::Conflict { .. }) => {
                // Lost the create race to a concurrent delivery of the same
                // webhook; treat it the same as the dedupe hit above.
                let existing = self
                    .store
                    .find_by_tx_hash(&tx_hash)
                    .await?
                    .ok_or_else(|| Error::internal("deposit create conflicted but no row found"))?;
                Ok((existing, true))
            }
            Err(e) => Err(e),
        }
    }

    /// §4.D "confirmations reached": pending -> confirmed, then notifies
    /// Allocation with the confirmed USDC amount so it lands in the user's
    /// spending/stash split while the off-ramp/brokerage-funding leg runs
    /// independently to convert it to `fiat_exposure`. Bridge-sourced
    /// credits instead flow through `process_bridge_deposit` below — every
    /// deposit this orchestrator drives directly is non-bridge by
    /// construction, so the notify is unconditional here. Idempotent on
    /// `deposit:{id}:confirmed`: a re-delivered "confirmations reached"
    /// event for an already-confirmed deposit fails the transition first
    /// and never double-allocates.
    pub async fn mark_confirmed(&self, id: DepositId) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        let confirmed = self
            .transition(deposit, DepositStatus::Confirmed, |d| {
                d.confirmed_at = Some(self.clock.now());
            })
            .await?;

        self.allocation
            .process_incoming_funds(
                confirmed.user_id,
                confirmed.amount,
                Currency::Usdc,
                AllocationEventType::CryptoDeposit,
                Some(confirmed.tx_hash.clone()),
                format!("deposit:{id}:confirmed"),
            )
            .await?;

        Ok(confirmed)
    }

    pub async fn mark_off_ramp_initiated(&self, id: DepositId, off_ramp_tx_id: String) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        self.transition(deposit, DepositStatus::OffRampInitiated, |d| {
            d.off_ramp_tx_id = Some(off_ramp_tx_id);
            d.off_ramp_initiated_at = Some(self.clock.now());
        })
        .await
    }

    pub async fn mark_off_ramp_completed(&self, id: DepositId) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        self.transition(deposit, DepositStatus::OffRampCompleted, |d| {
            d.off_ramp_completed_at = Some(self.clock.now());
        })
        .await
    }

    /// §4.D "off_ramp_completed -> brokerage funding call succeeded": issues
    /// the firm-to-customer journal against the brokerage (no persisted
    /// user-to-brokerage-account directory exists in this workspace —
    /// onboarding is out of scope per DESIGN.md — so the deposit's user_id
    /// doubles as the external account key, the same pattern
    /// `WalletProvisioningJob` already uses for the custodian) and, on
    /// success, records the journal id and advances the deposit to
    /// `broker_funded`. Keyed on `deposit:{id}:broker_funded` so a retried
    /// call after a crash between the journal call and the status update
    /// reuses the same journal rather than double-funding.
    pub async fn complete_brokerage_funding(&self, id: DepositId) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        if deposit.status == DepositStatus::BrokerFunded {
            return Ok(deposit);
        }

        let idempotency_key = format!("deposit:{id}:broker_funded");
        let journal = self
            .brokerage
            .journal(&deposit.user_id.to_string(), deposit.amount, &idempotency_key)
            .await
            .map_err(Error::from)?;

        self.mark_broker_funded(id, journal.journal_id).await
    }

    /// §4.D "brokerage funding call succeeded": credits the user's
    /// `fiat_exposure` ledger account and marks the deposit `broker_funded`
    /// (terminal).
    pub async fn mark_broker_funded(&self, id: DepositId, broker_funding_tx_id: String) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        if deposit.status != DepositStatus::OffRampCompleted {
            return Err(Error::conflict(format!(
                "deposit {id} expected status off_ramp_completed but was {}",
                deposit.status
            )));
        }

        let broker_account = self
            .ledger
            .get_or_create_account(Some(deposit.user_id), AccountType::FiatExposure, Currency::Usd)
            .await?;
        let operational = self
            .ledger
            .get_or_create_account(None, AccountType::BrokerOperational, Currency::Usd)
            .await?;

        self.ledger
            .post_transaction(PostTransactionRequest {
                user_id: Some(deposit.user_id),
                transaction_type: TransactionType::Deposit,
                idempotency_key: format!("deposit:{id}:broker_funded"),
                reference_id: Some(id.to_string()),
                reference_type: Some("deposit".to_string()),
                metadata: serde_json::json!({ "broker_funding_tx_id": broker_funding_tx_id }),
                entries: vec![
                    EntryRequest { account_id: operational.id, entry_type: EntryType::Debit, amount: deposit.amount, currency: Currency::Usd },
                    EntryRequest { account_id: broker_account.id, entry_type: EntryType::Credit, amount: deposit.amount, currency: Currency::Usd },
                ],
            })
            .await?;

        let mut updated = deposit.clone();
        updated.status = DepositStatus::BrokerFunded;
        updated.broker_funding_tx_id = Some(broker_funding_tx_id);
        updated.broker_funded_at = Some(self.clock.now());
        self.store.update_deposit(deposit.id, deposit.status, updated).await
    }

    /// §4.B completion hook, homed here per SPEC_FULL's supplement since
    /// spec.md names it in the Bridge module but gives it no owning crate.
    /// Idempotent on `bridge_id`: replays are a no-op once the allocation
    /// event for this key already exists.
    pub async fn process_bridge_deposit(
        &self,
        user_id: UserId,
        amount: Money,
        dest_tx_hash: String,
        bridge_id: String,
    ) -> Result<AllocationEvent, Error> {
        let idempotency_key = format!("bridge:{bridge_id}:completed");
        self.allocation
            .process_incoming_funds(
                user_id,
                amount,
                Currency::Usdc,
                AllocationEventType::CryptoDeposit,
                Some(dest_tx_hash),
                idempotency_key,
            )
            .await
    }

    /// §4.D "past deadline (24h default)": pending -> expired. Driven by
    /// the Deposit poll job (SPEC_FULL worker supplement), not a webhook.
    pub async fn expire_stale_pending(&self) -> Result<Vec<Deposit>, Error> {
        let cutoff = self.clock.now() - self.expiry;
        let stale = self.store.list_pending_older_than(cutoff).await?;
        let mut expired = Vec::with_capacity(stale.len());
        for deposit in stale {
            let id = deposit.id;
            let status = deposit.status;
            let mut updated = deposit;
            updated.status = DepositStatus::Expired;
            match self.store.update_deposit(id, status, updated).await {
                Ok(d) => expired.push(d),
                Err(Error::Conflict { .. }) => {
                    // Already moved on (e.g. confirmed concurrently); skip.
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    pub async fn mark_failed(&self, id: DepositId, error_message: String) -> Result<Deposit, Error> {
        let deposit = self.get_required(id).await?;
        if deposit.status.is_terminal() {
            return Err(Error::conflict(format!("deposit {id} is already in terminal state {}", deposit.status)));
        }
        let status = deposit.status;
        let mut updated = deposit;
        updated.status = DepositStatus::Failed;
        updated.error_message = Some(error_message);
        self.store.update_deposit(id, status, updated).await
    }

    pub async fn get(&self, id: DepositId) -> Result<Deposit, Error> {
        self.get_required(id).await
    }

    async fn get_required(&self, id: DepositId) -> Result<Deposit, Error> {
        self.store.get_deposit(id).await?.ok_or_else(|| Error::not_found(format!("deposit {id} not found")))
    }

    /// Encodes a single legal-edge move. Rejects with `Error::Conflict` if
    /// `to` is not reachable from the deposit's current status — "any
    /// other attempt is rejected" (§3), never silently coerced.
    async fn transition(
        &self,
        mut deposit: Deposit,
        to: DepositStatus,
        mutate: impl FnOnce(&mut Deposit),
    ) -> Result<Deposit, Error> {
        if !deposit.status.can_transition_to(to) {
            return Err(Error::conflict(format!("illegal deposit transition {} -> {to}", deposit.status)));
        }
        let from = deposit.status;
        mutate(&mut deposit);
        deposit.status = to;
        self.store.update_deposit(deposit.id, from, deposit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_allocation::AllocationEngine;
    use money_common::FixedClock;
    use money_ledger::LedgerEngine;
    use money_store::memory::MemoryStorage;
    use std::str::FromStr;

    fn orchestrator() -> (DepositOrchestrator, Arc<FixedClock>, Arc<dyn Storage>) {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ledger: Arc<dyn LedgerPort> = Arc::new(LedgerEngine::new(store.clone()));
        let fixed = Arc::new(FixedClock::new(Utc::now()));
        let clock: Arc<dyn Clock> = fixed.clone();
        let allocation = Arc::new(AllocationEngine::new(store.clone(), ledger.clone(), clock.clone()));
        let brokerage = Arc::new(BrokerageAdapter::new("http://localhost:9", "key".to_string(), Default::default()));
        (
            DepositOrchestrator::new(store.clone(), allocation, ledger, brokerage, clock, Duration::hours(24)),
            fixed,
            store,
        )
    }

    #[tokio::test]
    async fn duplicate_webhook_is_idempotent() {
        let (orch, _clock, _store) = orchestrator();
        let user = UserId::new();
        let amount = Money::from_str("100.00").unwrap();

        let (first, was_dup_1) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xabc".into(), "USDC".into(), amount)
            .await
            .unwrap();
        assert!(!was_dup_1);

        let (second, was_dup_2) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xabc".into(), "USDC".into(), amount)
            .await
            .unwrap();
        assert!(was_dup_2);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let (orch, _clock, _store) = orchestrator();
        let user = UserId::new();
        let amount = Money::from_str("10.00").unwrap();
        let (deposit, _) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xdef".into(), "USDC".into(), amount)
            .await
            .unwrap();

        let err = orch.mark_off_ramp_completed(deposit.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn legal_path_to_broker_funded_credits_fiat_exposure() {
        let (orch, _clock, store) = orchestrator();
        let user = UserId::new();
        let amount = Money::from_str("500.00").unwrap();
        let (deposit, _) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xaaa".into(), "USDC".into(), amount)
            .await
            .unwrap();

        orch.mark_confirmed(deposit.id).await.unwrap();
        orch.mark_off_ramp_initiated(deposit.id, "offramp-1".into()).await.unwrap();
        orch.mark_off_ramp_completed(deposit.id).await.unwrap();
        let funded = orch.mark_broker_funded(deposit.id, "broker-1".into()).await.unwrap();

        assert_eq!(funded.status, DepositStatus::BrokerFunded);
        let balances = store.get_user_balances(user, Currency::Usd).await.unwrap();
        assert_eq!(balances.fiat_exposure, amount);
    }

    #[tokio::test]
    async fn confirmation_credits_spending_and_stash_via_allocation() {
        let (orch, _clock, store) = orchestrator();
        let user = UserId::new();
        let amount = Money::from_str("100.00").unwrap();
        let (deposit, _) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xccc".into(), "USDC".into(), amount)
            .await
            .unwrap();

        let confirmed = orch.mark_confirmed(deposit.id).await.unwrap();
        assert_eq!(confirmed.status, DepositStatus::Confirmed);

        let balances = store.get_user_balances(user, Currency::Usdc).await.unwrap();
        assert_eq!(balances.spending_balance, amount);
        assert_eq!(balances.stash_balance, Money::ZERO);
    }

    #[tokio::test]
    async fn stale_pending_deposits_expire() {
        let (orch, clock, _store) = orchestrator();
        let user = UserId::new();
        let amount = Money::from_str("1.00").unwrap();
        let (deposit, _) = orch
            .record_chain_deposit(user, "ethereum".into(), "0xexp".into(), "USDC".into(), amount)
            .await
            .unwrap();

        clock.advance(Duration::hours(25));

        let expired = orch.expire_stale_pending().await.unwrap();
        assert!(expired.iter().any(|d| d.id == deposit.id));
    }
}
