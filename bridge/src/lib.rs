// Bridge Orchestrator (spec.md §4.B). Drives a cross-chain USDC burn-and-mint
// through pending -> burning -> attesting -> minting -> completed, polling
// the attestation adapter and handing off to the Deposit Orchestrator's
// `ProcessBridgeDeposit` completion hook once minted.

use chrono::Duration;
use money_adapters::attestation::{AttestationAdapter, AttestationStatus};
use money_adapters::AdapterError;
use money_common::model::*;
use money_common::{BridgeId, Clock, Error, Money, UserId};
use money_deposit::DepositOrchestrator;
use money_store::Storage;
use std::sync::Arc;

pub struct BridgeOrchestrator {
    store: Arc<dyn Storage>,
    deposit: Arc<DepositOrchestrator>,
    attestation: Arc<AttestationAdapter>,
    clock: Arc<dyn Clock>,
    attestation_ceiling: Duration,
}

impl BridgeOrchestrator {
    pub fn new(
        store: Arc<dyn Storage>,
        deposit: Arc<DepositOrchestrator>,
        attestation: Arc<AttestationAdapter>,
        clock: Arc<dyn Clock>,
        attestation_ceiling: Duration,
    ) -> Self {
        Self { store, deposit, attestation, clock, attestation_ceiling }
    }

    pub async fn initiate(
        &self,
        user_id: UserId,
        source_chain: String,
        dest_chain: String,
        amount: Money,
        dest_address: String,
    ) -> Result<BridgeTransaction, Error> {
        let now = self.clock.now();
        let bridge = BridgeTransaction {
            id: BridgeId::new(),
            user_id,
            source_chain,
            dest_chain,
            amount,
            dest_address,
            status: BridgeStatus::Pending,
            source_tx_hash: None,
            message_hash: None,
            attestation: None,
            dest_tx_hash: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_bridge(bridge).await
    }

    /// "burn-tx-submitted": pending -> burning.
    pub async fn mark_burning(&self, id: BridgeId, source_tx_hash: String) -> Result<BridgeTransaction, Error> {
        let bridge = self.get_required(id).await?;
        self.transition(bridge, BridgeStatus::Burning, |b| {
            b.source_tx_hash = Some(source_tx_hash);
        })
        .await
    }

    /// §4.B attestation polling: called per-bridge by the Bridge poll job
    /// (SPEC_FULL worker supplement) for every row in `burning`/`attesting`.
    /// A `pending` attestation result is not an error — it just leaves the
    /// bridge where it is for the next tick. Exceeding the 12h ceiling from
    /// `created_at` fails the bridge outright (SPEC_FULL resolves the Open
    /// Question this way).
    pub async fn poll_attestation(&self, id: BridgeId) -> Result<BridgeTransaction, Error> {
        let bridge = self.get_required(id).await?;
        if !matches!(bridge.status, BridgeStatus::Burning | BridgeStatus::Attesting) {
            return Ok(bridge);
        }

        if self.clock.now() - bridge.created_at > self.attestation_ceiling {
            return self
                .transition(bridge, BridgeStatus::Failed, |b| {
                    b.error_message = Some("attestation timeout exceeded".to_string());
                })
                .await;
        }

        let source_tx_hash = match &bridge.source_tx_hash {
            Some(hash) => hash.clone(),
            None => return Ok(bridge),
        };

        let response = match self.attestation.get_attestation(&source_tx_hash).await {
            Ok(resp) => resp,
            Err(AdapterError::CircuitOpen { .. }) | Err(AdapterError::RateLimited { .. }) => return Ok(bridge),
            Err(e) if e.is_retryable() => return Ok(bridge),
            Err(e) => {
                return self
                    .transition(bridge, BridgeStatus::Failed, |b| {
                        b.error_message = Some(e.to_string());
                    })
                    .await
            }
        };

        match response.attestation_status {
            AttestationStatus::Pending => {
                if bridge.status == BridgeStatus::Burning {
                    self.transition(bridge, BridgeStatus::Attesting, |_| {}).await
                } else {
                    Ok(bridge)
                }
            }
            AttestationStatus::Complete => {
                // Attesting is reachable from Burning directly when the
                // attestation is already complete on first poll.
                let via_attesting = if bridge.status == BridgeStatus::Burning {
                    self.transition(bridge, BridgeStatus::Attesting, |_| {}).await?
                } else {
                    bridge
                };
                self.transition(via_attesting, BridgeStatus::Minting, |b| {
                    b.message_hash = response.message_hash.clone();
                    b.attestation = response.attestation.clone();
                })
                .await
            }
        }
    }

    /// §4.B mint submission: caller (worker job) has already submitted the
    /// mint tx using the recorded message hash + attestation; this records
    /// the observed destination tx hash and marks `minting` still in
    /// flight. Completion is recorded separately via `mark_completed` once
    /// the mint tx is confirmed, per "completion is recognized by the
    /// destination tx hash being observed".
    pub async fn record_mint_submitted(&self, id: BridgeId, dest_tx_hash: String) -> Result<BridgeTransaction, Error> {
        let bridge = self.get_required(id).await?;
        if bridge.status != BridgeStatus::Minting {
            return Err(Error::conflict(format!("bridge {id} expected status minting but was {}", bridge.status)));
        }
        let mut updated = bridge.clone();
        updated.dest_tx_hash = Some(dest_tx_hash);
        updated.updated_at = self.clock.now();
        self.store.update_bridge(id, bridge.status, updated).await
    }

    /// §4.B completion hook: minting -> completed, then invokes Deposit's
    /// `ProcessBridgeDeposit`. Idempotent on `bridge_id` — a duplicate call
    /// after the bridge is already `completed` is rejected by the
    /// transition check before any allocation work repeats.
    pub async fn mark_completed(&self, id: BridgeId) -> Result<BridgeTransaction, Error> {
        let bridge = self.get_required(id).await?;
        let dest_tx_hash = bridge
            .dest_tx_hash
            .clone()
            .ok_or_else(|| Error::conflict(format!("bridge {id} has no recorded destination tx hash")))?;

        let completed = self.transition(bridge.clone(), BridgeStatus::Completed, |_| {}).await?;

        self.deposit
            .process_bridge_deposit(completed.user_id, completed.amount, dest_tx_hash, completed.id.to_string())
            .await?;

        Ok(completed)
    }

    pub async fn mark_failed(&self, id: BridgeId, error_message: String) -> Result<BridgeTransaction, Error> {
        let bridge = self.get_required(id).await?;
        if bridge.status.is_terminal() {
            return Err(Error::conflict(format!("bridge {id} is already in terminal state {}", bridge.status)));
        }
        let status = bridge.status;
        let mut updated = bridge;
        updated.status = BridgeStatus::Failed;
        updated.error_message = Some(error_message);
        updated.updated_at = self.clock.now();
        self.store.update_bridge(id, status, updated).await
    }

    pub async fn get(&self, id: BridgeId) -> Result<BridgeTransaction, Error> {
        self.get_required(id).await
    }

    /// §4.B "tie-breaks": the poll job calls this to find work; two
    /// concurrent pollers racing on the same row are resolved by the
    /// store's compare-and-swap in `transition`, not here.
    pub async fn list_in_flight(&self) -> Result<Vec<BridgeTransaction>, Error> {
        self.store.list_bridges_by_statuses(&[BridgeStatus::Pending, BridgeStatus::Burning, BridgeStatus::Attesting, BridgeStatus::Minting]).await
    }

    async fn get_required(&self, id: BridgeId) -> Result<BridgeTransaction, Error> {
        self.store.get_bridge(id).await?.ok_or_else(|| Error::not_found(format!("bridge {id} not found")))
    }

    async fn transition(
        &self,
        mut bridge: BridgeTransaction,
        to: BridgeStatus,
        mutate: impl FnOnce(&mut BridgeTransaction),
    ) -> Result<BridgeTransaction, Error> {
        if !bridge.status.can_transition_to(to) {
            // "the state machine tolerates already-advanced reads" (§4.B):
            // if another worker already moved us to `to`, treat it as a
            // successful no-op rather than an error.
            if bridge.status == to {
                return Ok(bridge);
            }
            return Err(Error::conflict(format!("illegal bridge transition {} -> {to}", bridge.status)));
        }
        let from = bridge.status;
        mutate(&mut bridge);
        bridge.status = to;
        bridge.updated_at = self.clock.now();
        self.store.update_bridge(bridge.id, from, bridge).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_allocation::AllocationEngine;
    use money_common::FixedClock;
    use money_ledger::{LedgerEngine, LedgerPort};
    use money_store::memory::MemoryStorage;
    use std::str::FromStr;

    fn setup() -> (BridgeOrchestrator, Arc<FixedClock>, Arc<dyn Storage>) {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ledger: Arc<dyn LedgerPort> = Arc::new(LedgerEngine::new(store.clone()));
        let fixed = Arc::new(FixedClock::new(chrono::Utc::now()));
        let clock: Arc<dyn Clock> = fixed.clone();
        let allocation = Arc::new(AllocationEngine::new(store.clone(), ledger.clone(), clock.clone()));
        let brokerage = Arc::new(money_adapters::brokerage::BrokerageAdapter::new("http://localhost:9", "key".to_string(), Default::default()));
        let deposit = Arc::new(money_deposit::DepositOrchestrator::new(
            store.clone(),
            allocation,
            ledger,
            brokerage,
            clock.clone(),
            Duration::hours(24),
        ));
        let attestation = Arc::new(AttestationAdapter::new("http://localhost:9", Default::default()));
        (
            BridgeOrchestrator::new(store.clone(), deposit, attestation, clock, Duration::hours(12)),
            fixed,
            store,
        )
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let (orch, _clock, _store) = setup();
        let user = UserId::new();
        let amount = Money::from_str("50.00").unwrap();
        let bridge = orch
            .initiate(user, "ethereum".into(), "solana".into(), amount, "dest-addr".into())
            .await
            .unwrap();

        let err = orch.record_mint_submitted(bridge.id, "0xmint".into()).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn exceeding_attestation_ceiling_fails_the_bridge() {
        let (orch, clock, _store) = setup();
        let user = UserId::new();
        let amount = Money::from_str("20.00").unwrap();
        let bridge = orch
            .initiate(user, "ethereum".into(), "solana".into(), amount, "dest-addr".into())
            .await
            .unwrap();
        let bridge = orch.mark_burning(bridge.id, "0xburn".into()).await.unwrap();

        clock.advance(Duration::hours(13));

        let polled = orch.poll_attestation(bridge.id).await.unwrap();
        assert_eq!(polled.status, BridgeStatus::Failed);
        assert_eq!(polled.error_message.as_deref(), Some("attestation timeout exceeded"));
    }

    #[tokio::test]
    async fn completion_credits_user_via_allocation() {
        let (orch, _clock, store) = setup();
        let user = UserId::new();
        let amount = Money::from_str("75.00").unwrap();
        let bridge = orch
            .initiate(user, "ethereum".into(), "solana".into(), amount, "dest-addr".into())
            .await
            .unwrap();
        let bridge = orch.mark_burning(bridge.id, "0xburn".into()).await.unwrap();

        // Simulate the attestation adapter having already reported
        // complete by hand-advancing through attesting -> minting, since
        // the real HTTP call in this unit test has no server to hit.
        let bridge = BridgeTransaction { status: BridgeStatus::Attesting, ..bridge };
        let bridge = store.update_bridge(bridge.id, BridgeStatus::Burning, bridge).await.unwrap();
        let mut minting = bridge.clone();
        minting.status = BridgeStatus::Minting;
        minting.message_hash = Some("0xhash".into());
        minting.attestation = Some("0xattestation".into());
        let minting = store.update_bridge(bridge.id, BridgeStatus::Attesting, minting).await.unwrap();

        let minting = orch.record_mint_submitted(minting.id, "0xmint".into()).await.unwrap();
        let completed = orch.mark_completed(minting.id).await.unwrap();

        assert_eq!(completed.status, BridgeStatus::Completed);
        let balances = store.get_user_balances(user, money_common::Currency::Usdc).await.unwrap();
        assert_eq!(balances.spending_balance + balances.stash_balance, amount);
    }
}
