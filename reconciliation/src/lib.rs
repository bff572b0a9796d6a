// Reconciliation Service (spec.md §4.R). Runs a fixed battery of
// independent checks, grades every discrepancy it finds, and auto-corrects
// only the ones small enough to be safe to fix without a human.

use chrono::Utc;
use money_adapters::brokerage::BrokerageAdapter;
use money_adapters::custodian::CustodianAdapter;
use money_common::model::*;
use money_common::{AccountType, Currency, Error, Money, ReconciliationExceptionId, UserId};
use money_ledger::LedgerPort;
use money_store::Storage;
use std::sync::Arc;

/// Maps an internal user to the external accounts the brokerage/custodian
/// checks need to read. There is no persisted user-to-external-account
/// directory in this workspace (that mapping is built during onboarding,
/// out of scope here — see DESIGN.md), so the caller supplies the current
/// set of links for each run.
#[derive(Debug, Clone)]
pub struct UserAccountLink {
    pub user_id: UserId,
    pub brokerage_account_id: String,
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Custodian wallet id that backs the Circle/custodian system buffer.
    pub custodian_system_wallet_id: String,
    pub tolerance_circle: Money,
    pub tolerance_brokerage: Money,
}

pub struct ReconciliationService {
    store: Arc<dyn Storage>,
    ledger: Arc<dyn LedgerPort>,
    custodian: Arc<CustodianAdapter>,
    brokerage: Arc<BrokerageAdapter>,
    config: ReconciliationConfig,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn Storage>,
        ledger: Arc<dyn LedgerPort>,
        custodian: Arc<CustodianAdapter>,
        brokerage: Arc<BrokerageAdapter>,
        config: ReconciliationConfig,
    ) -> Self {
        Self { store, ledger, custodian, brokerage, config }
    }

    /// §4.R's run lifecycle: create report pending, execute every check
    /// independently, persist exceptions in one batch, complete with
    /// counts. A single check erroring (e.g. an adapter timing out) is
    /// recorded as a failed check, not a failed run — the rest still run.
    pub async fn run(&self, run_type: RunType, links: &[UserAccountLink]) -> Result<ReconciliationReport, Error> {
        let report = self.store.create_report(run_type).await?;
        let mut exceptions = Vec::new();
        let mut checks_passed = 0u32;
        let mut checks_failed = 0u32;

        let results: Vec<Result<Vec<ReconciliationException>, Error>> = vec![
            self.exceptions_circle_balance(report.id).await,
            self.exceptions_brokerage_balance(report.id, links).await,
            self.exceptions_positions(report.id, links).await,
            self.exceptions_brokerage_activity(report.id, links).await,
            self.exceptions_deposit_consistency(report.id).await,
            self.exceptions_withdrawal_consistency(report.id).await,
            self.exceptions_bridge_consistency(report.id).await,
        ];

        for outcome in results {
            match outcome {
                Ok(found) => {
                    if found.is_empty() {
                        checks_passed += 1;
                    } else {
                        checks_failed += 1;
                    }
                    exceptions.extend(found);
                }
                Err(e) => {
                    log::error!("reconciliation check errored: {e}");
                    checks_failed += 1;
                }
            }
        }

        if !exceptions.is_empty() {
            self.store.insert_exceptions(exceptions.clone()).await?;
        }

        for exception in &exceptions {
            if exception.severity.auto_correctable() {
                if let Err(e) = self.auto_correct(exception).await {
                    log::warn!("auto-correction failed for exception {}: {e}", exception.id);
                }
            }
        }

        self.store
            .complete_report(report.id, checks_passed, checks_failed, exceptions.len() as u32)
            .await
    }

    fn new_exception(
        report_id: money_common::ReconciliationReportId,
        check_name: &str,
        difference: Money,
        description: String,
    ) -> ReconciliationException {
        ReconciliationException {
            id: ReconciliationExceptionId::new(),
            report_id,
            check_name: check_name.to_string(),
            difference,
            severity: Severity::grade(difference.as_decimal()),
            description,
            resolved: false,
            resolved_by: None,
            resolution_note: None,
            created_at: Utc::now(),
        }
    }

    // -- Circle (custodian) balance --------------------------------------

    async fn exceptions_circle_balance(&self, report_id: money_common::ReconciliationReportId) -> Result<Vec<ReconciliationException>, Error> {
        let buffers = self.ledger.get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc).await;
        let ledger_balance = match buffers {
            Ok(account) => account.balance,
            Err(e) => return Err(e),
        };

        let custodian_balance = self
            .custodian
            .get_balance(&self.config.custodian_system_wallet_id)
            .await
            .map_err(Error::from)?;

        let diff = ledger_balance - custodian_balance;
        if diff.as_decimal().abs() <= self.config.tolerance_circle.as_decimal() {
            return Ok(vec![]);
        }
        Ok(vec![Self::new_exception(
            report_id,
            "circle_balance",
            diff,
            format!("ledger system_buffer_usdc {ledger_balance} vs custodian total {custodian_balance}"),
        )])
    }

    // -- Brokerage balance -------------------------------------------------

    async fn exceptions_brokerage_balance(
        &self,
        report_id: money_common::ReconciliationReportId,
        links: &[UserAccountLink],
    ) -> Result<Vec<ReconciliationException>, Error> {
        let ledger_total = self.ledger_fiat_exposure_total().await?;

        let mut brokerage_total = Money::ZERO;
        for link in links {
            let bp = self.brokerage.get_buying_power(&link.brokerage_account_id).await.map_err(Error::from)?;
            brokerage_total = brokerage_total + bp;
        }

        let diff = ledger_total - brokerage_total;
        if diff.as_decimal().abs() <= self.config.tolerance_brokerage.as_decimal() {
            return Ok(vec![]);
        }
        Ok(vec![Self::new_exception(
            report_id,
            "brokerage_balance",
            diff,
            format!("sum(ledger.fiat_exposure) {ledger_total} vs brokerage total buying power {brokerage_total}"),
        )])
    }

    async fn ledger_fiat_exposure_total(&self) -> Result<Money, Error> {
        self.store.sum_account_balances(AccountType::FiatExposure, Currency::Usd).await
    }

    // -- Per-user position reconciliation ----------------------------------

    /// Ledger carries the invested amount for a user as `pending_investment`
    /// (this workspace has no per-symbol position ledger — that detail is
    /// owned entirely by the brokerage, per §1/§4.A), so the comparison is
    /// against the brokerage's total market value across that user's
    /// positions rather than a symbol-by-symbol diff.
    async fn exceptions_positions(
        &self,
        report_id: money_common::ReconciliationReportId,
        links: &[UserAccountLink],
    ) -> Result<Vec<ReconciliationException>, Error> {
        let mut exceptions = Vec::new();
        for link in links {
            let positions = self.brokerage.list_positions(&link.brokerage_account_id).await.map_err(Error::from)?;
            let mut market_value = Money::ZERO;
            for position in &positions {
                let value = Money::from_str(&position.market_value)
                    .map_err(|e| Error::internal(format!("bad market_value from brokerage: {e}")))?;
                market_value = market_value + value;
            }

            let balances = self.ledger.get_or_create_account(Some(link.user_id), AccountType::PendingInvestment, Currency::Usd).await?;
            let diff = balances.balance - market_value;
            if diff.as_decimal().abs() > self.config.tolerance_brokerage.as_decimal() {
                exceptions.push(Self::new_exception(
                    report_id,
                    "position_discrepancy",
                    diff,
                    format!("user {} ledger pending_investment {} vs brokerage market value {market_value}", link.user_id, balances.balance),
                ));
            }
        }
        Ok(exceptions)
    }

    // -- Brokerage funding activity ------------------------------------------

    /// Cross-checks the brokerage's own activity feed against the ledger's
    /// `fiat_exposure` balance per user: `complete_brokerage_funding`
    /// journals funds into the brokerage and credits `fiat_exposure` in the
    /// same logical operation, but they land in two different systems, so
    /// this check is what catches a journal that the brokerage silently
    /// dropped or reversed without the ledger side ever hearing about it.
    async fn exceptions_brokerage_activity(
        &self,
        report_id: money_common::ReconciliationReportId,
        links: &[UserAccountLink],
    ) -> Result<Vec<ReconciliationException>, Error> {
        let mut exceptions = Vec::new();
        for link in links {
            let activities = self.brokerage.list_activity(&link.brokerage_account_id).await.map_err(Error::from)?;
            let mut funded = Money::ZERO;
            for activity in &activities {
                if activity.activity_type == "journal" {
                    let amount = Money::from_str(&activity.amount)
                        .map_err(|e| Error::internal(format!("bad activity amount from brokerage: {e}")))?;
                    funded = funded + amount;
                }
            }

            let account = self.ledger.get_or_create_account(Some(link.user_id), AccountType::FiatExposure, Currency::Usd).await?;
            let diff = account.balance - funded;
            if diff.as_decimal().abs() > self.config.tolerance_brokerage.as_decimal() {
                exceptions.push(Self::new_exception(
                    report_id,
                    "brokerage_activity_consistency",
                    diff,
                    format!("user {} ledger fiat_exposure {} vs brokerage journal activity total {funded}", link.user_id, account.balance),
                ));
            }
        }
        Ok(exceptions)
    }

    // -- Deposit consistency -------------------------------------------------

    async fn exceptions_deposit_consistency(&self, report_id: money_common::ReconciliationReportId) -> Result<Vec<ReconciliationException>, Error> {
        let deposits = self.store.list_by_statuses(&[DepositStatus::BrokerFunded]).await?;
        let mut exceptions = Vec::new();
        for deposit in deposits {
            let key = format!("deposit:{}:broker_funded", deposit.id);
            let diff = self.entries_vs_amount(&key, deposit.amount).await?;
            if let Some(diff) = diff {
                exceptions.push(Self::new_exception(
                    report_id,
                    "deposit_consistency",
                    diff,
                    format!("deposit {} amount {} has no matching ledger entries", deposit.id, deposit.amount),
                ));
            }
        }
        Ok(exceptions)
    }

    // -- Withdrawal consistency (symmetric to deposit) -----------------------

    async fn exceptions_withdrawal_consistency(&self, report_id: money_common::ReconciliationReportId) -> Result<Vec<ReconciliationException>, Error> {
        let withdrawals = self.store.list_withdrawals_by_status(WithdrawalStatus::Completed).await?;
        let mut exceptions = Vec::new();
        for withdrawal in withdrawals {
            let key = format!("withdrawal:{}:completed", withdrawal.id);
            let diff = self.entries_vs_amount(&key, withdrawal.amount).await?;
            if let Some(diff) = diff {
                exceptions.push(Self::new_exception(
                    report_id,
                    "withdrawal_consistency",
                    diff,
                    format!("withdrawal {} amount {} has no matching ledger entries", withdrawal.id, withdrawal.amount),
                ));
            }
        }
        Ok(exceptions)
    }

    // -- Bridge consistency ----------------------------------------------

    async fn exceptions_bridge_consistency(&self, report_id: money_common::ReconciliationReportId) -> Result<Vec<ReconciliationException>, Error> {
        let bridges = self.store.list_bridges_by_statuses(&[BridgeStatus::Completed]).await?;
        let mut exceptions = Vec::new();
        for bridge in bridges {
            let key = format!("bridge:{}:completed", bridge.id);
            let diff = self.entries_vs_amount(&key, bridge.amount).await?;
            if let Some(diff) = diff {
                exceptions.push(Self::new_exception(
                    report_id,
                    "bridge_consistency",
                    diff,
                    format!("completed bridge {} amount {} has no matching inbound deposit/ledger post", bridge.id, bridge.amount),
                ));
            }
        }
        Ok(exceptions)
    }

    /// Looks up the ledger transaction posted under `idempotency_key` and
    /// compares the sum of its credit entries to `expected`. Returns `None`
    /// if they match within a single unit of the currency's smallest
    /// denomination, `Some(difference)` otherwise (including when no
    /// transaction is found at all, in which case the difference is the
    /// full expected amount).
    async fn entries_vs_amount(&self, idempotency_key: &str, expected: Money) -> Result<Option<Money>, Error> {
        let txn = self.store.find_transaction_by_idempotency_key(idempotency_key).await?;
        let Some(txn) = txn else {
            return Ok(Some(expected));
        };

        let entries = self.store.get_entries(txn.id).await?;
        let credited = entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Credit)
            .fold(Money::ZERO, |acc, e| acc + e.amount);

        let diff = expected - credited;
        if diff.is_zero() {
            Ok(None)
        } else {
            Ok(Some(diff))
        }
    }

    // -- Auto-correction ----------------------------------------------------

    /// Only low-severity exceptions are fixed automatically, via a small
    /// compensating ledger transaction against the system buffer — never
    /// against a user-scoped account, since we don't know which side of the
    /// discrepancy is wrong, only that it's small enough to not wait on a
    /// human (§4.R).
    async fn auto_correct(&self, exception: &ReconciliationException) -> Result<(), Error> {
        let currency = if exception.check_name == "circle_balance" { Currency::Usdc } else { Currency::Usd };
        let account_type = if exception.check_name == "circle_balance" {
            AccountType::SystemBufferUsdc
        } else {
            AccountType::BrokerOperational
        };

        let buffer = self.ledger.get_or_create_account(None, account_type, currency).await?;
        let correction = exception.difference;
        if correction.is_zero() {
            return Ok(());
        }

        let entry_type = if correction.is_positive() { EntryType::Credit } else { EntryType::Debit };
        self.ledger
            .post_transaction(PostTransactionRequest {
                user_id: None,
                transaction_type: TransactionType::BufferReplenishment,
                idempotency_key: format!("reconciliation:{}:auto_correct", exception.id),
                reference_id: Some(exception.id.to_string()),
                reference_type: Some("reconciliation_exception".to_string()),
                metadata: serde_json::json!({ "check_name": exception.check_name }),
                entries: vec![EntryRequest {
                    account_id: buffer.id,
                    entry_type,
                    amount: Money::new(correction.as_decimal().abs()),
                    currency,
                }],
            })
            .await?;

        self.store
            .resolve_exception(
                exception.id,
                "system",
                &format!("auto-corrected {} difference of {correction}", exception.check_name),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_adapters::HttpAdapterConfig;
    use money_ledger::LedgerEngine;
    use money_store::memory::MemoryStorage;
    use rust_decimal::Decimal;

    fn config() -> ReconciliationConfig {
        ReconciliationConfig {
            custodian_system_wallet_id: "wallet-system".to_string(),
            tolerance_circle: Money::new(Decimal::ONE),
            tolerance_brokerage: Money::new(Decimal::from(100)),
        }
    }

    fn service() -> ReconciliationService {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ledger: Arc<dyn LedgerPort> = Arc::new(LedgerEngine::new(store.clone()));
        let custodian = Arc::new(CustodianAdapter::new("http://localhost", "key".to_string(), HttpAdapterConfig::default()));
        let brokerage = Arc::new(BrokerageAdapter::new("http://localhost", "key".to_string(), HttpAdapterConfig::default()));
        ReconciliationService::new(store, ledger, custodian, brokerage, config())
    }

    #[tokio::test]
    async fn deposit_consistency_flags_missing_ledger_entries() {
        let svc = service();
        let deposit = Deposit {
            id: money_common::DepositId::new(),
            user_id: UserId::new(),
            chain: "ethereum".to_string(),
            tx_hash: "0xabc".to_string(),
            token: "USDC".to_string(),
            amount: Money::new(Decimal::from(500)),
            status: DepositStatus::BrokerFunded,
            virtual_account_id: None,
            off_ramp_tx_id: None,
            broker_funding_tx_id: None,
            error_message: None,
            created_at: Utc::now(),
            confirmed_at: None,
            off_ramp_initiated_at: None,
            off_ramp_completed_at: None,
            broker_funded_at: None,
        };
        svc.store.create_deposit(deposit.clone()).await.unwrap();

        let report_id = money_common::ReconciliationReportId::new();
        let exceptions = svc.exceptions_deposit_consistency(report_id).await.unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn deposit_consistency_passes_when_ledger_matches() {
        let svc = service();
        let user_id = UserId::new();
        let amount = Money::new(Decimal::from(500));
        let deposit_id = money_common::DepositId::new();

        let broker_account = svc.ledger.get_or_create_account(Some(user_id), AccountType::FiatExposure, Currency::Usd).await.unwrap();
        let operational = svc.ledger.get_or_create_account(None, AccountType::BrokerOperational, Currency::Usd).await.unwrap();
        svc.ledger
            .post_transaction(PostTransactionRequest {
                user_id: Some(user_id),
                transaction_type: TransactionType::Deposit,
                idempotency_key: format!("deposit:{deposit_id}:broker_funded"),
                reference_id: Some(deposit_id.to_string()),
                reference_type: Some("deposit".to_string()),
                metadata: serde_json::json!({}),
                entries: vec![
                    EntryRequest { account_id: operational.id, entry_type: EntryType::Debit, amount, currency: Currency::Usd },
                    EntryRequest { account_id: broker_account.id, entry_type: EntryType::Credit, amount, currency: Currency::Usd },
                ],
            })
            .await
            .unwrap();

        let deposit = Deposit {
            id: deposit_id,
            user_id,
            chain: "ethereum".to_string(),
            tx_hash: "0xdef".to_string(),
            token: "USDC".to_string(),
            amount,
            status: DepositStatus::BrokerFunded,
            virtual_account_id: None,
            off_ramp_tx_id: None,
            broker_funding_tx_id: None,
            error_message: None,
            created_at: Utc::now(),
            confirmed_at: None,
            off_ramp_initiated_at: None,
            off_ramp_completed_at: None,
            broker_funded_at: None,
        };
        svc.store.create_deposit(deposit).await.unwrap();

        let report_id = money_common::ReconciliationReportId::new();
        let exceptions = svc.exceptions_deposit_consistency(report_id).await.unwrap();
        assert!(exceptions.is_empty());
    }

    #[test]
    fn severity_grading_drives_auto_correct_eligibility() {
        assert!(Severity::grade(Decimal::new(50, 2)).auto_correctable());
        assert!(!Severity::grade(Decimal::from(5)).auto_correctable());
    }
}
