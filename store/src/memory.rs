// In-memory `Storage` used by every service crate's unit tests. It
// reproduces the *contracts* of the Postgres backend (uniqueness, atomic
// claim, compare-and-swap updates) using a process-local `Mutex`, not the
// performance characteristics.

use crate::repos::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use money_common::model::*;
use money_common::{
    AccountId, BridgeId, Currency, DepositId, Error, IdempotencyKey, Money,
    ReconciliationExceptionId, ReconciliationReportId, TransactionId, UserId, WithdrawalId,
    WorkerJobId,
};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, LedgerAccount>,
    account_index: HashMap<(Option<UserId>, AccountType, Currency), AccountId>,
    transactions: HashMap<TransactionId, LedgerTransaction>,
    transactions_by_key: HashMap<String, TransactionId>,
    entries: HashMap<TransactionId, Vec<LedgerEntry>>,

    deposits: HashMap<DepositId, Deposit>,
    deposits_by_hash: HashMap<String, DepositId>,

    bridges: HashMap<BridgeId, BridgeTransaction>,

    withdrawals: HashMap<WithdrawalId, Withdrawal>,

    allocation_modes: HashMap<UserId, SmartAllocationMode>,
    allocation_events: Vec<AllocationEvent>,
    declines: Vec<(UserId, DateTime<Utc>)>,
    weekly_summaries: HashMap<(UserId, NaiveDate), WeeklyAllocationSummary>,

    jobs: HashMap<WorkerJobId, WorkerJob>,
    audit_log: Vec<AuditLogEntry>,

    idempotency: HashMap<String, IdempotencyRecord>,

    reports: HashMap<ReconciliationReportId, ReconciliationReport>,
    exceptions: HashMap<ReconciliationExceptionId, ReconciliationException>,
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerRepository for MemoryStorage {
    async fn get_account(&self, id: AccountId) -> Result<Option<LedgerAccount>, Error> {
        Ok(self.inner.lock().unwrap().accounts.get(&id).cloned())
    }

    async fn get_or_create_account(
        &self,
        user_id: Option<UserId>,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount, Error> {
        if account_type.is_user_scoped() && user_id.is_none() {
            return Err(Error::validation("user-scoped account type requires a user_id"));
        }
        if !account_type.is_user_scoped() && user_id.is_some() {
            return Err(Error::validation("system-scoped account type forbids a user_id"));
        }
        let mut guard = self.inner.lock().unwrap();
        let key = (user_id, account_type, currency);
        if let Some(id) = guard.account_index.get(&key) {
            return Ok(guard.accounts[id].clone());
        }
        let account = LedgerAccount {
            id: AccountId::new(),
            user_id,
            account_type,
            currency,
            balance: Money::ZERO,
        };
        guard.account_index.insert(key, account.id);
        guard.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_transaction_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerTransaction>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .transactions_by_key
            .get(key)
            .and_then(|id| guard.transactions.get(id))
            .cloned())
    }

    async fn get_entries(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, Error> {
        Ok(self.inner.lock().unwrap().entries.get(&transaction_id).cloned().unwrap_or_default())
    }

    async fn post_transaction(&self, new_txn: NewLedgerTransaction) -> Result<LedgerTransaction, Error> {
        let mut guard = self.inner.lock().unwrap();

        if let Some(id) = guard.transactions_by_key.get(&new_txn.idempotency_key) {
            return Ok(guard.transactions[id].clone());
        }

        // Lock ordering: apply deltas in ascending account-id order so the
        // in-memory backend exercises the same ordering contract the
        // Postgres backend provides via row locks (§5).
        let mut ordered: Vec<&EntryRequest> = new_txn.entries.iter().collect();
        ordered.sort_by_key(|e| e.account_id.0);

        // Dry-run balance check across all entries before mutating anything,
        // so a failure partway through never leaves partial state (§4.L
        // atomicity).
        let mut projected: HashMap<AccountId, Money> = HashMap::new();
        for entry in &ordered {
            let account = guard
                .accounts
                .get(&entry.account_id)
                .ok_or_else(|| Error::not_found(format!("account {} not found", entry.account_id)))?;
            let current = *projected.get(&entry.account_id).unwrap_or(&account.balance);
            let next = match entry.entry_type {
                EntryType::Debit => current - entry.amount,
                EntryType::Credit => current + entry.amount,
            };
            if next.is_negative() {
                return Err(Error::conflict(format!(
                    "posting would drive account {} balance negative",
                    entry.account_id
                )));
            }
            projected.insert(entry.account_id, next);
        }

        for (account_id, balance) in &projected {
            if let Some(account) = guard.accounts.get_mut(account_id) {
                account.balance = *balance;
            }
        }

        let now = Utc::now();
        let transaction = LedgerTransaction {
            id: TransactionId::new(),
            transaction_type: new_txn.transaction_type,
            status: TransactionStatus::Completed,
            idempotency_key: new_txn.idempotency_key.clone(),
            reference_id: new_txn.reference_id,
            reference_type: new_txn.reference_type,
            metadata: new_txn.metadata,
            completed_at: Some(now),
            created_at: now,
        };

        let entries: Vec<LedgerEntry> = new_txn
            .entries
            .into_iter()
            .map(|e| LedgerEntry {
                id: Uuid::new_v4(),
                transaction_id: transaction.id,
                account_id: e.account_id,
                entry_type: e.entry_type,
                amount: e.amount,
                currency: e.currency,
            })
            .collect();

        guard.transactions_by_key.insert(transaction.idempotency_key.clone(), transaction.id);
        guard.entries.insert(transaction.id, entries);
        guard.transactions.insert(transaction.id, transaction.clone());

        Ok(transaction)
    }

    async fn get_user_balances(&self, user_id: UserId, currency: Currency) -> Result<UserBalances, Error> {
        let guard = self.inner.lock().unwrap();
        let mut balances = UserBalances::default();
        for account in guard.accounts.values() {
            if account.user_id != Some(user_id) || account.currency != currency {
                continue;
            }
            match account.account_type {
                AccountType::UsdcBalance => balances.usdc_balance = account.balance,
                AccountType::FiatExposure => balances.fiat_exposure = account.balance,
                AccountType::PendingInvestment => balances.pending_investment = account.balance,
                AccountType::SpendingBalance => balances.spending_balance = account.balance,
                AccountType::StashBalance => balances.stash_balance = account.balance,
                _ => {}
            }
        }
        Ok(balances)
    }

    async fn get_system_buffers(&self, currency: Currency) -> Result<SystemBuffers, Error> {
        let guard = self.inner.lock().unwrap();
        let mut buffers = SystemBuffers::default();
        for account in guard.accounts.values() {
            if account.user_id.is_some() || account.currency != currency {
                continue;
            }
            match account.account_type {
                AccountType::SystemBufferUsdc => buffers.system_buffer_usdc = account.balance,
                AccountType::SystemBufferFiat => buffers.system_buffer_fiat = account.balance,
                AccountType::BrokerOperational => buffers.broker_operational = account.balance,
                _ => {}
            }
        }
        Ok(buffers)
    }

    async fn sum_account_balances(&self, account_type: AccountType, currency: Currency) -> Result<Money, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .accounts
            .values()
            .filter(|a| a.user_id.is_some() && a.account_type == account_type && a.currency == currency)
            .fold(Money::ZERO, |acc, a| acc + a.balance))
    }
}

#[async_trait]
impl DepositRepository for MemoryStorage {
    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Deposit>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.deposits_by_hash.get(tx_hash).and_then(|id| guard.deposits.get(id)).cloned())
    }

    async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, Error> {
        Ok(self.inner.lock().unwrap().deposits.get(&id).cloned())
    }

    async fn create_deposit(&self, deposit: Deposit) -> Result<Deposit, Error> {
        let mut guard = self.inner.lock().unwrap();
        if guard.deposits_by_hash.contains_key(&deposit.tx_hash) {
            return Err(Error::conflict(format!("deposit with tx_hash {} already exists", deposit.tx_hash)));
        }
        guard.deposits_by_hash.insert(deposit.tx_hash.clone(), deposit.id);
        guard.deposits.insert(deposit.id, deposit.clone());
        Ok(deposit)
    }

    async fn update_deposit(&self, id: DepositId, expected_status: DepositStatus, updated: Deposit) -> Result<Deposit, Error> {
        let mut guard = self.inner.lock().unwrap();
        let current = guard.deposits.get(&id).ok_or_else(|| Error::not_found("deposit not found"))?;
        if current.status != expected_status {
            return Err(Error::conflict(format!(
                "deposit {id} expected status {expected_status} but was {}",
                current.status
            )));
        }
        guard.deposits.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Deposit>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .deposits
            .values()
            .filter(|d| d.status == DepositStatus::Pending && d.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_by_statuses(&self, statuses: &[DepositStatus]) -> Result<Vec<Deposit>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.deposits.values().filter(|d| statuses.contains(&d.status)).cloned().collect())
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32, cursor: Option<DepositId>) -> Result<Vec<Deposit>, Error> {
        let guard = self.inner.lock().unwrap();
        let mut mine: Vec<Deposit> = guard.deposits.values().filter(|d| d.user_id == user_id).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));

        let start = match cursor {
            None => 0,
            Some(cursor_id) => mine.iter().position(|d| d.id == cursor_id).map(|i| i + 1).unwrap_or(mine.len()),
        };
        Ok(mine.into_iter().skip(start).take(limit as usize).collect())
    }
}

#[async_trait]
impl BridgeRepository for MemoryStorage {
    async fn get_bridge(&self, id: BridgeId) -> Result<Option<BridgeTransaction>, Error> {
        Ok(self.inner.lock().unwrap().bridges.get(&id).cloned())
    }

    async fn create_bridge(&self, bridge: BridgeTransaction) -> Result<BridgeTransaction, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.bridges.insert(bridge.id, bridge.clone());
        Ok(bridge)
    }

    async fn update_bridge(&self, id: BridgeId, expected_status: BridgeStatus, updated: BridgeTransaction) -> Result<BridgeTransaction, Error> {
        let mut guard = self.inner.lock().unwrap();
        let current = guard.bridges.get(&id).ok_or_else(|| Error::not_found("bridge not found"))?;
        if current.status != expected_status {
            return Err(Error::conflict(format!(
                "bridge {id} expected status {expected_status} but was {}",
                current.status
            )));
        }
        guard.bridges.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_bridges_by_statuses(&self, statuses: &[BridgeStatus]) -> Result<Vec<BridgeTransaction>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.bridges.values().filter(|b| statuses.contains(&b.status)).cloned().collect())
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryStorage {
    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, Error> {
        Ok(self.inner.lock().unwrap().withdrawals.get(&id).cloned())
    }

    async fn create_withdrawal(&self, withdrawal: Withdrawal) -> Result<Withdrawal, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(withdrawal)
    }

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        expected_status: WithdrawalStatus,
        updated: Withdrawal,
    ) -> Result<Withdrawal, Error> {
        let mut guard = self.inner.lock().unwrap();
        let current = guard.withdrawals.get(&id).ok_or_else(|| Error::not_found("withdrawal not found"))?;
        if current.status != expected_status {
            return Err(Error::conflict(format!(
                "withdrawal {id} expected status {expected_status} but was {}",
                current.status
            )));
        }
        guard.withdrawals.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus) -> Result<Vec<Withdrawal>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.withdrawals.values().filter(|w| w.status == status).cloned().collect())
    }
}

#[async_trait]
impl AllocationRepository for MemoryStorage {
    async fn get_mode(&self, user_id: UserId) -> Result<Option<SmartAllocationMode>, Error> {
        Ok(self.inner.lock().unwrap().allocation_modes.get(&user_id).cloned())
    }

    async fn upsert_mode(&self, mode: SmartAllocationMode) -> Result<SmartAllocationMode, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.allocation_modes.insert(mode.user_id, mode.clone());
        Ok(mode)
    }

    async fn insert_event(&self, event: AllocationEvent) -> Result<AllocationEvent, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.allocation_events.push(event.clone());
        Ok(event)
    }

    async fn list_events_in_range(&self, user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AllocationEvent>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .allocation_events
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= from && e.created_at < to)
            .cloned()
            .collect())
    }

    async fn record_decline(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), Error> {
        self.inner.lock().unwrap().declines.push((user_id, at));
        Ok(())
    }

    async fn count_declines_in_range(&self, user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u32, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.declines.iter().filter(|(u, at)| *u == user_id && *at >= from && *at < to).count() as u32)
    }

    async fn upsert_weekly_summary(&self, summary: WeeklyAllocationSummary) -> Result<WeeklyAllocationSummary, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.weekly_summaries.insert((summary.user_id, summary.week_start), summary.clone());
        Ok(summary)
    }

    async fn get_weekly_summary(&self, user_id: UserId, week_start: NaiveDate) -> Result<Option<WeeklyAllocationSummary>, Error> {
        Ok(self.inner.lock().unwrap().weekly_summaries.get(&(user_id, week_start)).cloned())
    }
}

#[async_trait]
impl WorkerJobRepository for MemoryStorage {
    async fn enqueue(&self, job: WorkerJob) -> Result<WorkerJob, Error> {
        let mut guard = self.inner.lock().unwrap();
        guard.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: WorkerJobId) -> Result<Option<WorkerJob>, Error> {
        Ok(self.inner.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn claim_batch(&self, job_type: &str, batch_size: u32, now: DateTime<Utc>) -> Result<Vec<WorkerJob>, Error> {
        let mut guard = self.inner.lock().unwrap();
        let mut claimed = Vec::new();
        let mut ids: Vec<WorkerJobId> = guard
            .jobs
            .values()
            .filter(|j| {
                j.job_type == job_type
                    && (j.status == WorkerJobStatus::Queued
                        || (j.status == WorkerJobStatus::Retry && j.next_retry_at.map(|t| t <= now).unwrap_or(true)))
            })
            .map(|j| j.id)
            .collect();
        ids.truncate(batch_size as usize);
        for id in ids {
            if let Some(job) = guard.jobs.get_mut(&id) {
                job.status = WorkerJobStatus::InProgress;
                job.attempt_count += 1;
                job.started_at = Some(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: WorkerJobId, now: DateTime<Utc>) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let job = guard.jobs.get_mut(&id).ok_or_else(|| Error::not_found("job not found"))?;
        job.status = WorkerJobStatus::Completed;
        job.completed_at = Some(now);
        Ok(())
    }

    async fn mark_retry(&self, id: WorkerJobId, next_retry_at: DateTime<Utc>, error_message: String) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let job = guard.jobs.get_mut(&id).ok_or_else(|| Error::not_found("job not found"))?;
        job.status = WorkerJobStatus::Retry;
        job.next_retry_at = Some(next_retry_at);
        job.error_message = Some(error_message);
        Ok(())
    }

    async fn mark_failed(&self, id: WorkerJobId, error_message: String) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let job = guard.jobs.get_mut(&id).ok_or_else(|| Error::not_found("job not found"))?;
        job.status = WorkerJobStatus::Failed;
        job.error_message = Some(error_message);
        Ok(())
    }

    async fn reclaim_stuck(&self, job_type: &str, claim_timeout: chrono::Duration, now: DateTime<Utc>) -> Result<u32, Error> {
        let mut guard = self.inner.lock().unwrap();
        let mut count = 0;
        for job in guard.jobs.values_mut() {
            if job.job_type == job_type
                && job.status == WorkerJobStatus::InProgress
                && job.started_at.map(|s| now - s > claim_timeout).unwrap_or(false)
            {
                job.status = WorkerJobStatus::Retry;
                job.next_retry_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStorage {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), Error> {
        self.inner.lock().unwrap().audit_log.push(entry);
        Ok(())
    }

    async fn list_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLogEntry>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .audit_log
            .iter()
            .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdempotencyRepository for MemoryStorage {
    async fn try_insert_placeholder(
        &self,
        key: &IdempotencyKey,
        path: &str,
        method: &str,
        request_hash: &str,
        user_id: Option<UserId>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, Error> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(existing) = guard.idempotency.get(key.as_str()) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        let record = IdempotencyRecord {
            key: key.clone(),
            path: path.to_string(),
            method: method.to_string(),
            request_hash: request_hash.to_string(),
            user_id,
            response_status: 0,
            response_body: Vec::new(),
            in_progress: true,
            created_at: Utc::now(),
            expires_at,
        };
        guard.idempotency.insert(key.as_str().to_string(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn complete(&self, key: &IdempotencyKey, response_status: u16, response_body: Vec<u8>) -> Result<IdempotencyRecord, Error> {
        let mut guard = self.inner.lock().unwrap();
        let record = guard.idempotency.get_mut(key.as_str()).ok_or_else(|| Error::not_found("idempotency key not found"))?;
        record.in_progress = false;
        record.response_status = response_status;
        record.response_body = response_body;
        Ok(record.clone())
    }

    async fn get_idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, Error> {
        Ok(self.inner.lock().unwrap().idempotency.get(key.as_str()).cloned())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut guard = self.inner.lock().unwrap();
        let before = guard.idempotency.len();
        guard.idempotency.retain(|_, record| !record.is_expired(now));
        Ok((before - guard.idempotency.len()) as u64)
    }
}

#[async_trait]
impl ReconciliationRepository for MemoryStorage {
    async fn create_report(&self, run_type: RunType) -> Result<ReconciliationReport, Error> {
        let mut guard = self.inner.lock().unwrap();
        let report = ReconciliationReport {
            id: ReconciliationReportId::new(),
            run_type,
            status: ReportStatus::Pending,
            checks_passed: 0,
            checks_failed: 0,
            exceptions_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        guard.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn complete_report(
        &self,
        id: ReconciliationReportId,
        checks_passed: u32,
        checks_failed: u32,
        exceptions_count: u32,
    ) -> Result<ReconciliationReport, Error> {
        let mut guard = self.inner.lock().unwrap();
        let report = guard.reports.get_mut(&id).ok_or_else(|| Error::not_found("report not found"))?;
        report.status = ReportStatus::Completed;
        report.checks_passed = checks_passed;
        report.checks_failed = checks_failed;
        report.exceptions_count = exceptions_count;
        report.completed_at = Some(Utc::now());
        Ok(report.clone())
    }

    async fn insert_exceptions(&self, exceptions: Vec<ReconciliationException>) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        for exception in exceptions {
            guard.exceptions.insert(exception.id, exception);
        }
        Ok(())
    }

    async fn resolve_exception(&self, id: ReconciliationExceptionId, resolved_by: &str, note: &str) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let exception = guard.exceptions.get_mut(&id).ok_or_else(|| Error::not_found("exception not found"))?;
        exception.resolved = true;
        exception.resolved_by = Some(resolved_by.to_string());
        exception.resolution_note = Some(note.to_string());
        Ok(())
    }

    async fn list_open_exceptions(&self) -> Result<Vec<ReconciliationException>, Error> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.exceptions.values().filter(|e| !e.resolved).cloned().collect())
    }
}
