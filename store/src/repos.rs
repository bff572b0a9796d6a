use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use money_common::model::*;
use money_common::{
    AccountId, AccountType, BridgeId, Currency, DepositId, Error, IdempotencyKey,
    ReconciliationExceptionId, ReconciliationReportId, TransactionId, UserId, WithdrawalId,
    WorkerJobId,
};

/// A freshly-validated request to post a balanced transaction. Shape
/// invariants (entry count, debit==credit, currency match) are the Ledger
/// Engine's job and are checked before this ever reaches the store; this
/// struct is deliberately "already correct" — the store's remaining
/// responsibility is atomicity, lock ordering, and the non-negative-balance
/// check which both require the database transaction.
#[derive(Debug, Clone)]
pub struct NewLedgerTransaction {
    pub user_id: Option<UserId>,
    pub transaction_type: TransactionType,
    pub idempotency_key: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub metadata: serde_json::Value,
    pub entries: Vec<EntryRequest>,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Option<LedgerAccount>, Error>;

    /// Accounts are created lazily on first reference — the (user_id,
    /// account_type, currency) uniqueness constraint makes this idempotent.
    async fn get_or_create_account(
        &self,
        user_id: Option<UserId>,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount, Error>;

    async fn find_transaction_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerTransaction>, Error>;

    async fn get_entries(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, Error>;

    /// Locks the touched accounts in ascending account-id order, checks
    /// every debit against its account's current balance, applies the
    /// deltas, inserts the entries, and marks the transaction completed —
    /// all inside one serializable unit (§4.L Atomicity, §5 ordering
    /// guarantee). Returns `Error::Conflict` if a debit would drive a
    /// balance negative.
    async fn post_transaction(&self, new_txn: NewLedgerTransaction) -> Result<LedgerTransaction, Error>;

    async fn get_user_balances(&self, user_id: UserId, currency: Currency) -> Result<UserBalances, Error>;

    async fn get_system_buffers(&self, currency: Currency) -> Result<SystemBuffers, Error>;

    /// Sum of balances across every user-scoped account of `account_type` in
    /// `currency` — e.g. `sum_over_users(ledger.fiat_exposure)` for the
    /// Reconciliation Service's brokerage-balance check (§4.R).
    async fn sum_account_balances(&self, account_type: AccountType, currency: Currency) -> Result<Money, Error>;
}

#[async_trait]
pub trait DepositRepository: Send + Sync {
    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Deposit>, Error>;
    async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, Error>;
    async fn create_deposit(&self, deposit: Deposit) -> Result<Deposit, Error>;

    /// Compare-and-swap on `expected_status` — the row lock that makes two
    /// concurrent observers of the same deposit serialize (§5).
    async fn update_deposit(
        &self,
        id: DepositId,
        expected_status: DepositStatus,
        updated: Deposit,
    ) -> Result<Deposit, Error>;

    async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Deposit>, Error>;
    async fn list_by_statuses(&self, statuses: &[DepositStatus]) -> Result<Vec<Deposit>, Error>;

    /// Newest-first page of a user's deposits for `GET /funding/confirmations`
    /// (§6). `cursor`, when present, is the id of the last deposit the
    /// caller already saw; the page starts strictly after it. Callers fetch
    /// `limit + 1` rows to detect whether a further page exists without a
    /// separate count query.
    async fn list_for_user(&self, user_id: UserId, limit: u32, cursor: Option<DepositId>) -> Result<Vec<Deposit>, Error>;
}

#[async_trait]
pub trait BridgeRepository: Send + Sync {
    async fn get_bridge(&self, id: BridgeId) -> Result<Option<BridgeTransaction>, Error>;
    async fn create_bridge(&self, bridge: BridgeTransaction) -> Result<BridgeTransaction, Error>;

    async fn update_bridge(
        &self,
        id: BridgeId,
        expected_status: BridgeStatus,
        updated: BridgeTransaction,
    ) -> Result<BridgeTransaction, Error>;

    async fn list_bridges_by_statuses(&self, statuses: &[BridgeStatus]) -> Result<Vec<BridgeTransaction>, Error>;
}

#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn get_mode(&self, user_id: UserId) -> Result<Option<SmartAllocationMode>, Error>;
    async fn upsert_mode(&self, mode: SmartAllocationMode) -> Result<SmartAllocationMode, Error>;
    async fn insert_event(&self, event: AllocationEvent) -> Result<AllocationEvent, Error>;

    async fn list_events_in_range(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AllocationEvent>, Error>;

    async fn record_decline(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), Error>;
    async fn count_declines_in_range(&self, user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u32, Error>;

    async fn upsert_weekly_summary(&self, summary: WeeklyAllocationSummary) -> Result<WeeklyAllocationSummary, Error>;
    async fn get_weekly_summary(&self, user_id: UserId, week_start: NaiveDate) -> Result<Option<WeeklyAllocationSummary>, Error>;
}

#[async_trait]
pub trait WorkerJobRepository: Send + Sync {
    async fn enqueue(&self, job: WorkerJob) -> Result<WorkerJob, Error>;
    async fn get_job(&self, id: WorkerJobId) -> Result<Option<WorkerJob>, Error>;

    /// Atomically marks up to `batch_size` queued/retry-ready jobs of
    /// `job_type` as `in_progress`, bumps attempt_count, sets started_at —
    /// the "select for update skip locked" pattern from §5, so two workers
    /// never claim the same job.
    async fn claim_batch(&self, job_type: &str, batch_size: u32, now: DateTime<Utc>) -> Result<Vec<WorkerJob>, Error>;

    async fn mark_completed(&self, id: WorkerJobId, now: DateTime<Utc>) -> Result<(), Error>;
    async fn mark_retry(&self, id: WorkerJobId, next_retry_at: DateTime<Utc>, error_message: String) -> Result<(), Error>;
    async fn mark_failed(&self, id: WorkerJobId, error_message: String) -> Result<(), Error>;

    /// Returns jobs stuck `in_progress` past the claim timeout to `retry`
    /// (§5 "claim timeout"). Returns how many were reclaimed.
    async fn reclaim_stuck(&self, job_type: &str, claim_timeout: chrono::Duration, now: DateTime<Utc>) -> Result<u32, Error>;
}

#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, Error>;
    async fn create_withdrawal(&self, withdrawal: Withdrawal) -> Result<Withdrawal, Error>;

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        expected_status: WithdrawalStatus,
        updated: Withdrawal,
    ) -> Result<Withdrawal, Error>;

    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus) -> Result<Vec<Withdrawal>, Error>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), Error>;
    async fn list_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLogEntry>, Error>;
}

pub enum InsertOutcome {
    Inserted,
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Inserts an in-progress placeholder if the key is unused; returns the
    /// existing record (possibly still in-progress) if another request won
    /// the race. The unique constraint on `key` is what makes this atomic
    /// (§4.I concurrency, §5 ordering guarantee).
    async fn try_insert_placeholder(
        &self,
        key: &IdempotencyKey,
        path: &str,
        method: &str,
        request_hash: &str,
        user_id: Option<UserId>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, Error>;

    async fn complete(
        &self,
        key: &IdempotencyKey,
        response_status: u16,
        response_body: Vec<u8>,
    ) -> Result<IdempotencyRecord, Error>;

    async fn get_idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, Error>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    async fn create_report(&self, run_type: RunType) -> Result<ReconciliationReport, Error>;

    async fn complete_report(
        &self,
        id: ReconciliationReportId,
        checks_passed: u32,
        checks_failed: u32,
        exceptions_count: u32,
    ) -> Result<ReconciliationReport, Error>;

    async fn insert_exceptions(&self, exceptions: Vec<ReconciliationException>) -> Result<(), Error>;

    async fn resolve_exception(
        &self,
        id: ReconciliationExceptionId,
        resolved_by: &str,
        note: &str,
    ) -> Result<(), Error>;

    async fn list_open_exceptions(&self) -> Result<Vec<ReconciliationException>, Error>;
}

/// Everything a service needs, composed the way `tos_daemon`'s `Storage`
/// composes its many `*Provider` traits into one bound.
pub trait Storage:
    LedgerRepository
    + DepositRepository
    + BridgeRepository
    + WithdrawalRepository
    + AllocationRepository
    + WorkerJobRepository
    + AuditLogRepository
    + IdempotencyRepository
    + ReconciliationRepository
    + Send
    + Sync
    + 'static
{
}

impl<T> Storage for T where
    T: LedgerRepository
        + DepositRepository
        + BridgeRepository
        + WithdrawalRepository
        + AllocationRepository
        + WorkerJobRepository
        + AuditLogRepository
        + IdempotencyRepository
        + ReconciliationRepository
        + Send
        + Sync
        + 'static
{
}
