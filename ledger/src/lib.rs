// Ledger Engine (spec.md §4.L). The one primary mutation is
// `PostTransaction`; everything else is a read projection. Preconditions
// are checked here, before the store is ever touched, so a rejected
// request never reaches the transactional unit of work — the store's
// job is atomicity and lock ordering, not business validation.

use async_trait::async_trait;
use money_common::model::*;
use money_common::{AccountId, Currency, Error, Money, TransactionId, UserId};
use money_store::{NewLedgerTransaction, Storage};
use std::sync::Arc;

pub struct LedgerEngine {
    store: Arc<dyn Storage>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Precondition checks from §4.L: entry count, amount sign, debit/credit
    /// balance, currency match. Negative-balance and account-scope checks
    /// happen in the store, which is the only place that can see the
    /// current balance under lock.
    fn validate(request: &PostTransactionRequest) -> Result<(), Error> {
        if request.entries.len() < 2 {
            return Err(Error::validation("a transaction requires at least 2 entries"));
        }

        let mut debit_total = Money::ZERO;
        let mut credit_total = Money::ZERO;
        for entry in &request.entries {
            if entry.amount.is_zero() || entry.amount.is_negative() {
                return Err(Error::validation("entry amounts must be positive and non-zero"));
            }
            if entry.currency != request.entries[0].currency {
                return Err(Error::validation("all entries in a transaction must share one currency"));
            }
            match entry.entry_type {
                EntryType::Debit => debit_total = debit_total + entry.amount,
                EntryType::Credit => credit_total = credit_total + entry.amount,
            }
        }

        if debit_total != credit_total {
            return Err(Error::validation(format!(
                "unbalanced transaction: debits {debit_total} != credits {credit_total}"
            )));
        }

        Ok(())
    }

    /// §4.L contract. Idempotent on `request.idempotency_key`: a completed
    /// transaction under this key is returned unchanged without
    /// re-validating or re-posting.
    pub async fn post_transaction(&self, request: PostTransactionRequest) -> Result<LedgerTransaction, Error> {
        if let Some(existing) = self
            .store
            .find_transaction_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            match existing.status {
                TransactionStatus::Completed => return Ok(existing),
                TransactionStatus::Failed => {
                    return Err(Error::conflict(format!(
                        "idempotency key {} previously failed; use a new key",
                        request.idempotency_key
                    )))
                }
                TransactionStatus::Pending => {
                    // Another caller is mid-post under this key. The store's
                    // unique constraint means our own post below will race
                    // safely onto the same row rather than double-insert.
                }
                TransactionStatus::Reversed => return Ok(existing),
            }
        }

        Self::validate(&request)?;

        for entry in &request.entries {
            if let Some(account) = self.store.get_account(entry.account_id).await? {
                if account.currency != entry.currency {
                    return Err(Error::validation(format!(
                        "entry currency {} does not match account currency {}",
                        entry.currency, account.currency
                    )));
                }
            } else {
                return Err(Error::not_found(format!("account {} not found", entry.account_id)));
            }
        }

        let new_txn = NewLedgerTransaction {
            user_id: request.user_id,
            transaction_type: request.transaction_type,
            idempotency_key: request.idempotency_key,
            reference_id: request.reference_id,
            reference_type: request.reference_type,
            metadata: request.metadata,
            entries: request.entries,
        };

        let transaction = self.store.post_transaction(new_txn).await?;
        log::info!(
            "posted ledger transaction {} type={} idempotency_key={}",
            transaction.id,
            transaction.transaction_type,
            transaction.idempotency_key
        );
        Ok(transaction)
    }

    /// Posts a `reversal` transaction with each original entry's
    /// debit/credit swapped, restoring every affected balance to its prior
    /// value (§8 "Round-trip" testable property; SPEC_FULL §4.L supplement).
    pub async fn reverse_transaction(
        &self,
        transaction_id: TransactionId,
        idempotency_key: String,
    ) -> Result<LedgerTransaction, Error> {
        if let Some(existing) = self.store.find_transaction_by_idempotency_key(&idempotency_key).await? {
            return Ok(existing);
        }

        let entries = self.store.get_entries(transaction_id).await?;
        if entries.is_empty() {
            return Err(Error::not_found(format!("transaction {transaction_id} has no entries to reverse")));
        }

        let reversed_entries: Vec<EntryRequest> = entries
            .iter()
            .map(|e| EntryRequest {
                account_id: e.account_id,
                entry_type: match e.entry_type {
                    EntryType::Debit => EntryType::Credit,
                    EntryType::Credit => EntryType::Debit,
                },
                amount: e.amount,
                currency: e.currency,
            })
            .collect();

        let request = PostTransactionRequest {
            user_id: None,
            transaction_type: TransactionType::Reversal,
            idempotency_key,
            reference_id: Some(transaction_id.to_string()),
            reference_type: Some("reversal_of".to_string()),
            metadata: serde_json::json!({}),
            entries: reversed_entries,
        };

        self.post_transaction(request).await
    }

    pub async fn get_balance(&self, account_id: AccountId) -> Result<Money, Error> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("account {account_id} not found")))?;
        Ok(account.balance)
    }

    pub async fn get_user_balances(&self, user_id: UserId, currency: Currency) -> Result<UserBalances, Error> {
        self.store.get_user_balances(user_id, currency).await
    }

    pub async fn get_system_buffers(&self, currency: Currency) -> Result<SystemBuffers, Error> {
        self.store.get_system_buffers(currency).await
    }

    pub async fn get_or_create_account(
        &self,
        user_id: Option<UserId>,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount, Error> {
        self.store.get_or_create_account(user_id, account_type, currency).await
    }
}

/// Convenience trait so callers (Allocation, Deposit, Bridge orchestrators)
/// can depend on "something that posts ledger transactions" without
/// pulling in the concrete `LedgerEngine` type — mirrors the
/// capability-record pattern from SPEC_FULL's design notes.
#[async_trait]
pub trait LedgerPort: Send + Sync {
    async fn post_transaction(&self, request: PostTransactionRequest) -> Result<LedgerTransaction, Error>;
    async fn get_or_create_account(
        &self,
        user_id: Option<UserId>,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount, Error>;
}

#[async_trait]
impl LedgerPort for LedgerEngine {
    async fn post_transaction(&self, request: PostTransactionRequest) -> Result<LedgerTransaction, Error> {
        LedgerEngine::post_transaction(self, request).await
    }

    async fn get_or_create_account(
        &self,
        user_id: Option<UserId>,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<LedgerAccount, Error> {
        LedgerEngine::get_or_create_account(self, user_id, account_type, currency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_store::memory::MemoryStorage;

    fn engine() -> LedgerEngine {
        LedgerEngine::new(Arc::new(MemoryStorage::new()))
    }

    fn money(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn rejects_single_entry_transaction() {
        let engine = engine();
        let account = engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc)
            .await
            .unwrap();
        let request = PostTransactionRequest {
            user_id: None,
            transaction_type: TransactionType::Deposit,
            idempotency_key: "k1".into(),
            reference_id: None,
            reference_type: None,
            metadata: serde_json::json!({}),
            entries: vec![EntryRequest {
                account_id: account.id,
                entry_type: EntryType::Credit,
                amount: money("10.00"),
                currency: Currency::Usdc,
            }],
        };
        let err = engine.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn rejects_unbalanced_transaction() {
        let engine = engine();
        let buffer = engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc)
            .await
            .unwrap();
        let user = UserId::new();
        let spending = engine
            .get_or_create_account(Some(user), AccountType::SpendingBalance, Currency::Usdc)
            .await
            .unwrap();

        let request = PostTransactionRequest {
            user_id: Some(user),
            transaction_type: TransactionType::Deposit,
            idempotency_key: "k2".into(),
            reference_id: None,
            reference_type: None,
            metadata: serde_json::json!({}),
            entries: vec![
                EntryRequest { account_id: buffer.id, entry_type: EntryType::Debit, amount: money("10.00"), currency: Currency::Usdc },
                EntryRequest { account_id: spending.id, entry_type: EntryType::Credit, amount: money("9.00"), currency: Currency::Usdc },
            ],
        };
        let err = engine.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn idempotent_replay_returns_same_transaction() {
        let engine = engine();
        let buffer = engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc)
            .await
            .unwrap();
        let user = UserId::new();
        let spending = engine
            .get_or_create_account(Some(user), AccountType::SpendingBalance, Currency::Usdc)
            .await
            .unwrap();

        let make_request = || PostTransactionRequest {
            user_id: Some(user),
            transaction_type: TransactionType::Deposit,
            idempotency_key: "k3".into(),
            reference_id: None,
            reference_type: None,
            metadata: serde_json::json!({}),
            entries: vec![
                EntryRequest { account_id: buffer.id, entry_type: EntryType::Debit, amount: money("10.00"), currency: Currency::Usdc },
                EntryRequest { account_id: spending.id, entry_type: EntryType::Credit, amount: money("10.00"), currency: Currency::Usdc },
            ],
        };

        let first = engine.post_transaction(make_request()).await.unwrap();
        let second = engine.post_transaction(make_request()).await.unwrap();
        assert_eq!(first.id, second.id);

        let balance = engine.get_balance(spending.id).await.unwrap();
        assert_eq!(balance, money("10.00"));
    }

    #[tokio::test]
    async fn negative_balance_is_rejected() {
        let engine = engine();
        let buffer = engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc)
            .await
            .unwrap();
        let user = UserId::new();
        let spending = engine
            .get_or_create_account(Some(user), AccountType::SpendingBalance, Currency::Usdc)
            .await
            .unwrap();

        let request = PostTransactionRequest {
            user_id: Some(user),
            transaction_type: TransactionType::Withdrawal,
            idempotency_key: "k4".into(),
            reference_id: None,
            reference_type: None,
            metadata: serde_json::json!({}),
            entries: vec![
                EntryRequest { account_id: spending.id, entry_type: EntryType::Debit, amount: money("5.00"), currency: Currency::Usdc },
                EntryRequest { account_id: buffer.id, entry_type: EntryType::Credit, amount: money("5.00"), currency: Currency::Usdc },
            ],
        };
        let err = engine.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn reversal_restores_prior_balances() {
        let engine = engine();
        let buffer = engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc, Currency::Usdc)
            .await
            .unwrap();
        let user = UserId::new();
        let spending = engine
            .get_or_create_account(Some(user), AccountType::SpendingBalance, Currency::Usdc)
            .await
            .unwrap();

        let deposit_request = PostTransactionRequest {
            user_id: Some(user),
            transaction_type: TransactionType::Deposit,
            idempotency_key: "k5".into(),
            reference_id: None,
            reference_type: None,
            metadata: serde_json::json!({}),
            entries: vec![
                EntryRequest { account_id: buffer.id, entry_type: EntryType::Debit, amount: money("25.00"), currency: Currency::Usdc },
                EntryRequest { account_id: spending.id, entry_type: EntryType::Credit, amount: money("25.00"), currency: Currency::Usdc },
            ],
        };
        let posted = engine.post_transaction(deposit_request).await.unwrap();
        assert_eq!(engine.get_balance(spending.id).await.unwrap(), money("25.00"));

        engine.reverse_transaction(posted.id, "k5:reversal".into()).await.unwrap();
        assert_eq!(engine.get_balance(spending.id).await.unwrap(), money("0"));
        assert_eq!(engine.get_balance(buffer.id).await.unwrap(), money("0"));
    }
}
