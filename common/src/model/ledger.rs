use crate::{AccountId, Currency, Money, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountType {
    SpendingBalance,
    StashBalance,
    FiatExposure,
    PendingInvestment,
    UsdcBalance,
    SystemBufferUsdc,
    SystemBufferFiat,
    BrokerOperational,
}

impl AccountType {
    /// User-scoped account types require a `user_id`; system-scoped ones forbid it.
    pub fn is_user_scoped(self) -> bool {
        !matches!(
            self,
            AccountType::SystemBufferUsdc | AccountType::SystemBufferFiat | AccountType::BrokerOperational
        )
    }
}

#[derive(Debug, Clone)]
pub struct LedgerAccount {
    pub id: AccountId,
    pub user_id: Option<UserId>,
    pub account_type: AccountType,
    pub currency: Currency,
    pub balance: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Investment,
    Conversion,
    InternalTransfer,
    BufferReplenishment,
    Reversal,
    CardPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Reversed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryType {
    Debit,
    Credit,
}

#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub idempotency_key: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub metadata: Value,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: uuid::Uuid,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Money,
    pub currency: Currency,
}

/// One requested debit or credit, part of a `PostTransactionRequest`.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Money,
    pub currency: Currency,
}

#[derive(Debug, Clone)]
pub struct PostTransactionRequest {
    pub user_id: Option<UserId>,
    pub transaction_type: TransactionType,
    pub idempotency_key: String,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub metadata: Value,
    pub entries: Vec<EntryRequest>,
}

/// Balance projection returned by `GetUserBalances`.
#[derive(Debug, Clone, Default)]
pub struct UserBalances {
    pub usdc_balance: Money,
    pub fiat_exposure: Money,
    pub pending_investment: Money,
    pub spending_balance: Money,
    pub stash_balance: Money,
}

#[derive(Debug, Clone, Default)]
pub struct SystemBuffers {
    pub system_buffer_usdc: Money,
    pub system_buffer_fiat: Money,
    pub broker_operational: Money,
}
