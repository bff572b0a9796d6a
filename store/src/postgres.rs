// Postgres-backed `Storage`. The in-memory backend in `memory.rs`
// reproduces the *contracts* this module actually enforces with SQL:
// unique constraints for idempotency (deposit tx_hash, ledger
// idempotency_key, idempotency_keys.key), `SELECT ... FOR UPDATE` for
// per-entity row locks (deposits, bridges), and `FOR UPDATE SKIP LOCKED`
// for worker job claiming (§5).
//
// All money columns are `NUMERIC` read through `rust_decimal`'s sqlx
// integration so nothing here ever touches a float.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use money_common::model::*;
use money_common::{
    AccountId, BridgeId, Currency, DepositId, Error, IdempotencyKey,
    ReconciliationExceptionId, ReconciliationReportId, TransactionId, UserId, WorkerJobId,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::str::FromStr;
use std::time::Duration;

use crate::repos::*;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| Error::service_unavailable(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `migrations/` against the pool. Called once at daemon startup,
    /// the same place `tos_daemon` opens its storage backend before
    /// anything else touches it.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::internal(format!("migration failed: {e}")))
    }
}

fn sql_err(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::RowNotFound => Error::not_found("row not found"),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::conflict(format!("unique constraint violated: {db}"))
        }
        other => Error::service_unavailable(format!("storage error: {other}")),
    }
}

fn parse_account_type(s: &str) -> Result<AccountType, Error> {
    AccountType::from_str(s).map_err(|_| Error::internal(format!("unknown account_type {s}")))
}

fn parse_currency(s: &str) -> Result<Currency, Error> {
    match s {
        "USDC" => Ok(Currency::Usdc),
        "USD" => Ok(Currency::Usd),
        other => Err(Error::internal(format!("unknown currency {other}"))),
    }
}

fn currency_code(c: Currency) -> &'static str {
    match c {
        Currency::Usdc => "USDC",
        Currency::Usd => "USD",
    }
}

#[async_trait]
impl LedgerRepository for PostgresStorage {
    async fn get_account(&self, id: AccountId) -> Result<Option<LedgerAccount>, Error> {
        let row = sqlx::query(
            "SELECT id, user_id, account_type, currency, balance FROM ledger_accounts WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;

        row.map(|r| {
            Ok(LedgerAccount {
                id: AccountId(r.try_get("id").map_err(sql_err)?),
                user_id: r.try_get::<Option<uuid::Uuid>, _>("user_id").map_err(sql_err)?.map(UserId),
                account_type: parse_account_type(r.try_get("account_type").map_err(sql_err)?)?,
                currency: parse_currency(r.try_get("currency").map_err(sql_err)?)?,
                balance: Money::new(r.try_get("balance").map_err(sql_err)?),
            })
        })
        .transpose()
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

        let row = sqlx::query(
            r#"
            INSERT INTO ledger_accounts (id, user_id, account_type, currency, balance)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (user_id, account_type, currency) DO UPDATE SET account_type = EXCLUDED.account_type
            RETURNING id, user_id, account_type, currency, balance
            "#,
        )
        .bind(AccountId::new().0)
        .bind(user_id.map(|u| u.0))
        .bind(account_type.to_string())
        .bind(currency_code(currency))
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;

        Ok(LedgerAccount {
            id: AccountId(row.try_get("id").map_err(sql_err)?),
            user_id: row.try_get::<Option<uuid::Uuid>, _>("user_id").map_err(sql_err)?.map(UserId),
            account_type,
            currency,
            balance: Money::new(row.try_get("balance").map_err(sql_err)?),
        })
    }

    async fn find_transaction_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerTransaction>, Error> {
        let row = sqlx::query(
            r#"SELECT id, transaction_type, status, idempotency_key, reference_id, reference_type,
                      metadata, completed_at, created_at
               FROM ledger_transactions WHERE idempotency_key = $1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;

        row.map(row_to_transaction).transpose()
    }

    async fn get_entries(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, Error> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, account_id, entry_type, amount, currency FROM ledger_entries WHERE transaction_id = $1",
        )
        .bind(transaction_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(LedgerEntry {
                    id: r.try_get("id").map_err(sql_err)?,
                    transaction_id,
                    account_id: AccountId(r.try_get("account_id").map_err(sql_err)?),
                    entry_type: r
                        .try_get::<String, _>("entry_type")
                        .map_err(sql_err)
                        .and_then(|s| EntryType::from_str(&s).map_err(|_| Error::internal("bad entry_type")))?,
                    amount: Money::new(r.try_get("amount").map_err(sql_err)?),
                    currency: parse_currency(r.try_get("currency").map_err(sql_err)?)?,
                })
            })
            .collect()
    }

    async fn post_transaction(&self, new_txn: NewLedgerTransaction) -> Result<LedgerTransaction, Error> {
        // Idempotency fast-path outside the write transaction: a completed
        // transaction under this key is returned unchanged (§4.L).
        if let Some(existing) = self.find_transaction_by_idempotency_key(&new_txn.idempotency_key).await? {
            return Ok(existing);
        }

        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        // Row-lock every touched account in ascending id order (§4.L,
        // §9 "per-account lock ordering") so two posts touching
        // overlapping accounts never deadlock.
        let mut account_ids: Vec<uuid::Uuid> = new_txn.entries.iter().map(|e| e.account_id.0).collect();
        account_ids.sort();
        account_ids.dedup();

        let mut balances = std::collections::HashMap::new();
        for id in &account_ids {
            let row = sqlx::query("SELECT balance FROM ledger_accounts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql_err)?
                .ok_or_else(|| Error::not_found(format!("account {id} not found")))?;
            balances.insert(*id, Money::new(row.try_get("balance").map_err(sql_err)?));
        }

        for entry in &new_txn.entries {
            let current = *balances.get(&entry.account_id.0).expect("locked above");
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
            balances.insert(entry.account_id.0, next);
        }

        for (id, balance) in &balances {
            sqlx::query("UPDATE ledger_accounts SET balance = $1 WHERE id = $2")
                .bind(balance.as_decimal())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(sql_err)?;
        }

        let txn_id = TransactionId::new();
        let now = Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO ledger_transactions
               (id, transaction_type, status, idempotency_key, reference_id, reference_type, metadata, completed_at, created_at)
               VALUES ($1, $2, 'completed', $3, $4, $5, $6, $7, $7)
               RETURNING id, transaction_type, status, idempotency_key, reference_id, reference_type, metadata, completed_at, created_at"#,
        )
        .bind(txn_id.0)
        .bind(new_txn.transaction_type.to_string())
        .bind(&new_txn.idempotency_key)
        .bind(&new_txn.reference_id)
        .bind(&new_txn.reference_type)
        .bind(&new_txn.metadata)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(sql_err)?;

        for entry in &new_txn.entries {
            sqlx::query(
                "INSERT INTO ledger_entries (id, transaction_id, account_id, entry_type, amount, currency) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(txn_id.0)
            .bind(entry.account_id.0)
            .bind(entry.entry_type.to_string())
            .bind(entry.amount.as_decimal())
            .bind(currency_code(entry.currency))
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        }

        tx.commit().await.map_err(sql_err)?;
        row_to_transaction(row)
    }

    async fn get_user_balances(&self, user_id: UserId, currency: Currency) -> Result<UserBalances, Error> {
        let rows = sqlx::query("SELECT account_type, balance FROM ledger_accounts WHERE user_id = $1 AND currency = $2")
            .bind(user_id.0)
            .bind(currency_code(currency))
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        let mut balances = UserBalances::default();
        for row in rows {
            let account_type = parse_account_type(row.try_get("account_type").map_err(sql_err)?)?;
            let balance = Money::new(row.try_get("balance").map_err(sql_err)?);
            match account_type {
                AccountType::UsdcBalance => balances.usdc_balance = balance,
                AccountType::FiatExposure => balances.fiat_exposure = balance,
                AccountType::PendingInvestment => balances.pending_investment = balance,
                AccountType::SpendingBalance => balances.spending_balance = balance,
                AccountType::StashBalance => balances.stash_balance = balance,
                _ => {}
            }
        }
        Ok(balances)
    }

    async fn get_system_buffers(&self, currency: Currency) -> Result<SystemBuffers, Error> {
        let rows = sqlx::query("SELECT account_type, balance FROM ledger_accounts WHERE user_id IS NULL AND currency = $1")
            .bind(currency_code(currency))
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        let mut buffers = SystemBuffers::default();
        for row in rows {
            let account_type = parse_account_type(row.try_get("account_type").map_err(sql_err)?)?;
            let balance = Money::new(row.try_get("balance").map_err(sql_err)?);
            match account_type {
                AccountType::SystemBufferUsdc => buffers.system_buffer_usdc = balance,
                AccountType::SystemBufferFiat => buffers.system_buffer_fiat = balance,
                AccountType::BrokerOperational => buffers.broker_operational = balance,
                _ => {}
            }
        }
        Ok(buffers)
    }

    async fn sum_account_balances(&self, account_type: AccountType, currency: Currency) -> Result<Money, Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(balance), 0) AS total FROM ledger_accounts WHERE user_id IS NOT NULL AND account_type = $1 AND currency = $2",
        )
        .bind(account_type.to_string())
        .bind(currency_code(currency))
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(Money::new(row.try_get("total").map_err(sql_err)?))
    }
}

fn row_to_transaction(row: sqlx::postgres::PgRow) -> Result<LedgerTransaction, Error> {
    Ok(LedgerTransaction {
        id: TransactionId(row.try_get("id").map_err(sql_err)?),
        transaction_type: TransactionType::from_str(row.try_get("transaction_type").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad transaction_type"))?,
        status: TransactionStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad status"))?,
        idempotency_key: row.try_get("idempotency_key").map_err(sql_err)?,
        reference_id: row.try_get("reference_id").map_err(sql_err)?,
        reference_type: row.try_get("reference_type").map_err(sql_err)?,
        metadata: row.try_get("metadata").map_err(sql_err)?,
        completed_at: row.try_get("completed_at").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl DepositRepository for PostgresStorage {
    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Deposit>, Error> {
        let row = sqlx::query("SELECT * FROM deposits WHERE tx_hash = $1")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_deposit).transpose()
    }

    async fn get_deposit(&self, id: DepositId) -> Result<Option<Deposit>, Error> {
        let row = sqlx::query("SELECT * FROM deposits WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_deposit).transpose()
    }

    async fn create_deposit(&self, deposit: Deposit) -> Result<Deposit, Error> {
        sqlx::query(
            r#"INSERT INTO deposits
               (id, user_id, chain, tx_hash, token, amount, status, virtual_account_id,
                off_ramp_tx_id, broker_funding_tx_id, error_message, created_at,
                confirmed_at, off_ramp_initiated_at, off_ramp_completed_at, broker_funded_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)"#,
        )
        .bind(deposit.id.0)
        .bind(deposit.user_id.0)
        .bind(&deposit.chain)
        .bind(&deposit.tx_hash)
        .bind(&deposit.token)
        .bind(deposit.amount.as_decimal())
        .bind(deposit.status.to_string())
        .bind(&deposit.virtual_account_id)
        .bind(&deposit.off_ramp_tx_id)
        .bind(&deposit.broker_funding_tx_id)
        .bind(&deposit.error_message)
        .bind(deposit.created_at)
        .bind(deposit.confirmed_at)
        .bind(deposit.off_ramp_initiated_at)
        .bind(deposit.off_ramp_completed_at)
        .bind(deposit.broker_funded_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(deposit)
    }

    async fn update_deposit(&self, id: DepositId, expected_status: DepositStatus, updated: Deposit) -> Result<Deposit, Error> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row = sqlx::query("SELECT status FROM deposits WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| Error::not_found("deposit not found"))?;
        let current: String = row.try_get("status").map_err(sql_err)?;
        if current != expected_status.to_string() {
            return Err(Error::conflict(format!(
                "deposit {id} expected status {expected_status} but was {current}"
            )));
        }

        sqlx::query(
            r#"UPDATE deposits SET status=$2, virtual_account_id=$3, off_ramp_tx_id=$4,
               broker_funding_tx_id=$5, error_message=$6, confirmed_at=$7,
               off_ramp_initiated_at=$8, off_ramp_completed_at=$9, broker_funded_at=$10
               WHERE id=$1"#,
        )
        .bind(id.0)
        .bind(updated.status.to_string())
        .bind(&updated.virtual_account_id)
        .bind(&updated.off_ramp_tx_id)
        .bind(&updated.broker_funding_tx_id)
        .bind(&updated.error_message)
        .bind(updated.confirmed_at)
        .bind(updated.off_ramp_initiated_at)
        .bind(updated.off_ramp_completed_at)
        .bind(updated.broker_funded_at)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;

        tx.commit().await.map_err(sql_err)?;
        Ok(updated)
    }

    async fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Deposit>, Error> {
        let rows = sqlx::query("SELECT * FROM deposits WHERE status = 'pending' AND created_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_deposit).collect()
    }

    async fn list_by_statuses(&self, statuses: &[DepositStatus]) -> Result<Vec<Deposit>, Error> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query("SELECT * FROM deposits WHERE status = ANY($1)")
            .bind(&status_strs)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_deposit).collect()
    }

    async fn list_for_user(&self, user_id: UserId, limit: u32, cursor: Option<DepositId>) -> Result<Vec<Deposit>, Error> {
        let rows = match cursor {
            None => sqlx::query(
                "SELECT * FROM deposits WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            )
            .bind(user_id.0)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?,
            Some(cursor_id) => sqlx::query(
                r#"SELECT * FROM deposits WHERE user_id = $1
                   AND (created_at, id) < (SELECT created_at, id FROM deposits WHERE id = $3)
                   ORDER BY created_at DESC, id DESC LIMIT $2"#,
            )
            .bind(user_id.0)
            .bind(limit as i64)
            .bind(cursor_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?,
        };
        rows.into_iter().map(row_to_deposit).collect()
    }
}

fn row_to_deposit(row: sqlx::postgres::PgRow) -> Result<Deposit, Error> {
    Ok(Deposit {
        id: DepositId(row.try_get("id").map_err(sql_err)?),
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        chain: row.try_get("chain").map_err(sql_err)?,
        tx_hash: row.try_get("tx_hash").map_err(sql_err)?,
        token: row.try_get("token").map_err(sql_err)?,
        amount: Money::new(row.try_get("amount").map_err(sql_err)?),
        status: DepositStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad deposit status"))?,
        virtual_account_id: row.try_get("virtual_account_id").map_err(sql_err)?,
        off_ramp_tx_id: row.try_get("off_ramp_tx_id").map_err(sql_err)?,
        broker_funding_tx_id: row.try_get("broker_funding_tx_id").map_err(sql_err)?,
        error_message: row.try_get("error_message").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
        confirmed_at: row.try_get("confirmed_at").map_err(sql_err)?,
        off_ramp_initiated_at: row.try_get("off_ramp_initiated_at").map_err(sql_err)?,
        off_ramp_completed_at: row.try_get("off_ramp_completed_at").map_err(sql_err)?,
        broker_funded_at: row.try_get("broker_funded_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl BridgeRepository for PostgresStorage {
    async fn get_bridge(&self, id: BridgeId) -> Result<Option<BridgeTransaction>, Error> {
        let row = sqlx::query("SELECT * FROM bridge_transactions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_bridge).transpose()
    }

    async fn create_bridge(&self, bridge: BridgeTransaction) -> Result<BridgeTransaction, Error> {
        sqlx::query(
            r#"INSERT INTO bridge_transactions
               (id, user_id, source_chain, dest_chain, amount, dest_address, status,
                source_tx_hash, message_hash, attestation, dest_tx_hash, error_message,
                created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$13)"#,
        )
        .bind(bridge.id.0)
        .bind(bridge.user_id.0)
        .bind(&bridge.source_chain)
        .bind(&bridge.dest_chain)
        .bind(bridge.amount.as_decimal())
        .bind(&bridge.dest_address)
        .bind(bridge.status.to_string())
        .bind(&bridge.source_tx_hash)
        .bind(&bridge.message_hash)
        .bind(&bridge.attestation)
        .bind(&bridge.dest_tx_hash)
        .bind(&bridge.error_message)
        .bind(bridge.created_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(bridge)
    }

    async fn update_bridge(&self, id: BridgeId, expected_status: BridgeStatus, updated: BridgeTransaction) -> Result<BridgeTransaction, Error> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row = sqlx::query("SELECT status FROM bridge_transactions WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| Error::not_found("bridge not found"))?;
        let current: String = row.try_get("status").map_err(sql_err)?;
        if current != expected_status.to_string() {
            return Err(Error::conflict(format!(
                "bridge {id} expected status {expected_status} but was {current}"
            )));
        }

        sqlx::query(
            r#"UPDATE bridge_transactions SET status=$2, source_tx_hash=$3, message_hash=$4,
               attestation=$5, dest_tx_hash=$6, error_message=$7, updated_at=$8 WHERE id=$1"#,
        )
        .bind(id.0)
        .bind(updated.status.to_string())
        .bind(&updated.source_tx_hash)
        .bind(&updated.message_hash)
        .bind(&updated.attestation)
        .bind(&updated.dest_tx_hash)
        .bind(&updated.error_message)
        .bind(updated.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;

        tx.commit().await.map_err(sql_err)?;
        Ok(updated)
    }

    async fn list_bridges_by_statuses(&self, statuses: &[BridgeStatus]) -> Result<Vec<BridgeTransaction>, Error> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query("SELECT * FROM bridge_transactions WHERE status = ANY($1)")
            .bind(&status_strs)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_bridge).collect()
    }
}

fn row_to_bridge(row: sqlx::postgres::PgRow) -> Result<BridgeTransaction, Error> {
    Ok(BridgeTransaction {
        id: BridgeId(row.try_get("id").map_err(sql_err)?),
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        source_chain: row.try_get("source_chain").map_err(sql_err)?,
        dest_chain: row.try_get("dest_chain").map_err(sql_err)?,
        amount: Money::new(row.try_get("amount").map_err(sql_err)?),
        dest_address: row.try_get("dest_address").map_err(sql_err)?,
        status: BridgeStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad bridge status"))?,
        source_tx_hash: row.try_get("source_tx_hash").map_err(sql_err)?,
        message_hash: row.try_get("message_hash").map_err(sql_err)?,
        attestation: row.try_get("attestation").map_err(sql_err)?,
        dest_tx_hash: row.try_get("dest_tx_hash").map_err(sql_err)?,
        error_message: row.try_get("error_message").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
        updated_at: row.try_get("updated_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl WithdrawalRepository for PostgresStorage {
    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, Error> {
        let row = sqlx::query("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_withdrawal).transpose()
    }

    async fn create_withdrawal(&self, withdrawal: Withdrawal) -> Result<Withdrawal, Error> {
        sqlx::query(
            r#"INSERT INTO withdrawals
               (id, user_id, amount, bank_rail_payment_intent_id, status, error_message, created_at, completed_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(withdrawal.id.0)
        .bind(withdrawal.user_id.0)
        .bind(withdrawal.amount.as_decimal())
        .bind(&withdrawal.bank_rail_payment_intent_id)
        .bind(withdrawal.status.to_string())
        .bind(&withdrawal.error_message)
        .bind(withdrawal.created_at)
        .bind(withdrawal.completed_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(withdrawal)
    }

    async fn update_withdrawal(
        &self,
        id: WithdrawalId,
        expected_status: WithdrawalStatus,
        updated: Withdrawal,
    ) -> Result<Withdrawal, Error> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let row = sqlx::query("SELECT status FROM withdrawals WHERE id = $1 FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sql_err)?
            .ok_or_else(|| Error::not_found("withdrawal not found"))?;
        let current: String = row.try_get("status").map_err(sql_err)?;
        if current != expected_status.to_string() {
            return Err(Error::conflict(format!(
                "withdrawal {id} expected status {expected_status} but was {current}"
            )));
        }

        sqlx::query(
            r#"UPDATE withdrawals SET status=$2, bank_rail_payment_intent_id=$3,
               error_message=$4, completed_at=$5 WHERE id=$1"#,
        )
        .bind(id.0)
        .bind(updated.status.to_string())
        .bind(&updated.bank_rail_payment_intent_id)
        .bind(&updated.error_message)
        .bind(updated.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;

        tx.commit().await.map_err(sql_err)?;
        Ok(updated)
    }

    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus) -> Result<Vec<Withdrawal>, Error> {
        let rows = sqlx::query("SELECT * FROM withdrawals WHERE status = $1")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_withdrawal).collect()
    }
}

fn row_to_withdrawal(row: sqlx::postgres::PgRow) -> Result<Withdrawal, Error> {
    Ok(Withdrawal {
        id: WithdrawalId(row.try_get("id").map_err(sql_err)?),
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        amount: Money::new(row.try_get("amount").map_err(sql_err)?),
        bank_rail_payment_intent_id: row.try_get("bank_rail_payment_intent_id").map_err(sql_err)?,
        status: WithdrawalStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad withdrawal status"))?,
        error_message: row.try_get("error_message").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
        completed_at: row.try_get("completed_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl AllocationRepository for PostgresStorage {
    async fn get_mode(&self, user_id: UserId) -> Result<Option<SmartAllocationMode>, Error> {
        let row = sqlx::query("SELECT * FROM smart_allocation_modes WHERE user_id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_mode).transpose()
    }

    async fn upsert_mode(&self, mode: SmartAllocationMode) -> Result<SmartAllocationMode, Error> {
        sqlx::query(
            r#"INSERT INTO smart_allocation_modes (user_id, active, ratio_spending, ratio_stash, paused_at, resumed_at)
               VALUES ($1,$2,$3,$4,$5,$6)
               ON CONFLICT (user_id) DO UPDATE SET
                 active = EXCLUDED.active, ratio_spending = EXCLUDED.ratio_spending,
                 ratio_stash = EXCLUDED.ratio_stash, paused_at = EXCLUDED.paused_at,
                 resumed_at = EXCLUDED.resumed_at"#,
        )
        .bind(mode.user_id.0)
        .bind(mode.active)
        .bind(mode.ratio_spending)
        .bind(mode.ratio_stash)
        .bind(mode.paused_at)
        .bind(mode.resumed_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(mode)
    }

    async fn insert_event(&self, event: AllocationEvent) -> Result<AllocationEvent, Error> {
        sqlx::query(
            r#"INSERT INTO allocation_events
               (id, user_id, total_amount, stash_amount, spending_amount, event_type, source_tx_id, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(event.id.0)
        .bind(event.user_id.0)
        .bind(event.total_amount.as_decimal())
        .bind(event.stash_amount.as_decimal())
        .bind(event.spending_amount.as_decimal())
        .bind(event.event_type.to_string())
        .bind(&event.source_tx_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(event)
    }

    async fn list_events_in_range(&self, user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AllocationEvent>, Error> {
        let rows = sqlx::query("SELECT * FROM allocation_events WHERE user_id = $1 AND created_at >= $2 AND created_at < $3")
            .bind(user_id.0)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn record_decline(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("INSERT INTO allocation_declines (id, user_id, declined_at) VALUES ($1,$2,$3)")
            .bind(uuid::Uuid::new_v4())
            .bind(user_id.0)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn count_declines_in_range(&self, user_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u32, Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM allocation_declines WHERE user_id = $1 AND declined_at >= $2 AND declined_at < $3")
            .bind(user_id.0)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?;
        let n: i64 = row.try_get("n").map_err(sql_err)?;
        Ok(n as u32)
    }

    async fn upsert_weekly_summary(&self, summary: WeeklyAllocationSummary) -> Result<WeeklyAllocationSummary, Error> {
        sqlx::query(
            r#"INSERT INTO weekly_allocation_summaries
               (user_id, week_start, week_end, total_income, stash_added, spending_added, spending_used, declines_count, mode_active_days)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
               ON CONFLICT (user_id, week_start) DO UPDATE SET
                 week_end = EXCLUDED.week_end, total_income = EXCLUDED.total_income,
                 stash_added = EXCLUDED.stash_added, spending_added = EXCLUDED.spending_added,
                 spending_used = EXCLUDED.spending_used, declines_count = EXCLUDED.declines_count,
                 mode_active_days = EXCLUDED.mode_active_days"#,
        )
        .bind(summary.user_id.0)
        .bind(summary.week_start)
        .bind(summary.week_end)
        .bind(summary.total_income.as_decimal())
        .bind(summary.stash_added.as_decimal())
        .bind(summary.spending_added.as_decimal())
        .bind(summary.spending_used.as_decimal())
        .bind(summary.declines_count as i32)
        .bind(summary.mode_active_days as i16)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(summary)
    }

    async fn get_weekly_summary(&self, user_id: UserId, week_start: NaiveDate) -> Result<Option<WeeklyAllocationSummary>, Error> {
        let row = sqlx::query("SELECT * FROM weekly_allocation_summaries WHERE user_id = $1 AND week_start = $2")
            .bind(user_id.0)
            .bind(week_start)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_summary).transpose()
    }
}

fn row_to_mode(row: sqlx::postgres::PgRow) -> Result<SmartAllocationMode, Error> {
    Ok(SmartAllocationMode {
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        active: row.try_get("active").map_err(sql_err)?,
        ratio_spending: row.try_get("ratio_spending").map_err(sql_err)?,
        ratio_stash: row.try_get("ratio_stash").map_err(sql_err)?,
        paused_at: row.try_get("paused_at").map_err(sql_err)?,
        resumed_at: row.try_get("resumed_at").map_err(sql_err)?,
    })
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<AllocationEvent, Error> {
    Ok(AllocationEvent {
        id: AllocationEventId(row.try_get("id").map_err(sql_err)?),
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        total_amount: Money::new(row.try_get("total_amount").map_err(sql_err)?),
        stash_amount: Money::new(row.try_get("stash_amount").map_err(sql_err)?),
        spending_amount: Money::new(row.try_get("spending_amount").map_err(sql_err)?),
        event_type: AllocationEventType::from_str(row.try_get("event_type").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad event_type"))?,
        source_tx_id: row.try_get("source_tx_id").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
    })
}

fn row_to_summary(row: sqlx::postgres::PgRow) -> Result<WeeklyAllocationSummary, Error> {
    Ok(WeeklyAllocationSummary {
        user_id: UserId(row.try_get("user_id").map_err(sql_err)?),
        week_start: row.try_get("week_start").map_err(sql_err)?,
        week_end: row.try_get("week_end").map_err(sql_err)?,
        total_income: Money::new(row.try_get("total_income").map_err(sql_err)?),
        stash_added: Money::new(row.try_get("stash_added").map_err(sql_err)?),
        spending_added: Money::new(row.try_get("spending_added").map_err(sql_err)?),
        spending_used: Money::new(row.try_get("spending_used").map_err(sql_err)?),
        declines_count: row.try_get::<i32, _>("declines_count").map_err(sql_err)? as u32,
        mode_active_days: row.try_get::<i16, _>("mode_active_days").map_err(sql_err)? as u8,
    })
}

#[async_trait]
impl WorkerJobRepository for PostgresStorage {
    async fn enqueue(&self, job: WorkerJob) -> Result<WorkerJob, Error> {
        sqlx::query(
            r#"INSERT INTO worker_jobs
               (id, job_type, subject, status, attempt_count, max_attempts, next_retry_at,
                started_at, completed_at, error_message, payload, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)"#,
        )
        .bind(job.id.0)
        .bind(&job.job_type)
        .bind(&job.subject)
        .bind(job.status.to_string())
        .bind(job.attempt_count as i32)
        .bind(job.max_attempts as i32)
        .bind(job.next_retry_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error_message)
        .bind(&job.payload)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(job)
    }

    async fn get_job(&self, id: WorkerJobId) -> Result<Option<WorkerJob>, Error> {
        let row = sqlx::query("SELECT * FROM worker_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_job).transpose()
    }

    async fn claim_batch(&self, job_type: &str, batch_size: u32, now: DateTime<Utc>) -> Result<Vec<WorkerJob>, Error> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        // SELECT ... FOR UPDATE SKIP LOCKED: two workers racing for the
        // same batch never double-claim a job (§5).
        let rows = sqlx::query(
            r#"SELECT id FROM worker_jobs
               WHERE job_type = $1
                 AND (status = 'queued' OR (status = 'retry' AND next_retry_at <= $2))
               ORDER BY created_at
               LIMIT $3
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(job_type)
        .bind(now)
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(sql_err)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row.try_get("id").map_err(sql_err)?;
            let updated = sqlx::query(
                r#"UPDATE worker_jobs SET status='in_progress', attempt_count = attempt_count + 1, started_at = $2
                   WHERE id = $1 RETURNING *"#,
            )
            .bind(id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(sql_err)?;
            claimed.push(row_to_job(updated)?);
        }

        tx.commit().await.map_err(sql_err)?;
        Ok(claimed)
    }

    async fn mark_completed(&self, id: WorkerJobId, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE worker_jobs SET status='completed', completed_at=$2 WHERE id=$1")
            .bind(id.0)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn mark_retry(&self, id: WorkerJobId, next_retry_at: DateTime<Utc>, error_message: String) -> Result<(), Error> {
        sqlx::query("UPDATE worker_jobs SET status='retry', next_retry_at=$2, error_message=$3 WHERE id=$1")
            .bind(id.0)
            .bind(next_retry_at)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: WorkerJobId, error_message: String) -> Result<(), Error> {
        sqlx::query("UPDATE worker_jobs SET status='failed', error_message=$2 WHERE id=$1")
            .bind(id.0)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn reclaim_stuck(&self, job_type: &str, claim_timeout: chrono::Duration, now: DateTime<Utc>) -> Result<u32, Error> {
        let cutoff = now - claim_timeout;
        let result = sqlx::query(
            r#"UPDATE worker_jobs SET status='retry', next_retry_at=$3
               WHERE job_type=$1 AND status='in_progress' AND started_at < $2"#,
        )
        .bind(job_type)
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(result.rows_affected() as u32)
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<WorkerJob, Error> {
    Ok(WorkerJob {
        id: WorkerJobId(row.try_get("id").map_err(sql_err)?),
        job_type: row.try_get("job_type").map_err(sql_err)?,
        subject: row.try_get("subject").map_err(sql_err)?,
        status: WorkerJobStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad job status"))?,
        attempt_count: row.try_get::<i32, _>("attempt_count").map_err(sql_err)? as u32,
        max_attempts: row.try_get::<i32, _>("max_attempts").map_err(sql_err)? as u32,
        next_retry_at: row.try_get("next_retry_at").map_err(sql_err)?,
        started_at: row.try_get("started_at").map_err(sql_err)?,
        completed_at: row.try_get("completed_at").map_err(sql_err)?,
        error_message: row.try_get("error_message").map_err(sql_err)?,
        payload: row.try_get("payload").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl AuditLogRepository for PostgresStorage {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), Error> {
        sqlx::query(
            r#"INSERT INTO audit_log (id, resource_type, resource_id, before, after, error_classification, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7)"#,
        )
        .bind(entry.id)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(entry.error_classification.map(|c| match c {
            ErrorClassification::Retryable => "retryable",
            ErrorClassification::Terminal => "terminal",
        }))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn list_for_resource(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditLogEntry>, Error> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE resource_type = $1 AND resource_id = $2 ORDER BY created_at")
            .bind(resource_type)
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        rows.into_iter()
            .map(|row| {
                let classification: Option<String> = row.try_get("error_classification").map_err(sql_err)?;
                Ok(AuditLogEntry {
                    id: row.try_get("id").map_err(sql_err)?,
                    resource_type: row.try_get("resource_type").map_err(sql_err)?,
                    resource_id: row.try_get("resource_id").map_err(sql_err)?,
                    before: row.try_get("before").map_err(sql_err)?,
                    after: row.try_get("after").map_err(sql_err)?,
                    error_classification: classification.map(|c| match c.as_str() {
                        "retryable" => ErrorClassification::Retryable,
                        _ => ErrorClassification::Terminal,
                    }),
                    created_at: row.try_get("created_at").map_err(sql_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresStorage {
    async fn try_insert_placeholder(
        &self,
        key: &IdempotencyKey,
        path: &str,
        method: &str,
        request_hash: &str,
        user_id: Option<UserId>,
        expires_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, Error> {
        let inserted = sqlx::query(
            r#"INSERT INTO idempotency_keys
               (key, path, method, request_hash, user_id, response_status, response_body, in_progress, created_at, expires_at)
               VALUES ($1,$2,$3,$4,$5,0,''::bytea,true,now(),$6)
               ON CONFLICT (key) DO NOTHING"#,
        )
        .bind(key.as_str())
        .bind(path)
        .bind(method)
        .bind(request_hash)
        .bind(user_id.map(|u| u.0))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        if inserted.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        let existing = self
            .get(key)
            .await?
            .ok_or_else(|| Error::internal("idempotency insert raced but row vanished"))?;
        Ok(InsertOutcome::Existing(existing))
    }

    async fn complete(&self, key: &IdempotencyKey, response_status: u16, response_body: Vec<u8>) -> Result<IdempotencyRecord, Error> {
        let row = sqlx::query(
            r#"UPDATE idempotency_keys SET in_progress=false, response_status=$2, response_body=$3
               WHERE key = $1 RETURNING *"#,
        )
        .bind(key.as_str())
        .bind(response_status as i32)
        .bind(response_body)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?
        .ok_or_else(|| Error::not_found("idempotency key not found"))?;
        row_to_idempotency(row)
    }

    async fn get_idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, Error> {
        let row = sqlx::query("SELECT * FROM idempotency_keys WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(row_to_idempotency).transpose()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(result.rows_affected())
    }
}

fn row_to_idempotency(row: sqlx::postgres::PgRow) -> Result<IdempotencyRecord, Error> {
    Ok(IdempotencyRecord {
        key: IdempotencyKey(row.try_get("key").map_err(sql_err)?),
        path: row.try_get("path").map_err(sql_err)?,
        method: row.try_get("method").map_err(sql_err)?,
        request_hash: row.try_get("request_hash").map_err(sql_err)?,
        user_id: row.try_get::<Option<uuid::Uuid>, _>("user_id").map_err(sql_err)?.map(UserId),
        response_status: row.try_get::<i32, _>("response_status").map_err(sql_err)? as u16,
        response_body: row.try_get("response_body").map_err(sql_err)?,
        in_progress: row.try_get("in_progress").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
        expires_at: row.try_get("expires_at").map_err(sql_err)?,
    })
}

#[async_trait]
impl ReconciliationRepository for PostgresStorage {
    async fn create_report(&self, run_type: RunType) -> Result<ReconciliationReport, Error> {
        let row = sqlx::query(
            r#"INSERT INTO reconciliation_reports (id, run_type, status, checks_passed, checks_failed, exceptions_count, created_at)
               VALUES ($1,$2,'pending',0,0,0,now()) RETURNING *"#,
        )
        .bind(ReconciliationReportId::new().0)
        .bind(run_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        row_to_report(row)
    }

    async fn complete_report(
        &self,
        id: ReconciliationReportId,
        checks_passed: u32,
        checks_failed: u32,
        exceptions_count: u32,
    ) -> Result<ReconciliationReport, Error> {
        let row = sqlx::query(
            r#"UPDATE reconciliation_reports SET status='completed', checks_passed=$2, checks_failed=$3,
               exceptions_count=$4, completed_at=now() WHERE id=$1 RETURNING *"#,
        )
        .bind(id.0)
        .bind(checks_passed as i32)
        .bind(checks_failed as i32)
        .bind(exceptions_count as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?
        .ok_or_else(|| Error::not_found("report not found"))?;
        row_to_report(row)
    }

    async fn insert_exceptions(&self, exceptions: Vec<ReconciliationException>) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        for exception in exceptions {
            sqlx::query(
                r#"INSERT INTO reconciliation_exceptions
                   (id, report_id, check_name, difference, severity, description, resolved, resolved_by, resolution_note, created_at)
                   VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"#,
            )
            .bind(exception.id.0)
            .bind(exception.report_id.0)
            .bind(&exception.check_name)
            .bind(exception.difference.as_decimal())
            .bind(exception.severity.to_string())
            .bind(&exception.description)
            .bind(exception.resolved)
            .bind(&exception.resolved_by)
            .bind(&exception.resolution_note)
            .bind(exception.created_at)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        }
        tx.commit().await.map_err(sql_err)?;
        Ok(())
    }

    async fn resolve_exception(&self, id: ReconciliationExceptionId, resolved_by: &str, note: &str) -> Result<(), Error> {
        sqlx::query("UPDATE reconciliation_exceptions SET resolved=true, resolved_by=$2, resolution_note=$3 WHERE id=$1")
            .bind(id.0)
            .bind(resolved_by)
            .bind(note)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn list_open_exceptions(&self) -> Result<Vec<ReconciliationException>, Error> {
        let rows = sqlx::query("SELECT * FROM reconciliation_exceptions WHERE resolved = false")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        rows.into_iter().map(row_to_exception).collect()
    }
}

fn row_to_report(row: sqlx::postgres::PgRow) -> Result<ReconciliationReport, Error> {
    Ok(ReconciliationReport {
        id: ReconciliationReportId(row.try_get("id").map_err(sql_err)?),
        run_type: RunType::from_str(row.try_get("run_type").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad run_type"))?,
        status: ReportStatus::from_str(row.try_get("status").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad report status"))?,
        checks_passed: row.try_get::<i32, _>("checks_passed").map_err(sql_err)? as u32,
        checks_failed: row.try_get::<i32, _>("checks_failed").map_err(sql_err)? as u32,
        exceptions_count: row.try_get::<i32, _>("exceptions_count").map_err(sql_err)? as u32,
        created_at: row.try_get("created_at").map_err(sql_err)?,
        completed_at: row.try_get("completed_at").map_err(sql_err)?,
    })
}

fn row_to_exception(row: sqlx::postgres::PgRow) -> Result<ReconciliationException, Error> {
    Ok(ReconciliationException {
        id: ReconciliationExceptionId(row.try_get("id").map_err(sql_err)?),
        report_id: ReconciliationReportId(row.try_get("report_id").map_err(sql_err)?),
        check_name: row.try_get("check_name").map_err(sql_err)?,
        difference: Money::new(row.try_get("difference").map_err(sql_err)?),
        severity: Severity::from_str(row.try_get("severity").map_err(sql_err)?)
            .map_err(|_| Error::internal("bad severity"))?,
        description: row.try_get("description").map_err(sql_err)?,
        resolved: row.try_get("resolved").map_err(sql_err)?,
        resolved_by: row.try_get("resolved_by").map_err(sql_err)?,
        resolution_note: row.try_get("resolution_note").map_err(sql_err)?,
        created_at: row.try_get("created_at").map_err(sql_err)?,
    })
}
