// The process's capability record (SPEC_FULL "Design Notes" / §9
// "service-to-repository object graphs"): every handler and background
// task is handed this instead of reaching for ambient global state.

use crate::config::Config;
use chrono::Duration as ChronoDuration;
use money_adapters::attestation::AttestationAdapter;
use money_adapters::bank_rail::BankRailAdapter;
use money_adapters::brokerage::BrokerageAdapter;
use money_adapters::custodian::CustodianAdapter;
use money_adapters::secret::SecretCipher;
use money_adapters::HttpAdapterConfig;
use money_allocation::AllocationEngine;
use money_bridge::BridgeOrchestrator;
use money_common::{Clock, Error, SystemClock};
use money_deposit::DepositOrchestrator;
use money_idempotency::IdempotencyGate;
use money_ledger::{LedgerEngine, LedgerPort};
use money_reconciliation::ReconciliationConfig;
use money_store::memory::MemoryStorage;
use money_store::postgres::PostgresStorage;
use money_store::Storage;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<LedgerEngine>,
    pub ledger_port: Arc<dyn LedgerPort>,
    pub allocation: Arc<AllocationEngine>,
    pub deposit: Arc<DepositOrchestrator>,
    pub bridge: Arc<BridgeOrchestrator>,
    pub idempotency: Arc<IdempotencyGate>,
    pub custodian: Arc<CustodianAdapter>,
    pub attestation: Arc<AttestationAdapter>,
    pub bank_rail: Arc<BankRailAdapter>,
    pub brokerage: Arc<BrokerageAdapter>,
    pub secret_cipher: Arc<SecretCipher>,
    pub reconciliation_config: ReconciliationConfig,
    pub chain_deposit_webhook_secret: String,
    pub default_ratio_spending: Decimal,
    pub default_ratio_stash: Decimal,
}

impl AppState {
    pub async fn bootstrap(config: &Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn Storage> = match config.storage_backend.as_str() {
            "postgres" => {
                let pg = PostgresStorage::connect(&config.database_url, config.db_max_connections).await?;
                pg.migrate().await?;
                Arc::new(pg)
            }
            "memory" => Arc::new(MemoryStorage::new()),
            other => anyhow::bail!("unknown MONEY_STORAGE_BACKEND {other:?}, expected memory or postgres"),
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(LedgerEngine::new(store.clone()));
        let ledger_port: Arc<dyn LedgerPort> = ledger.clone();

        let allocation = Arc::new(AllocationEngine::new(store.clone(), ledger_port.clone(), clock.clone()));

        let http_config = HttpAdapterConfig::default();
        let custodian = Arc::new(CustodianAdapter::new(
            config.custodian_base_url.clone(),
            config.custodian_api_key.clone(),
            http_config.clone(),
        ));
        let attestation = Arc::new(AttestationAdapter::new(config.attestation_base_url.clone(), http_config.clone()));
        let secret_cipher = Arc::new(SecretCipher::new(&config.secret_aes_key()?));
        let bank_rail = Arc::new(BankRailAdapter::new(
            config.bank_rail_base_url.clone(),
            config.bank_rail_api_key.clone(),
            http_config.clone(),
            secret_cipher.clone(),
        ));
        let brokerage = Arc::new(BrokerageAdapter::new(
            config.brokerage_base_url.clone(),
            config.brokerage_api_key.clone(),
            http_config.clone(),
        ));

        let deposit = Arc::new(DepositOrchestrator::new(
            store.clone(),
            allocation.clone(),
            ledger_port.clone(),
            brokerage.clone(),
            clock.clone(),
            ChronoDuration::seconds(config.deposit_expiry_secs as i64),
        ));

        let bridge = Arc::new(BridgeOrchestrator::new(
            store.clone(),
            deposit.clone(),
            attestation.clone(),
            clock.clone(),
            ChronoDuration::seconds(config.bridge_attestation_ceiling_secs as i64),
        ));

        let idempotency = Arc::new(IdempotencyGate::new(
            store.clone(),
            ChronoDuration::seconds(config.idempotency_ttl_secs as i64),
        ));

        let reconciliation_config = ReconciliationConfig {
            custodian_system_wallet_id: config.custodian_system_wallet_id.clone(),
            tolerance_circle: money_common::Money::new(Decimal::new(100, 2)),
            tolerance_brokerage: money_common::Money::new(Decimal::new(1000, 2)),
        };

        let default_ratio_spending = Decimal::from_str(&config.default_ratio_spending)
            .map_err(|e| Error::validation(format!("bad MONEY_ALLOCATION_RATIO_SPENDING: {e}")))?;
        let default_ratio_stash = Decimal::from_str(&config.default_ratio_stash)
            .map_err(|e| Error::validation(format!("bad MONEY_ALLOCATION_RATIO_STASH: {e}")))?;

        Ok(Arc::new(Self {
            store,
            clock,
            ledger,
            ledger_port,
            allocation,
            deposit,
            bridge,
            idempotency,
            custodian,
            attestation,
            bank_rail,
            brokerage,
            secret_cipher,
            reconciliation_config,
            chain_deposit_webhook_secret: config.chain_deposit_webhook_secret.clone(),
            default_ratio_spending,
            default_ratio_stash,
        }))
    }
}
