// Process configuration (SPEC_FULL "Configuration"). A single clap::Parser
// struct, CLI-flag first with an environment-variable fallback on every
// field (`#[arg(long, env = ...)]`) — the same shape `ta`'s `Cli` uses,
// scaled up to the daemon's larger surface.

use clap::Parser;
use money_common::config::{
    DEFAULT_ALLOCATION_RATIO_SPENDING, DEFAULT_ALLOCATION_RATIO_STASH, DEFAULT_BRIDGE_ATTESTATION_CEILING,
    DEFAULT_DEPOSIT_EXPIRY, DEFAULT_IDEMPOTENCY_TTL,
};

fn default_bind_address() -> String {
    // SECURITY: loopback by default; operators opt into 0.0.0.0 explicitly.
    "127.0.0.1:8080".to_string()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "money_daemon")]
#[command(about = "Money-movement backend: ledger, allocation, deposit/bridge orchestration, workers")]
#[command(version)]
pub struct Config {
    /// HTTP bind address. 0.0.0.0 exposes this to the network — see the
    /// startup warning if you set it.
    #[arg(long, env = "MONEY_BIND_ADDRESS", default_value_t = default_bind_address())]
    pub bind_address: String,

    /// actix-web worker thread count.
    #[arg(long, env = "MONEY_HTTP_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// `memory` for the in-process backend (development/tests without a
    /// database), `postgres` for the production backend.
    #[arg(long, env = "MONEY_STORAGE_BACKEND", default_value = "memory")]
    pub storage_backend: String,

    #[arg(long, env = "DATABASE_URL", default_value = "")]
    pub database_url: String,

    #[arg(long, env = "MONEY_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    #[arg(long, env = "MONEY_CUSTODIAN_BASE_URL", default_value = "http://localhost:9001")]
    pub custodian_base_url: String,
    #[arg(long, env = "MONEY_CUSTODIAN_API_KEY", default_value = "")]
    pub custodian_api_key: String,
    #[arg(long, env = "MONEY_CUSTODIAN_SYSTEM_WALLET_ID", default_value = "system-buffer")]
    pub custodian_system_wallet_id: String,

    #[arg(long, env = "MONEY_ATTESTATION_BASE_URL", default_value = "http://localhost:9002")]
    pub attestation_base_url: String,

    #[arg(long, env = "MONEY_BANK_RAIL_BASE_URL", default_value = "http://localhost:9003")]
    pub bank_rail_base_url: String,
    #[arg(long, env = "MONEY_BANK_RAIL_API_KEY", default_value = "")]
    pub bank_rail_api_key: String,

    #[arg(long, env = "MONEY_BROKERAGE_BASE_URL", default_value = "http://localhost:9004")]
    pub brokerage_base_url: String,
    #[arg(long, env = "MONEY_BROKERAGE_API_KEY", default_value = "")]
    pub brokerage_api_key: String,

    /// Hex-encoded 32-byte key for `SecretCipher` (AES-256-GCM at rest).
    #[arg(long, env = "MONEY_SECRET_AES_KEY_HEX", default_value = "0000000000000000000000000000000000000000000000000000000000000000")]
    pub secret_aes_key_hex: String,

    /// Per-tenant HMAC secret verifying `X-Signature` on `/webhooks/chain-deposit`.
    #[arg(long, env = "MONEY_CHAIN_DEPOSIT_WEBHOOK_SECRET", default_value = "")]
    pub chain_deposit_webhook_secret: String,

    #[arg(long, env = "MONEY_IDEMPOTENCY_TTL_SECS", default_value_t = DEFAULT_IDEMPOTENCY_TTL.as_secs())]
    pub idempotency_ttl_secs: u64,

    #[arg(long, env = "MONEY_DEPOSIT_EXPIRY_SECS", default_value_t = DEFAULT_DEPOSIT_EXPIRY.as_secs())]
    pub deposit_expiry_secs: u64,

    #[arg(long, env = "MONEY_BRIDGE_ATTESTATION_CEILING_SECS", default_value_t = DEFAULT_BRIDGE_ATTESTATION_CEILING.as_secs())]
    pub bridge_attestation_ceiling_secs: u64,

    #[arg(long, env = "MONEY_ALLOCATION_RATIO_SPENDING", default_value = DEFAULT_ALLOCATION_RATIO_SPENDING)]
    pub default_ratio_spending: String,
    #[arg(long, env = "MONEY_ALLOCATION_RATIO_STASH", default_value = DEFAULT_ALLOCATION_RATIO_STASH)]
    pub default_ratio_stash: String,

    #[arg(long, env = "MONEY_DEPOSIT_POLL_INTERVAL_SECS", default_value_t = 60)]
    pub deposit_poll_interval_secs: u64,
    #[arg(long, env = "MONEY_BRIDGE_POLL_INTERVAL_SECS", default_value_t = 30)]
    pub bridge_poll_interval_secs: u64,
    #[arg(long, env = "MONEY_WALLET_PROVISIONING_POLL_INTERVAL_SECS", default_value_t = 15)]
    pub wallet_provisioning_poll_interval_secs: u64,
    #[arg(long, env = "MONEY_ONBOARDING_SIGNAL_POLL_INTERVAL_SECS", default_value_t = 15)]
    pub onboarding_signal_poll_interval_secs: u64,

    #[arg(long, env = "MONEY_RECONCILIATION_INTERVAL_SECS", default_value_t = 3600)]
    pub reconciliation_interval_secs: u64,

    #[arg(long, env = "MONEY_PROMETHEUS_ENABLED", default_value_t = true)]
    pub prometheus_enabled: bool,
    #[arg(long, env = "MONEY_PROMETHEUS_ROUTE", default_value = "/metrics")]
    pub prometheus_route: String,
}

impl Config {
    pub fn secret_aes_key(&self) -> anyhow::Result<[u8; 32]> {
        let bytes = hex::decode(&self.secret_aes_key_hex)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("MONEY_SECRET_AES_KEY_HEX must decode to 32 bytes, got {}", v.len()))
    }
}
