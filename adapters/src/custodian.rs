// Chain custodian adapter (§4.X, §6): wallet set creation, per-chain
// wallet creation, balance reads, transfer submission.

use crate::error::AdapterError;
use crate::http::{HttpAdapter, HttpAdapterConfig};
use money_common::Money;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize)]
struct CreateWalletRequest<'a> {
    user_id: &'a str,
    chain: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct WalletResponse {
    pub wallet_id: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    from_wallet_id: &'a str,
    to_address: &'a str,
    amount: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TransferResponse {
    pub transfer_id: String,
    pub tx_hash: Option<String>,
}

pub struct CustodianAdapter {
    http: HttpAdapter,
}

impl CustodianAdapter {
    pub fn new(base_url: impl Into<String>, api_key: String, config: HttpAdapterConfig) -> Self {
        Self { http: HttpAdapter::new("custodian", base_url, Some(api_key), config) }
    }

    pub async fn create_wallet(&self, user_id: &str, chain: &str) -> Result<WalletResponse, AdapterError> {
        self.http
            .request(Method::POST, "/wallets", Some(&CreateWalletRequest { user_id, chain }), None)
            .await
    }

    pub async fn get_balance(&self, wallet_id: &str) -> Result<Money, AdapterError> {
        let resp: BalanceResponse = self
            .http
            .request::<(), _>(Method::GET, &format!("/wallets/{wallet_id}/balance"), None, None)
            .await?;
        Money::from_str(&resp.balance).map_err(|e| AdapterError::Decode {
            provider: self.http.provider().to_string(),
            message: e.to_string(),
        })
    }

    /// Idempotency-keyed per §6 "transfer submission with idempotency key".
    pub async fn submit_transfer(
        &self,
        from_wallet_id: &str,
        to_address: &str,
        amount: Money,
        token: &str,
        idempotency_key: &str,
    ) -> Result<TransferResponse, AdapterError> {
        let amount_str = amount.to_string();
        self.http
            .request(
                Method::POST,
                "/transfers",
                Some(&TransferRequest { from_wallet_id, to_address, amount: &amount_str, token }),
                Some(idempotency_key),
            )
            .await
    }
}
