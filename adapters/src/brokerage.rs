// Brokerage adapter (§4.X, §6): account creation, order placement
// (market/limit, qty or notional), position/activity listing, and
// firm-to-customer journal funding.

use crate::error::AdapterError;
use crate::http::{HttpAdapter, HttpAdapterConfig};
use money_common::Money;
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest<'a> {
    pub basket_id: &'a str,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Exactly one of qty/notional is set, mirroring §6 "qty or notional".
    pub qty: Option<&'a str>,
    pub notional: Option<&'a str>,
    pub limit_price: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
    pub filled_qty: Option<String>,
    pub filled_avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: String,
    pub market_value: String,
}

#[derive(Debug, Deserialize)]
pub struct Activity {
    pub activity_id: String,
    pub activity_type: String,
    pub amount: String,
    pub occurred_at: String,
}

#[derive(Debug, Serialize)]
struct JournalRequest<'a> {
    account_id: &'a str,
    amount: &'a str,
    direction: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct JournalResponse {
    pub journal_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct BuyingPowerResponse {
    pub buying_power: String,
}

pub struct BrokerageAdapter {
    http: HttpAdapter,
}

impl BrokerageAdapter {
    pub fn new(base_url: impl Into<String>, api_key: String, config: HttpAdapterConfig) -> Self {
        Self { http: HttpAdapter::new("brokerage", base_url, Some(api_key), config) }
    }

    pub async fn create_account(&self, user_id: &str) -> Result<String, AdapterError> {
        #[derive(Serialize)]
        struct Req<'a> {
            external_user_id: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            account_id: String,
        }
        let resp: Resp = self
            .http
            .request(Method::POST, "/accounts", Some(&Req { external_user_id: user_id }), None)
            .await?;
        Ok(resp.account_id)
    }

    pub async fn create_order(&self, account_id: &str, request: &CreateOrderRequest<'_>, idempotency_key: &str) -> Result<OrderResponse, AdapterError> {
        self.http
            .request(Method::POST, &format!("/accounts/{account_id}/orders"), Some(request), Some(idempotency_key))
            .await
    }

    pub async fn list_positions(&self, account_id: &str) -> Result<Vec<Position>, AdapterError> {
        self.http
            .request::<(), _>(Method::GET, &format!("/accounts/{account_id}/positions"), None, None)
            .await
    }

    pub async fn list_activity(&self, account_id: &str) -> Result<Vec<Activity>, AdapterError> {
        self.http
            .request::<(), _>(Method::GET, &format!("/accounts/{account_id}/activities"), None, None)
            .await
    }

    /// Firm-to-customer funding: credits `account_id`'s buying power by
    /// `amount`, used by the Deposit Orchestrator's broker-funding step.
    pub async fn journal(&self, account_id: &str, amount: Money, idempotency_key: &str) -> Result<JournalResponse, AdapterError> {
        let amount_str = amount.to_string();
        self.http
            .request(
                Method::POST,
                "/journals",
                Some(&JournalRequest { account_id, amount: &amount_str, direction: "firm_to_customer" }),
                Some(idempotency_key),
            )
            .await
    }

    pub async fn get_buying_power(&self, account_id: &str) -> Result<Money, AdapterError> {
        use std::str::FromStr;
        let resp: BuyingPowerResponse = self
            .http
            .request::<(), _>(Method::GET, &format!("/accounts/{account_id}/buying-power"), None, None)
            .await?;
        Money::from_str(&resp.buying_power).map_err(|e| AdapterError::Decode {
            provider: self.http.provider().to_string(),
            message: e.to_string(),
        })
    }
}
