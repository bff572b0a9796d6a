// §6 funding surface: deposit address issuance, balance summary, and
// paginated confirmation history.

use crate::auth::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use money_common::{Currency, DepositId, Error};
use money_store::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Chains the custodian adapter is known to provision wallets for. Not
/// named in spec.md beyond "returns a deposit address for that chain" —
/// the concrete set is this service's policy, not the custodian's.
const SUPPORTED_CHAINS: &[&str] = &["ethereum", "polygon", "arbitrum", "base", "solana"];

#[derive(Debug, Deserialize)]
pub struct DepositAddressRequest {
    pub chain: String,
}

#[derive(Debug, Serialize)]
struct DepositAddressResponse {
    chain: String,
    address: String,
    wallet_id: String,
}

#[post("/funding/deposit/address")]
pub async fn deposit_address(
    state: web::Data<Arc<AppState>>,
    user: AuthenticatedUser,
    body: web::Json<DepositAddressRequest>,
) -> Result<HttpResponse, Error> {
    if !SUPPORTED_CHAINS.contains(&body.chain.as_str()) {
        return Err(Error::validation_with(
            format!("unsupported chain {:?}", body.chain),
            serde_json::json!({ "supported": SUPPORTED_CHAINS }),
        ));
    }

    let wallet = state.custodian.create_wallet(&user.0.to_string(), &body.chain).await?;
    Ok(HttpResponse::Ok().json(DepositAddressResponse {
        chain: body.chain.clone(),
        address: wallet.address,
        wallet_id: wallet.wallet_id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalancesResponse {
    buying_power: String,
    pending_deposits: String,
    currency: Currency,
}

#[get("/balances")]
pub async fn balances(state: web::Data<Arc<AppState>>, user: AuthenticatedUser) -> Result<HttpResponse, Error> {
    let currency = Currency::Usd;
    let user_balances = state.ledger.get_user_balances(user.0, currency).await?;
    Ok(HttpResponse::Ok().json(BalancesResponse {
        buying_power: user_balances.fiat_exposure.to_string(),
        pending_deposits: user_balances.pending_investment.to_string(),
        currency,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationsQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct DepositSummary {
    id: String,
    chain: String,
    tx_hash: String,
    token: String,
    amount: String,
    status: String,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct ConfirmationsResponse {
    deposits: Vec<DepositSummary>,
    next_cursor: Option<String>,
}

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[get("/funding/confirmations")]
pub async fn confirmations(
    state: web::Data<Arc<AppState>>,
    user: AuthenticatedUser,
    query: web::Query<ConfirmationsQuery>,
) -> Result<HttpResponse, Error> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let cursor = query
        .cursor
        .as_deref()
        .map(|c| Uuid::parse_str(c).map(DepositId::from).map_err(|_| Error::validation("malformed cursor")))
        .transpose()?;

    // Fetch one extra row to know whether a further page exists without a
    // separate count query.
    let mut page = state.store.list_for_user(user.0, limit + 1, cursor).await?;
    let next_cursor = if page.len() > limit as usize {
        page.truncate(limit as usize);
        page.last().map(|d| d.id.to_string())
    } else {
        None
    };

    let deposits = page
        .into_iter()
        .map(|d| DepositSummary {
            id: d.id.to_string(),
            chain: d.chain,
            tx_hash: d.tx_hash,
            token: d.token,
            amount: d.amount.to_string(),
            status: d.status.to_string(),
            created_at: d.created_at.to_rfc3339(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ConfirmationsResponse { deposits, next_cursor }))
}
