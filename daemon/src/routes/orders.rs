// §6 `POST /orders`: places a brokerage order on a basket, gated by the
// Idempotency Gate per §8 scenario 5 (same key + same body replays the
// cached response; same key + different body is a 409 CONFLICT).

use crate::auth::AuthenticatedUser;
use crate::idempotent::{guarded, to_envelope};
use crate::state::AppState;
use actix_web::{post, web, HttpRequest, HttpResponse};
use money_adapters::brokerage::{CreateOrderRequest, OrderKind, OrderSide};
use money_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub basket_id: String,
    pub side: OrderSide,
    #[serde(default)]
    pub kind: Option<OrderKind>,
    pub qty: Option<String>,
    pub notional: Option<String>,
    pub limit_price: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: String,
    status: String,
    filled_qty: Option<String>,
    filled_avg_price: Option<String>,
}

#[post("/orders")]
pub async fn create_order(
    http_req: HttpRequest,
    state: web::Data<Arc<AppState>>,
    user: AuthenticatedUser,
    raw_body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let body: CreateOrderBody =
        serde_json::from_slice(&raw_body).map_err(|e| Error::validation(format!("invalid request body: {e}")))?;

    if body.qty.is_none() == body.notional.is_none() {
        return Err(Error::validation("exactly one of qty or notional is required"));
    }

    let (status, bytes) = guarded(&state.idempotency, &http_req, &raw_body, Some(user.0), body.idempotency_key.as_deref(), || async {
        to_envelope(place_order(&state, user.0, &body).await)
    })
    .await?;

    Ok(HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::OK))
        .content_type("application/json")
        .body(bytes))
}

async fn place_order(state: &AppState, user_id: money_common::UserId, body: &CreateOrderBody) -> Result<(u16, serde_json::Value), Error> {
    let account_id = state.brokerage.create_account(&user_id.to_string()).await?;

    let idempotency_key = body.idempotency_key.clone().unwrap_or_else(|| format!("order:{}:{}", user_id, body.basket_id));
    let request = CreateOrderRequest {
        basket_id: &body.basket_id,
        side: body.side,
        kind: body.kind.unwrap_or(OrderKind::Market),
        qty: body.qty.as_deref(),
        notional: body.notional.as_deref(),
        limit_price: body.limit_price.as_deref(),
    };

    let order = state.brokerage.create_order(&account_id, &request, &idempotency_key).await?;
    Ok((
        201,
        serde_json::to_value(OrderResponse {
            order_id: order.order_id,
            status: order.status,
            filled_qty: order.filled_qty,
            filled_avg_price: order.filled_avg_price,
        })
        .unwrap_or_default(),
    ))
}
