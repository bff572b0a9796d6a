// §6 allocation surface: enable/pause/resume the 70/30 split and read
// back its status and balances. Every route is authorization-checked —
// the path's user_id must equal the authenticated caller.

use crate::auth::{require_self, AuthenticatedUser};
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use money_common::{Currency, Error, UserId};
use money_store::Storage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

fn path_user(raw: &str) -> Result<UserId, Error> {
    Uuid::from_str(raw).map(UserId::from).map_err(|_| Error::validation("malformed user id"))
}

#[derive(Debug, Serialize)]
struct ModeResponse {
    active: bool,
    ratio_spending: String,
    ratio_stash: String,
    paused: bool,
}

impl From<money_common::model::SmartAllocationMode> for ModeResponse {
    fn from(m: money_common::model::SmartAllocationMode) -> Self {
        Self {
            active: m.active,
            ratio_spending: m.ratio_spending.to_string(),
            ratio_stash: m.ratio_stash.to_string(),
            paused: m.paused_at.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnableBody {
    pub spending_ratio: String,
    pub stash_ratio: String,
}

#[post("/user/{id}/allocation/enable")]
pub async fn enable(
    state: web::Data<Arc<AppState>>,
    user: AuthenticatedUser,
    path: web::Path<String>,
    body: web::Json<EnableBody>,
) -> Result<HttpResponse, Error> {
    let target = path_user(&path)?;
    require_self(target, user.0)?;

    let ratio_spending = Decimal::from_str(&body.spending_ratio).map_err(|e| Error::validation(format!("bad spending_ratio: {e}")))?;
    let ratio_stash = Decimal::from_str(&body.stash_ratio).map_err(|e| Error::validation(format!("bad stash_ratio: {e}")))?;

    let mode = state.allocation.enable_mode(target, ratio_spending, ratio_stash).await?;
    Ok(HttpResponse::Ok().json(ModeResponse::from(mode)))
}

#[post("/user/{id}/allocation/pause")]
pub async fn pause(state: web::Data<Arc<AppState>>, user: AuthenticatedUser, path: web::Path<String>) -> Result<HttpResponse, Error> {
    let target = path_user(&path)?;
    require_self(target, user.0)?;
    let mode = state.allocation.pause_mode(target).await?;
    Ok(HttpResponse::Ok().json(ModeResponse::from(mode)))
}

#[post("/user/{id}/allocation/resume")]
pub async fn resume(state: web::Data<Arc<AppState>>, user: AuthenticatedUser, path: web::Path<String>) -> Result<HttpResponse, Error> {
    let target = path_user(&path)?;
    require_self(target, user.0)?;
    let mode = state.allocation.resume_mode(target).await?;
    Ok(HttpResponse::Ok().json(ModeResponse::from(mode)))
}

#[get("/user/{id}/allocation/status")]
pub async fn status(state: web::Data<Arc<AppState>>, user: AuthenticatedUser, path: web::Path<String>) -> Result<HttpResponse, Error> {
    let target = path_user(&path)?;
    require_self(target, user.0)?;
    let mode = state
        .store
        .get_mode(target)
        .await?
        .ok_or_else(|| Error::not_found("no allocation mode for user"))?;
    Ok(HttpResponse::Ok().json(ModeResponse::from(mode)))
}

#[derive(Debug, Serialize)]
struct AllocationBalancesResponse {
    spending_balance: String,
    stash_balance: String,
    currency: Currency,
}

#[get("/user/{id}/allocation/balances")]
pub async fn allocation_balances(
    state: web::Data<Arc<AppState>>,
    user: AuthenticatedUser,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let target = path_user(&path)?;
    require_self(target, user.0)?;
    let currency = Currency::Usd;
    let balances = state.store.get_user_balances(target, currency).await?;
    Ok(HttpResponse::Ok().json(AllocationBalancesResponse {
        spending_balance: balances.spending_balance.to_string(),
        stash_balance: balances.stash_balance.to_string(),
        currency,
    }))
}
