// §6 webhook surface. Every handler authenticates the raw body against
// `X-Signature: sha256=...` before touching application state (§9
// "Webhook authenticity" — unsigned or bad-signature deliveries are
// attacker traffic, not a retryable error).

use crate::state::AppState;
use crate::webhook_auth;
use actix_web::{post, web, HttpRequest, HttpResponse};
use money_common::model::{WorkerJob, WorkerJobStatus};
use money_common::{Clock, Error, Money, UserId, WorkerJobId};
use money_store::Storage;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

fn require_signature(req: &HttpRequest, secret: &str, raw_body: &[u8]) -> Result<(), Error> {
    let header = req.headers().get("X-Signature").and_then(|v| v.to_str().ok());
    if !webhook_auth::verify(secret.as_bytes(), raw_body, header) {
        return Err(Error::Auth { message: "missing or invalid webhook signature".into() });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ChainDepositPayload {
    pub user_id: String,
    pub chain: String,
    pub tx_hash: String,
    pub token: String,
    pub amount: String,
}

#[post("/webhooks/chain-deposit")]
pub async fn chain_deposit(
    http_req: HttpRequest,
    state: web::Data<Arc<AppState>>,
    raw_body: web::Bytes,
) -> Result<HttpResponse, Error> {
    require_signature(&http_req, &state.chain_deposit_webhook_secret, &raw_body)?;

    let payload: ChainDepositPayload =
        serde_json::from_slice(&raw_body).map_err(|e| Error::validation(format!("invalid webhook body: {e}")))?;
    let user_id = UserId::from(uuid::Uuid::from_str(&payload.user_id).map_err(|_| Error::validation("malformed user_id"))?);
    let amount = Money::from_str(&payload.amount).map_err(|e| Error::validation(format!("bad amount: {e}")))?;

    let (deposit, was_duplicate) = state
        .deposit
        .record_chain_deposit(user_id, payload.chain, payload.tx_hash, payload.token, amount)
        .await?;

    if was_duplicate {
        Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "already_processed" })))
    } else {
        // The custodian only delivers this webhook once its own
        // confirmation threshold is met, so "chain webhook received" and
        // "confirmations reached" (§4.D) coincide here — there is no
        // separate confirmation-count poll to drive the pending ->
        // confirmed edge from.
        state.deposit.mark_confirmed(deposit.id).await?;
        Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "accepted" })))
    }
}

/// Bank-rail off-ramp lifecycle events (§4.D off_ramp_initiated /
/// off_ramp_completed steps). The provider's own event vocabulary is not
/// specified beyond §6 naming the route; `event` is this service's
/// minimal contract for it.
#[derive(Debug, Deserialize)]
pub struct DueEventPayload {
    pub deposit_id: String,
    pub event: String,
    pub off_ramp_tx_id: Option<String>,
}

#[post("/webhooks/due")]
pub async fn due(http_req: HttpRequest, state: web::Data<Arc<AppState>>, raw_body: web::Bytes) -> Result<HttpResponse, Error> {
    require_signature(&http_req, &state.chain_deposit_webhook_secret, &raw_body)?;

    let payload: DueEventPayload =
        serde_json::from_slice(&raw_body).map_err(|e| Error::validation(format!("invalid webhook body: {e}")))?;
    let deposit_id = money_common::DepositId::from(
        uuid::Uuid::from_str(&payload.deposit_id).map_err(|_| Error::validation("malformed deposit_id"))?,
    );

    match payload.event.as_str() {
        "off_ramp_initiated" => {
            let off_ramp_tx_id = payload.off_ramp_tx_id.ok_or_else(|| Error::validation("off_ramp_tx_id is required"))?;
            state.deposit.mark_off_ramp_initiated(deposit_id, off_ramp_tx_id).await?;
        }
        "off_ramp_completed" => {
            // §4.D's terminal edge: once the off-ramp leg lands, issue the
            // brokerage funding call immediately rather than waiting on a
            // separate trigger — there is no distinct "brokerage funding"
            // webhook in §6, and `complete_brokerage_funding` is itself
            // idempotent on the deposit id, so a retried `due` delivery
            // after this succeeds is a no-op rather than a double journal.
            state.deposit.mark_off_ramp_completed(deposit_id).await?;
            state.deposit.complete_brokerage_funding(deposit_id).await?;
        }
        other => return Err(Error::validation(format!("unrecognized bank-rail event {other:?}"))),
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "accepted" })))
}

/// Custodian KYC status updates, fanned out to onboarding-signal
/// consumers rather than acted on directly (§1 Non-goals: KYC document
/// capture is an external collaborator).
#[derive(Debug, Deserialize)]
pub struct GridEventPayload {
    pub user_id: String,
    pub status: String,
}

#[post("/webhooks/grid")]
pub async fn grid(http_req: HttpRequest, state: web::Data<Arc<AppState>>, raw_body: web::Bytes) -> Result<HttpResponse, Error> {
    require_signature(&http_req, &state.chain_deposit_webhook_secret, &raw_body)?;

    let payload: GridEventPayload =
        serde_json::from_slice(&raw_body).map_err(|e| Error::validation(format!("invalid webhook body: {e}")))?;

    let job = WorkerJob {
        id: WorkerJobId::new(),
        job_type: "onboarding_signal".to_string(),
        subject: payload.user_id,
        status: WorkerJobStatus::Queued,
        attempt_count: 0,
        max_attempts: 5,
        next_retry_at: None,
        started_at: None,
        completed_at: None,
        error_message: None,
        payload: serde_json::json!({ "signal": payload.status }),
        created_at: state.clock.now(),
    };
    state.store.enqueue(job).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "accepted" })))
}
