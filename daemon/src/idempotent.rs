// Wires the Idempotency Gate (§4.I) into a single HTTP handler: requests
// without an `Idempotency-Key` header (and, for handlers that accept one,
// no body `idempotencyKey` either) skip the gate entirely, matching
// money_idempotency's own contract that it is only consulted when a key
// exists.

use actix_web::HttpRequest;
use money_common::{Error, IdempotencyKey};
use money_idempotency::{GateOutcome, IdempotencyGate};
use serde_json::json;
use std::future::Future;

/// A handler's outcome already reduced to the bytes that go over the
/// wire, so a cached application error (e.g. a validation 400) replays
/// identically to the first response instead of leaving the gate's
/// placeholder stuck in-progress forever.
pub fn to_envelope(result: Result<(u16, serde_json::Value), Error>) -> (u16, Vec<u8>) {
    match result {
        Ok((status, body)) => (status, serde_json::to_vec(&body).unwrap_or_default()),
        Err(e) => {
            let mut body = json!({ "code": e.code(), "message": e.to_string() });
            if let Some(details) = e.details() {
                body["details"] = details.clone();
            }
            (e.http_status(), serde_json::to_vec(&body).unwrap_or_default())
        }
    }
}

/// Runs `handler` under the gate, replaying a cached response (success or
/// cached error alike) instead of re-executing it. Only gate-level
/// failures — a malformed key, a conflicting replay, a stuck-placeholder
/// timeout — surface as `Err`; everything the handler itself produced is
/// captured in the returned `(status, body)`.
///
/// §6 places `idempotencyKey` in some request bodies (e.g. `POST /orders`)
/// rather than only the `Idempotency-Key` header; `body_key` is that
/// caller-extracted value. The header takes precedence when both are
/// present — callers that send both are defining the header as the
/// authoritative one — so a client using either alone still gets gated.
pub async fn guarded<F, Fut>(
    gate: &IdempotencyGate,
    req: &HttpRequest,
    raw_body: &[u8],
    user_id: Option<money_common::UserId>,
    body_key: Option<&str>,
    handler: F,
) -> Result<(u16, Vec<u8>), Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = (u16, Vec<u8>)>,
{
    let header_key = req.headers().get("Idempotency-Key").and_then(|v| v.to_str().ok());
    let raw_key = header_key.or(body_key);

    let key = raw_key
        .map(|raw| IdempotencyKey::parse(raw).ok_or_else(|| Error::validation("malformed idempotency key")))
        .transpose()?;

    let Some(key) = key else {
        return Ok(handler().await);
    };

    match gate.check(&key, req.path(), req.method().as_str(), raw_body, user_id).await? {
        GateOutcome::Replay { response_status, response_body } => Ok((response_status, response_body)),
        GateOutcome::Proceed => {
            let (status, body) = handler().await;
            gate.complete(&key, status, body.clone()).await?;
            Ok((status, body))
        }
    }
}
