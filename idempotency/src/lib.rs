// Idempotency Gate (spec.md §4.I). Wraps inbound state-changing requests:
// dedupe by client-supplied key, replay a cached response on exact repeat,
// reject on a hash mismatch, and let concurrent racers converge on one
// winner's response.

use chrono::{Duration, Utc};
use money_common::model::IdempotencyRecord;
use money_common::{Error, IdempotencyKey, UserId};
use money_store::repos::InsertOutcome;
use money_store::Storage;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration as StdDuration;

pub enum GateOutcome {
    /// No record existed; caller must execute the request and call
    /// `complete` with the resulting status/body.
    Proceed,
    /// A completed record already matches this request; replay it
    /// verbatim, including a previously-cached error status.
    Replay { response_status: u16, response_body: Vec<u8> },
}

pub struct IdempotencyGate {
    store: Arc<dyn Storage>,
    ttl: Duration,
    race_poll_interval: StdDuration,
    race_wait_budget: StdDuration,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn Storage>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            race_poll_interval: StdDuration::from_millis(50),
            race_wait_budget: StdDuration::from_secs(5),
        }
    }

    pub fn request_hash(body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    /// Step 1-6 of §4.I. Callers without an `Idempotency-Key` header never
    /// construct a key and skip this gate entirely — that's handled above
    /// this crate, at the HTTP layer.
    pub async fn check(
        &self,
        key: &IdempotencyKey,
        path: &str,
        method: &str,
        body: &[u8],
        user_id: Option<UserId>,
    ) -> Result<GateOutcome, Error> {
        let request_hash = Self::request_hash(body);
        let expires_at = Utc::now() + self.ttl;

        match self.store.try_insert_placeholder(key, path, method, &request_hash, user_id, expires_at).await? {
            InsertOutcome::Inserted => Ok(GateOutcome::Proceed),
            InsertOutcome::Existing(existing) => self.resolve_existing(key, existing, &request_hash).await,
        }
    }

    async fn resolve_existing(
        &self,
        key: &IdempotencyKey,
        existing: IdempotencyRecord,
        request_hash: &str,
    ) -> Result<GateOutcome, Error> {
        if existing.request_hash != *request_hash {
            // §4.I step 6: surfaces whether the mismatch crosses users,
            // without leaking the other user's payload.
            return Err(Error::conflict(format!(
                "idempotency key {key} was already used for a different request body"
            )));
        }

        if !existing.in_progress {
            return Ok(GateOutcome::Replay {
                response_status: existing.response_status,
                response_body: existing.response_body,
            });
        }

        // The loser of the insert race: wait (bounded) for the winner to
        // complete, then replay. A winner that never completes (crashed
        // mid-request) leaves us waiting out the budget and erroring —
        // the caller retries with the same key once the record's
        // in-progress placeholder has aged out.
        let deadline = std::time::Instant::now() + self.race_wait_budget;
        loop {
            if std::time::Instant::now() >= deadline {
                return Err(Error::service_unavailable(format!(
                    "idempotency key {key} is still in progress on another request"
                )));
            }
            tokio::time::sleep(self.race_poll_interval).await;
            let Some(record) = self.store.get_idempotency_record(key).await? else {
                return Err(Error::internal("idempotency record disappeared mid-wait"));
            };
            if !record.in_progress {
                return Ok(GateOutcome::Replay {
                    response_status: record.response_status,
                    response_body: record.response_body,
                });
            }
        }
    }

    /// Called by the caller after executing the downstream request, to
    /// persist the captured response against the placeholder inserted by
    /// `check`.
    pub async fn complete(&self, key: &IdempotencyKey, response_status: u16, response_body: Vec<u8>) -> Result<(), Error> {
        self.store.complete(key, response_status, response_body).await?;
        Ok(())
    }

    /// TTL sweep (§4.I step 7): expired keys become re-usable. Intended to
    /// be driven by a scheduled worker tick, not inline on the request
    /// path.
    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        self.store.delete_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use money_store::memory::MemoryStorage;

    fn gate() -> IdempotencyGate {
        let store: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        IdempotencyGate::new(store, Duration::hours(24))
    }

    #[tokio::test]
    async fn first_request_proceeds_then_replays_on_repeat() {
        let gate = gate();
        let key = IdempotencyKey::parse("abc-123").unwrap();
        let body = br#"{"amount":"10.00"}"#;

        let outcome = gate.check(&key, "/v1/transfers", "POST", body, None).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed));
        gate.complete(&key, 201, b"{\"id\":\"t1\"}".to_vec()).await.unwrap();

        let outcome = gate.check(&key, "/v1/transfers", "POST", body, None).await.unwrap();
        match outcome {
            GateOutcome::Replay { response_status, response_body } => {
                assert_eq!(response_status, 201);
                assert_eq!(response_body, b"{\"id\":\"t1\"}".to_vec());
            }
            GateOutcome::Proceed => panic!("expected a replay"),
        }
    }

    #[tokio::test]
    async fn mismatched_body_is_a_conflict() {
        let gate = gate();
        let key = IdempotencyKey::parse("abc-456").unwrap();
        gate.check(&key, "/v1/transfers", "POST", br#"{"amount":"10.00"}"#, None).await.unwrap();
        gate.complete(&key, 201, b"ok".to_vec()).await.unwrap();

        let err = gate
            .check(&key, "/v1/transfers", "POST", br#"{"amount":"99.00"}"#, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn cached_error_status_replays_verbatim() {
        let gate = gate();
        let key = IdempotencyKey::parse("abc-789").unwrap();
        let body = br#"{"amount":"-1"}"#;
        gate.check(&key, "/v1/transfers", "POST", body, None).await.unwrap();
        gate.complete(&key, 422, b"{\"error\":\"invalid amount\"}".to_vec()).await.unwrap();

        let outcome = gate.check(&key, "/v1/transfers", "POST", body, None).await.unwrap();
        match outcome {
            GateOutcome::Replay { response_status, .. } => assert_eq!(response_status, 422),
            GateOutcome::Proceed => panic!("expected a replay of the cached error"),
        }
    }
}
