use crate::{IdempotencyKey, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub path: String,
    pub method: String,
    pub request_hash: String,
    pub user_id: Option<UserId>,
    pub response_status: u16,
    pub response_body: Vec<u8>,
    pub in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
