use crate::WorkerJobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerJobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Retry,
}

#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub id: WorkerJobId,
    /// Discriminates the queue a job belongs to (e.g. "wallet_provisioning",
    /// "onboarding_signal", "deposit_poll", "bridge_poll").
    pub job_type: String,
    /// user_id or signal_id, whichever the job type keys on.
    pub subject: String,
    pub status: WorkerJobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Retryable,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: uuid::Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub before: Option<Value>,
    pub after: Value,
    pub error_classification: Option<ErrorClassification>,
    pub created_at: DateTime<Utc>,
}
