// Job handlers (§4.W). `JobHandler` is the seam the runtime calls into;
// everything below is one concrete implementation per named job type.
// `JobError` carries the runtime's only two verdicts — retry or give up —
// so a handler never has to know about backoff schedules or attempt counts.

use async_trait::async_trait;
use money_common::model::{ErrorClassification, WorkerJob};
use money_common::Error;

#[derive(Debug, Clone)]
pub struct JobError {
    pub classification: ErrorClassification,
    pub message: String,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { classification: ErrorClassification::Retryable, message: message.into() }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self { classification: ErrorClassification::Terminal, message: message.into() }
    }
}

impl From<Error> for JobError {
    fn from(e: Error) -> Self {
        if e.retryable() {
            JobError::retryable(e.to_string())
        } else {
            JobError::terminal(e.to_string())
        }
    }
}

impl From<money_adapters::AdapterError> for JobError {
    fn from(e: money_adapters::AdapterError) -> Self {
        if e.is_retryable() {
            JobError::retryable(e.to_string())
        } else {
            JobError::terminal(e.to_string())
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &WorkerJob) -> Result<(), JobError>;
}

pub mod wallet_provisioning;
pub mod onboarding_signal;
pub mod deposit_poll;
pub mod bridge_poll;

pub use bridge_poll::BridgePollJob;
pub use deposit_poll::DepositPollJob;
pub use onboarding_signal::OnboardingSignalJob;
pub use wallet_provisioning::WalletProvisioningJob;
