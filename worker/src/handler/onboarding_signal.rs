use super::{JobError, JobHandler};
use async_trait::async_trait;
use money_common::model::WorkerJob;
use std::sync::Arc;

/// One downstream consumer of an onboarding signal — KYC status ingestion,
/// notification delivery, and similar systems are external collaborators
/// (§1 Non-goals) that `money_daemon` wires in as concrete implementations;
/// this crate only owns the fan-out.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn notify(&self, user_id: &str, signal: &str) -> Result<(), JobError>;
}

#[derive(Debug, serde::Deserialize)]
struct Payload {
    signal: String,
}

/// Fans a user-state-change signal out to every registered sink. A single
/// sink failing is terminal for the job as a whole — partial fan-out on a
/// retry would re-notify sinks that already succeeded, so sinks are
/// expected to be idempotent on `(user_id, signal)` themselves.
pub struct OnboardingSignalJob {
    sinks: Vec<Arc<dyn SignalSink>>,
}

impl OnboardingSignalJob {
    pub fn new(sinks: Vec<Arc<dyn SignalSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl JobHandler for OnboardingSignalJob {
    async fn handle(&self, job: &WorkerJob) -> Result<(), JobError> {
        let payload: Payload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::terminal(format!("bad onboarding_signal payload: {e}")))?;

        for sink in &self.sinks {
            sink.notify(&job.subject, &payload.signal).await?;
        }
        Ok(())
    }
}
