use super::{JobError, JobHandler};
use async_trait::async_trait;
use money_common::model::WorkerJob;
use money_deposit::DepositOrchestrator;
use std::sync::Arc;

/// The polling half of §4.D's "chain deposit detected" input channel — the
/// webhook half is handled directly by `money_daemon`'s HTTP layer. Each
/// tick is a sweep, not keyed to any one deposit, so it ignores the job's
/// payload and just walks every deposit past its expiry.
pub struct DepositPollJob {
    orchestrator: Arc<DepositOrchestrator>,
}

impl DepositPollJob {
    pub fn new(orchestrator: Arc<DepositOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for DepositPollJob {
    async fn handle(&self, _job: &WorkerJob) -> Result<(), JobError> {
        let expired = self.orchestrator.expire_stale_pending().await?;
        if !expired.is_empty() {
            log::info!("expired {} stale pending deposits", expired.len());
        }
        Ok(())
    }
}
