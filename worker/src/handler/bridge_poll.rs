use super::{JobError, JobHandler};
use async_trait::async_trait;
use money_bridge::BridgeOrchestrator;
use money_common::model::WorkerJob;
use std::sync::Arc;

/// The polling half of §4.B's attestation-wait step. Each tick lists every
/// in-flight bridge transfer and drives its attestation poll one step;
/// the 12h ceiling check lives in `poll_attestation` itself, so a single
/// stuck bridge failing that check doesn't stop the rest of the sweep.
pub struct BridgePollJob {
    orchestrator: Arc<BridgeOrchestrator>,
}

impl BridgePollJob {
    pub fn new(orchestrator: Arc<BridgeOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for BridgePollJob {
    async fn handle(&self, _job: &WorkerJob) -> Result<(), JobError> {
        let in_flight = self.orchestrator.list_in_flight().await?;
        let mut last_err = None;
        for bridge in in_flight {
            if let Err(e) = self.orchestrator.poll_attestation(bridge.id).await {
                log::warn!("poll_attestation failed for bridge {}: {e}", bridge.id);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
