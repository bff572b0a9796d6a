use super::{JobError, JobHandler};
use async_trait::async_trait;
use money_adapters::custodian::CustodianAdapter;
use money_common::model::WorkerJob;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Payload {
    chain: String,
}

/// Creates a per-chain custodial wallet for a user (§1 item 5). Idempotent
/// on `(user_id, chain)` because the custodian's wallet-creation route is
/// itself keyed that way — a duplicate job for a wallet that already
/// exists just gets the same wallet back, so a retried or re-delivered job
/// is harmless rather than something this handler needs to de-duplicate
/// itself.
pub struct WalletProvisioningJob {
    custodian: Arc<CustodianAdapter>,
}

impl WalletProvisioningJob {
    pub fn new(custodian: Arc<CustodianAdapter>) -> Self {
        Self { custodian }
    }
}

#[async_trait]
impl JobHandler for WalletProvisioningJob {
    async fn handle(&self, job: &WorkerJob) -> Result<(), JobError> {
        let payload: Payload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::terminal(format!("bad wallet_provisioning payload: {e}")))?;

        let wallet = self.custodian.create_wallet(&job.subject, &payload.chain).await?;
        log::info!("provisioned wallet {} for user {} on {}", wallet.wallet_id, job.subject, payload.chain);
        Ok(())
    }
}
