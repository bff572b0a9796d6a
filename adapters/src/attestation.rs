// Cross-chain message attestation adapter (§4.X, §6). Read-only polling:
// given a source-chain tx hash, returns whether a burn has been attested
// and, if so, the message hash + attestation payload needed to submit a
// mint on the destination chain.

use crate::error::AdapterError;
use crate::http::{HttpAdapter, HttpAdapterConfig};
use reqwest::Method;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Pending,
    Complete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    pub attestation_status: AttestationStatus,
    pub message_hash: Option<String>,
    pub attestation: Option<String>,
    pub source_domain: Option<u32>,
    pub destination_domain: Option<u32>,
    pub amount: Option<String>,
}

pub struct AttestationAdapter {
    http: HttpAdapter,
}

impl AttestationAdapter {
    pub fn new(base_url: impl Into<String>, config: HttpAdapterConfig) -> Self {
        Self { http: HttpAdapter::new("attestation", base_url, None, config) }
    }

    pub async fn get_attestation(&self, source_tx_hash: &str) -> Result<AttestationResponse, AdapterError> {
        self.http
            .request::<(), _>(Method::GET, &format!("/attestations/{source_tx_hash}"), None, None)
            .await
    }
}
