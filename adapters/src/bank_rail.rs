// Bank rail adapter (§4.X, §6): account creation with email OTP, virtual
// account issuance, KYC link, payment intent creation. Session-secret
// material (the OTP session token) is encrypted at rest via
// `crate::secret::SecretCipher` and only decrypted in-process for the
// single call that needs it.

use crate::error::AdapterError;
use crate::http::{HttpAdapter, HttpAdapterConfig};
use crate::secret::SecretCipher;
use money_common::Money;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AccountSession {
    pub account_id: String,
    /// Opaque OTP session token; encrypted before being persisted anywhere
    /// by the caller.
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VirtualAccountResponse {
    pub virtual_account_id: String,
    pub routing_details: String,
}

#[derive(Debug, Deserialize)]
pub struct KycLinkResponse {
    pub url: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
struct PaymentIntentRequest<'a> {
    virtual_account_id: &'a str,
    amount: &'a str,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub status: String,
}

pub struct BankRailAdapter {
    http: HttpAdapter,
    secret_cipher: Arc<SecretCipher>,
}

impl BankRailAdapter {
    pub fn new(base_url: impl Into<String>, api_key: String, config: HttpAdapterConfig, secret_cipher: Arc<SecretCipher>) -> Self {
        Self { http: HttpAdapter::new("bank_rail", base_url, Some(api_key), config), secret_cipher }
    }

    pub async fn create_account_with_otp(&self, email: &str) -> Result<(AccountSession, Vec<u8>), AdapterError> {
        let session: AccountSession = self
            .http
            .request(Method::POST, "/accounts", Some(&CreateAccountRequest { email }), None)
            .await?;
        let encrypted_session_token = self
            .secret_cipher
            .encrypt(session.session_token.as_bytes())
            .map_err(|e| AdapterError::Decode { provider: "bank_rail".to_string(), message: e.to_string() })?;
        Ok((session, encrypted_session_token))
    }

    pub async fn issue_virtual_account(&self, account_id: &str) -> Result<VirtualAccountResponse, AdapterError> {
        self.http
            .request::<(), _>(Method::POST, &format!("/accounts/{account_id}/virtual-accounts"), None, None)
            .await
    }

    pub async fn kyc_link(&self, account_id: &str) -> Result<KycLinkResponse, AdapterError> {
        self.http
            .request::<(), _>(Method::GET, &format!("/accounts/{account_id}/kyc-link"), None, None)
            .await
    }

    pub async fn create_payment_intent(
        &self,
        virtual_account_id: &str,
        amount: Money,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntentResponse, AdapterError> {
        let amount_str = amount.to_string();
        self.http
            .request(
                Method::POST,
                "/payment-intents",
                Some(&PaymentIntentRequest { virtual_account_id, amount: &amount_str, currency }),
                Some(idempotency_key),
            )
            .await
    }
}
