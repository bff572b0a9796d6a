// Shared base for every outbound HTTP adapter (§4.X "uniform contract"):
// timeout, retry with exponential backoff on 5xx/network errors, a
// per-adapter circuit breaker, and a token-bucket rate limiter. Each
// concrete adapter (custodian, attestation, bank-rail, brokerage) only
// supplies its base URL, auth header, and declared rate — grounded on
// SPEC_FULL's "all four adapters share one `HttpAdapter` base".

use crate::breaker::CircuitBreaker;
use crate::error::AdapterError;
use crate::rate_limit::RateLimiter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
    pub rate_limit_per_sec: f64,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            timeout: money_common::config::DEFAULT_ADAPTER_TIMEOUT,
            max_retries: money_common::config::DEFAULT_ADAPTER_MAX_RETRIES,
            base_backoff: Duration::from_millis(200),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            rate_limit_per_sec: 35.0,
        }
    }
}

pub struct HttpAdapter {
    provider: String,
    base_url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
    config: HttpAdapterConfig,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl HttpAdapter {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>, bearer_token: Option<String>, config: HttpAdapterConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            bearer_token,
            client,
            breaker: CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_cooldown),
            limiter: RateLimiter::new(config.rate_limit_per_sec),
            config,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Issues one logical request with retry/breaker/rate-limit applied.
    /// 4xx responses are never retried (§4.X); 5xx and network errors are,
    /// up to `max_retries`, with exponential backoff.
    pub async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
        idempotency_key: Option<&str>,
    ) -> Result<T, AdapterError> {
        if !self.breaker.allow_request() {
            return Err(AdapterError::CircuitOpen { provider: self.provider.clone() });
        }
        if !self.limiter.try_acquire() {
            return Err(AdapterError::RateLimited { provider: self.provider.clone() });
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(method.clone(), path, body, idempotency_key).await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    if e.is_retryable() && attempt <= self.config.max_retries {
                        let delay = self.config.base_backoff * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
        idempotency_key: Option<&str>,
    ) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| AdapterError::Network {
            provider: self.provider.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let provider_code = body.get("code").and_then(|v| v.as_str()).map(str::to_string);
            let message = body
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} returned HTTP {status}", self.provider));
            return Err(AdapterError::Http {
                provider: self.provider.clone(),
                status,
                provider_code,
                message,
                retry_after_secs,
            });
        }

        response.json::<T>().await.map_err(|e| AdapterError::Decode {
            provider: self.provider.clone(),
            message: e.to_string(),
        })
    }
}
