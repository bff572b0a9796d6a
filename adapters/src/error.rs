// Structured adapter errors (§4.X). Every adapter returns this instead of
// a raw `reqwest::Error` so the Worker Runtime's failure classifier and
// the service-layer `money_common::Error` conversion both have a single,
// uniform shape to read.

use money_common::Error;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("{provider} returned HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        provider_code: Option<String>,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: String },

    #[error("rate limit exceeded for {provider}")]
    RateLimited { provider: String },

    #[error("failed to decode {provider} response: {message}")]
    Decode { provider: String, message: String },
}

impl AdapterError {
    /// Consulted by the Worker Runtime's classifier (§4.W) exactly the
    /// same way it consults `money_common::Error::retryable()`.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Http { status, .. } => *status >= 500 || *status == 429,
            AdapterError::Network { .. } => true,
            AdapterError::CircuitOpen { .. } => true,
            AdapterError::RateLimited { .. } => true,
            AdapterError::Decode { .. } => false,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            AdapterError::Http { provider, .. }
            | AdapterError::Network { provider, .. }
            | AdapterError::CircuitOpen { provider }
            | AdapterError::RateLimited { provider }
            | AdapterError::Decode { provider, .. } => provider,
        }
    }
}

impl From<AdapterError> for Error {
    fn from(e: AdapterError) -> Self {
        match &e {
            AdapterError::Http { status, message, .. } if *status == 429 => {
                Error::RateLimit { message: message.clone(), retry_after_secs: None }
            }
            AdapterError::Http { status, message, .. } if *status >= 500 => {
                Error::service_unavailable(message.clone())
            }
            AdapterError::Http { status, message, .. } if *status >= 400 => {
                Error::validation(message.clone())
            }
            AdapterError::RateLimited { provider } => {
                Error::RateLimit { message: format!("{provider} rate limit exceeded"), retry_after_secs: None }
            }
            AdapterError::CircuitOpen { provider } => {
                Error::service_unavailable(format!("circuit breaker open for {provider}"))
            }
            AdapterError::Network { message, .. } => Error::service_unavailable(message.clone()),
            AdapterError::Decode { message, .. } => Error::internal(message.clone()),
            _ => Error::service_unavailable(e.to_string()),
        }
    }
}
