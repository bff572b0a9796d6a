// Single domain error type shared by every service crate. Adapters (§4.X)
// have their own AdapterError and convert into this one at the service
// boundary; that keeps "is this retryable" and "what HTTP status does this
// map to" defined in exactly one place instead of once per crate.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String, details: Option<Value> },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Conflict { message: String, details: Option<Value> },

    #[error("{message}")]
    Auth { message: String },

    #[error("{message}")]
    RateLimit { message: String, retry_after_secs: Option<u64> },

    #[error("{message}")]
    ServiceUnavailable { message: String },

    #[error("{message}")]
    Internal { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into(), details: None }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Error::Validation { message: message.into(), details: Some(details) }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict { message: message.into(), details: None }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal { message: message.into() }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Error::ServiceUnavailable { message: message.into() }
    }

    /// Matches the well-known codes in §6 of the spec.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "INVALID_REQUEST",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Conflict { .. } => "CONFLICT",
            Error::Auth { .. } => "UNAUTHORIZED",
            Error::RateLimit { .. } => "RATE_LIMITED",
            Error::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::Auth { .. } => 401,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 409,
            Error::RateLimit { .. } => 429,
            Error::ServiceUnavailable { .. } => 503,
            Error::Internal { .. } => 500,
        }
    }

    /// Consulted by the Worker Runtime's failure classifier (§4.W).
    /// Money-bearing paths fail closed: anything not explicitly
    /// transient is treated as terminal.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::RateLimit { .. } | Error::ServiceUnavailable { .. })
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Error::Validation { details, .. } | Error::Conflict { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

#[cfg(feature = "actix")]
mod actix_support {
    use super::Error;
    use actix_web::{http::StatusCode, HttpResponse, ResponseError};
    use serde_json::json;

    impl ResponseError for Error {
        fn status_code(&self) -> StatusCode {
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }

        fn error_response(&self) -> HttpResponse {
            // The envelope exposes `code` and `message` but never the cause
            // chain or internal metadata (§7 "user-visible behavior").
            let mut body = json!({
                "code": self.code(),
                "message": self.to_string(),
            });
            if let Some(details) = self.details() {
                body["details"] = details.clone();
            }
            HttpResponse::build(self.status_code()).json(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_taxonomy() {
        assert!(Error::service_unavailable("down").retryable());
        assert!(Error::RateLimit { message: "slow down".into(), retry_after_secs: Some(1) }.retryable());
        assert!(!Error::validation("bad").retryable());
        assert!(!Error::not_found("missing").retryable());
        assert!(!Error::conflict("dup").retryable());
        assert!(!Error::internal("invariant broken").retryable());
    }

    #[test]
    fn http_status_maps_deterministically() {
        assert_eq!(Error::validation("x").http_status(), 400);
        assert_eq!(Error::not_found("x").http_status(), 404);
        assert_eq!(Error::conflict("x").http_status(), 409);
        assert_eq!(Error::internal("x").http_status(), 500);
    }
}
