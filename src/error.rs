//! Per-request error taxonomy.
//!
//! Configuration problems live in [`crate::config::ConfigError`] and stop
//! the process before it serves anything. Everything here ends one request.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Seconds a client should wait before retrying after a backend failure.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no route for {0}")]
    NoRoute(String),

    #[error("{0}")]
    ClientInput(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("request not trusted: {0}")]
    Untrusted(&'static str),

    #[error("{message}")]
    QuotaExceeded { message: String },

    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("backend {backend} did not respond within {secs}s")]
    BackendTimeout { backend: String, secs: u64 },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::ClientInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Untrusted(_) => StatusCode::FORBIDDEN,
            ProxyError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BackendTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the client may retry and expect a different backend.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::BackendUnavailable { .. } | ProxyError::BackendTimeout { .. }
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ProxyError::QuotaExceeded { message } => json!({
                "message": message,
                "credits_remaining": 0,
            }),
            ProxyError::BackendUnavailable { .. } | ProxyError::BackendTimeout { .. } => json!({
                "message": "The service is temporarily unavailable. Please try again.",
                "retryable": true,
            }),
            other => json!({ "message": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
