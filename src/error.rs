//! Error types.
//!
//! [`GuardError`] covers faults in the guard's own machinery (config, I/O,
//! exporter setup). [`Rejection`] is not an error in that sense: it is the
//! well-formed refusal a pipeline stage hands back to the caller, carrying
//! the HTTP status and JSON body to send.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::security::rate_limit::RateLimitExceeded;

/// Internal faults.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics exporter error: {0}")]
    Metrics(String),
}

pub type GuardResult<T> = Result<T, GuardError>;

/// A request refused by one of the pipeline stages.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Rejection {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Attack signature found in the request line.
    pub fn invalid_request() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            json!({ "success": false, "message": "Invalid request detected" }),
        )
    }

    /// Body could not be parsed. `detail` is only exposed outside production.
    pub fn malformed_body(detail: Option<String>) -> Self {
        let mut body = json!({ "success": false, "message": "Invalid request body" });
        if let Some(detail) = detail {
            body["error"] = Value::String(detail);
        }
        Self::new(StatusCode::BAD_REQUEST, body)
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "success": false, "message": "Request body too large" }),
        )
    }

    /// An outbound-URL parameter failed SSRF validation.
    pub fn invalid_url_parameter(parameter: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            json!({
                "success": false,
                "message": "Invalid URL parameter",
                "parameter": parameter,
            }),
        )
    }

    pub fn invalid_origin(reason: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            json!({ "success": false, "message": "Invalid origin", "error": reason }),
        )
    }

    /// Identity is in the suspicious set.
    pub fn suspicious_client() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            json!({
                "success": false,
                "message": "Access temporarily blocked due to suspicious activity",
            }),
        )
    }

    /// 429 with the machine-readable details and `Retry-After`.
    pub fn rate_limited(exceeded: &RateLimitExceeded) -> Self {
        let mut rejection = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            json!({
                "success": false,
                "error": "RATE_LIMIT_EXCEEDED",
                "message": exceeded.message,
                "details": exceeded,
            }),
        );
        rejection.insert_header(header::RETRY_AFTER, exceeded.retry_after.to_string());
        rejection.insert_header("ratelimit-limit", exceeded.limit.to_string());
        rejection.insert_header("ratelimit-remaining", "0".to_string());
        rejection.insert_header("ratelimit-reset", exceeded.retry_after.to_string());
        rejection
    }

    fn insert_header<K>(&mut self, name: K, value: String)
    where
        K: header::IntoHeaderName,
    {
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.headers.insert(name, value);
        }
    }
}
