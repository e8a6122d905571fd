//! Error types for the Tollgate service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised by a rate limit store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the command failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that does not decode into a record
    #[error("Corrupt record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit store errors
    #[error("Rate limit store error: {0}")]
    Store(#[from] StoreError),

    /// Upstream forwarding errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(e: config::ConfigError) -> Self {
        TollgateError::Config(e.to_string())
    }
}

impl IntoResponse for TollgateError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            TollgateError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "Rate limiter unavailable"),
            TollgateError::Upstream(_) => (StatusCode::BAD_GATEWAY, "Upstream unavailable"),
            TollgateError::Config(_) | TollgateError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
