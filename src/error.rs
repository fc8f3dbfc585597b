//! Error handling for camtuned

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport unreachable (socket fault, reconnect failed)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Camera refused a value at the protocol level (not retried)
    #[error("Camera rejected {parameter}: {message}")]
    ProtocolRejected { parameter: String, message: String },

    /// No response within the protocol deadline after all retries
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No candidate parameter has headroom in the needed direction.
    /// Soft condition: logged, the cycle continues.
    #[error("No suitable parameter for feature '{0}'")]
    NoSuitableParameter(String),

    /// Invalid cost/hysteresis/concurrency configuration.
    /// Fatal at startup, never raised at runtime.
    #[error("Config error: {0}")]
    Config(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Connection(msg) => (StatusCode::BAD_GATEWAY, "CONNECTION_ERROR", msg.clone()),
            Error::ProtocolRejected { parameter, message } => (
                StatusCode::BAD_GATEWAY,
                "PROTOCOL_REJECTED",
                format!("{}: {}", parameter, message),
            ),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::NoSuitableParameter(msg) => (
                StatusCode::CONFLICT,
                "NO_SUITABLE_PARAMETER",
                msg.clone(),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
