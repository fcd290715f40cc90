//! Error taxonomy for the HTTP-facing services.
//!
//! Each variant maps to one status code; the response body is always the
//! `{ "ok": false, "error": "<message>" }` envelope.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Malformed or missing input; the message names the violated constraint.
    #[error("{0}")]
    Validation(String),
    /// Unknown metadata id or similar lookup miss.
    #[error("{0}")]
    NotFound(String),
    /// Ledger RPC, text generation, upload or minting failure.
    #[error("{0}")]
    Upstream(String),
    /// A required environment value is missing or malformed.
    #[error("{0}")]
    Config(String),
}

impl OracleError {
    /// Flatten an `anyhow` chain into an upstream error, keeping every
    /// context layer in the message.
    pub fn upstream(err: anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }

    pub fn missing_env(key: &str) -> Self {
        Self::Config(format!("Missing env: {key}"))
    }
}

impl ResponseError for OracleError {
    fn status_code(&self) -> StatusCode {
        match self {
            OracleError::Validation(_) => StatusCode::BAD_REQUEST,
            OracleError::NotFound(_) => StatusCode::NOT_FOUND,
            OracleError::Upstream(_) | OracleError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "ok": false,
            "error": self.to_string(),
        }))
    }
}
