use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for both pipelines.
///
/// `Validation` is the caller's fault and recoverable; the stage errors
/// (`Embedding`, `Rewrite`, `Scrape`) mean an upstream dependency answered
/// but gave us nothing usable; `Upstream` carries an explicit status/code
/// reported by a provider and is passed through to the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    Validation(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("rewrite failed: {0}")]
    Rewrite(String),
    #[error("scrape failed: {0}")]
    Scrape(String),
    #[error("upstream error {status}: {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    /// Transport-level failure talking to an upstream service. No status was
    /// reported, so the default 500 applies.
    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Upstream {
            status: 500,
            code: None,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Rewrite(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to generate modified prompt" }),
            ),
            ApiError::Upstream {
                status,
                code,
                message,
            } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                json!({ "error": format!("API Error: {}", message), "code": code }),
            ),
            ApiError::Embedding(msg) | ApiError::Scrape(msg) | ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error", "message": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
