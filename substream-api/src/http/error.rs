// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status and a stable machine-readable code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMS", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error envelope: `{error, code, details?}`
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

/// Translate core errors to the HTTP envelope
impl From<substream_core::Error> for AppError {
    fn from(err: substream_core::Error) -> Self {
        use substream_core::Error;

        match err {
            Error::Unauthenticated(msg) => Self::unauthorized(msg),
            Error::Forbidden(msg) => Self::forbidden(msg),
            Error::NotFound(msg) => Self::not_found(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::SessionAlreadyActive {
                channel_id,
                session_id,
            } => Self::new(
                StatusCode::CONFLICT,
                "SESSION_ALREADY_ACTIVE",
                "A live session is already active for this channel",
            )
            .with_details(serde_json::json!({
                "channelId": channel_id,
                "sessionId": session_id,
            })),
            Error::ResourceExhausted(msg) => {
                tracing::error!("Resource exhausted: {msg}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "RESOURCE_EXHAUSTED",
                    "No streaming capacity available, try again shortly",
                )
            }
            Error::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "Upstream provider error",
                )
            }
            Error::Database(e) => {
                tracing::error!("Database error: {e}");
                Self::internal("Database error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {e}");
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                Self::internal("Internal server error")
            }
        }
    }
}
