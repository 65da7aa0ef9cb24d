/// Unified error types for the CarePath portal
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// When set, internal error details are returned to clients (development mode only)
static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Toggle whether internal error details reach HTTP clients
pub fn set_expose_internal_details(expose: bool) {
    EXPOSE_INTERNAL_DETAILS.store(expose, Ordering::Relaxed);
}

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Malformed input: time format, status enum, missing field
    #[error("{0}")]
    Validation(String),

    /// Referenced account, profile, session or message is absent
    #[error("{0}")]
    NotFound(String),

    /// Scheduling overlap, unavailable slot or duplicate enrollment
    #[error("{0}")]
    Conflict(String),

    /// Missing, invalid or expired credential
    #[error("{0}")]
    Unauthorized(String),

    /// Wrong role, missing permission or suspended account
    #[error("{0}")]
    Forbidden(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Stable machine-readable kind used in response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::Validation(_) => "ValidationError",
            PortalError::NotFound(_) => "NotFoundError",
            PortalError::Conflict(_) => "ConflictError",
            PortalError::Unauthorized(_) => "UnauthorizedError",
            PortalError::Forbidden(_) => "ForbiddenError",
            PortalError::RateLimitExceeded { .. } => "RateLimitExceeded",
            PortalError::Database(_) | PortalError::Io(_) | PortalError::Internal(_) => {
                "InternalServerError"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PortalError::Validation(_) => StatusCode::BAD_REQUEST,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::Conflict(_) => StatusCode::CONFLICT,
            PortalError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
            PortalError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PortalError::Database(_) | PortalError::Io(_) | PortalError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert PortalError to HTTP response
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            PortalError::Database(_) | PortalError::Io(_) | PortalError::Internal(_) => {
                tracing::error!("Internal failure: {}", self);
                if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) {
                    self.to_string()
                } else {
                    "Internal server error".to_string() // Don't leak details
                }
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for portal operations
pub type PortalResult<T> = Result<T, PortalError>;
