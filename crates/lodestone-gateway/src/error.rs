//! API error types and responses.
//!
//! Every error renders as `{"error": {"code": ..., "message": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use lodestone_control::ControlError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation needs a live server.
    #[error("{0}")]
    NotLive(String),

    /// The request conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No capacity to run another server.
    #[error("{0}")]
    Capacity(String),

    /// A dependency could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A dependency did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A dependency answered with an error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotLive(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Capacity(_) | Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::NotLive(_) => "server_not_live",
            Self::Conflict(_) => "conflict",
            Self::Capacity(_) => "capacity",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::ServerNotFound(id) => Self::NotFound(format!("server {id}")),
            ControlError::ServerNotLive(_) => Self::NotLive(err.to_string()),
            ControlError::InvalidState { from, to, .. } => {
                Self::Conflict(format!("cannot transition from {from:?} to {to:?}"))
            }
            ControlError::InvalidRequest(msg) => Self::BadRequest(msg),
            ControlError::Capacity(_) => Self::Capacity(err.to_string()),
            ControlError::Unreachable(msg) => Self::Unavailable(msg),
            ControlError::Timeout(msg) => Self::Timeout(msg),
            ControlError::LaunchFailed { .. }
            | ControlError::Authentication
            | ControlError::Protocol(_)
            | ControlError::Launcher(_) => {
                tracing::error!(error = %err, "Upstream error");
                Self::Upstream(err.to_string())
            }
            ControlError::Store(ref store_err) if store_err.is_conflict() => {
                Self::Conflict("server changed concurrently, retry".to_string())
            }
            ControlError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store error");
                Self::Internal("storage error".to_string())
            }
            ControlError::IncompleteCleanup { .. } => {
                tracing::error!(error = %err, "Teardown incomplete");
                Self::Internal(err.to_string())
            }
            ControlError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
        }
    }
}
