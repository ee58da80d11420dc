//! Error types for web handlers.
//!
//! [`AppError`] turns a [`SessionError`] into an HTTP status plus the JSON
//! body `{"code": "...", "message": "..."}`. The peer client reads the same
//! body back with [`ErrorBody::into_session_error`], so an error crosses a
//! forward with its code intact.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mnemosyne_core::{ErrorCode, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP status for an error code.
#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error response body (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code, e.g. `NOT_FOUND`.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorBody {
    /// Rebuild the error a remote node reported.
    ///
    /// Unknown codes are treated as internal errors.
    #[must_use]
    pub fn into_session_error(self) -> SessionError {
        match ErrorCode::parse(&self.code) {
            Some(code) => SessionError::from_code(code, self.message),
            None => SessionError::internal(
                "unexpected peer error",
                format!("[{}] {}", self.code, self.message),
            ),
        }
    }
}

/// Application error type for web handlers.
///
/// Built from a [`SessionError`]; the message of an internal error is the
/// safe one unless the deployment exposes debug text.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error code (for client error handling)
    code: ErrorCode,
    /// Error message (user-facing)
    message: String,
    /// Raw cause of an internal error, for logging only
    debug: Option<String>,
}

impl AppError {
    /// Map a session error, choosing which internal message to return.
    #[must_use]
    pub fn from_session(err: &SessionError, expose_debug: bool) -> Self {
        let code = err.code();
        let debug = match err {
            SessionError::Internal { debug, .. } => Some(debug.clone()),
            _ => None,
        };
        Self {
            status: status_for(code),
            code,
            message: err.message(expose_debug).to_string(),
            debug,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: ErrorCode::InvalidArgument,
            message: message.into(),
            debug: None,
        }
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Error code of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log internal errors
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                error = self.debug.as_deref().unwrap_or_default(),
                "Session request failed"
            );
        }

        let body = ErrorBody {
            code: self.code.as_str().to_string(),
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}
