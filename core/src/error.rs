//! Error types.
//!
//! Storage implementations return [`StorageError`]. The session manager and
//! every transport speak [`SessionError`], the taxonomy reported to callers.
//! `From<StorageError> for SessionError` is the single place where storage
//! sentinels become caller-facing kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors returned by a [`Storage`](crate::storage::Storage) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No live session matches the access token.
    #[error("session not found")]
    SessionNotFound,

    /// The access token argument was empty.
    #[error("missing access token")]
    MissingAccessToken,

    /// A caller-supplied argument is unusable (limit, filters).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bag encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Query or connection failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Stable, transport-independent error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller omitted or malformed a required field.
    InvalidArgument,
    /// The referenced session does not exist.
    NotFound,
    /// A forwarded request reached a node that does not own the token.
    FailedPrecondition,
    /// The caller's deadline elapsed.
    DeadlineExceeded,
    /// The owning peer could not be reached.
    Unavailable,
    /// Anything unclassified.
    Internal,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Parse the wire representation. Unknown codes yield `None`.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "INVALID_ARGUMENT" => Some(Self::InvalidArgument),
            "NOT_FOUND" => Some(Self::NotFound),
            "FAILED_PRECONDITION" => Some(Self::FailedPrecondition),
            "DEADLINE_EXCEEDED" => Some(Self::DeadlineExceeded),
            "UNAVAILABLE" => Some(Self::Unavailable),
            "INTERNAL" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported to callers of a [`SessionService`](crate::rpc::SessionService).
///
/// `Internal` carries two messages: `safe` is always fine to return to an
/// untrusted caller, `debug` holds the raw cause and is only exposed when the
/// deployment opts in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Required field missing or malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// Session deleted, expired or never created.
    #[error("{0}")]
    NotFound(String),

    /// Request forwarded to a node that is not the owner.
    #[error("{0}")]
    FailedPrecondition(String),

    /// Caller's deadline elapsed.
    #[error("{0}")]
    DeadlineExceeded(String),

    /// Owning peer unreachable.
    #[error("{0}")]
    Unavailable(String),

    /// Unclassified storage or transport failure.
    #[error("{safe}")]
    Internal {
        /// Message safe to show to any caller.
        safe: String,
        /// Raw cause, for logs and debug deployments.
        debug: String,
    },
}

impl SessionError {
    /// The access token argument or metadata was empty.
    #[must_use]
    pub fn missing_access_token() -> Self {
        Self::InvalidArgument("missing access token".to_string())
    }

    /// `Start` was called without a session.
    #[must_use]
    pub fn missing_session() -> Self {
        Self::InvalidArgument("missing session".to_string())
    }

    /// `Start` was called without a subject id.
    #[must_use]
    pub fn missing_subject_id() -> Self {
        Self::InvalidArgument("missing subject id".to_string())
    }

    /// Build an internal error from a safe message and a raw cause.
    #[must_use]
    pub fn internal(safe: impl Into<String>, debug: impl fmt::Display) -> Self {
        Self::Internal {
            safe: safe.into(),
            debug: debug.to_string(),
        }
    }

    /// Error code of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Message to return to the caller.
    ///
    /// For `Internal`, the debug text is returned only if `expose_debug` is set.
    #[must_use]
    pub fn message(&self, expose_debug: bool) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::NotFound(m)
            | Self::FailedPrecondition(m)
            | Self::DeadlineExceeded(m)
            | Self::Unavailable(m) => m,
            Self::Internal { safe, debug } => {
                if expose_debug {
                    debug
                } else {
                    safe
                }
            }
        }
    }

    /// Rebuild an error received from a remote node.
    #[must_use]
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::InvalidArgument => Self::InvalidArgument(message),
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::FailedPrecondition => Self::FailedPrecondition(message),
            ErrorCode::DeadlineExceeded => Self::DeadlineExceeded(message),
            ErrorCode::Unavailable => Self::Unavailable(message),
            ErrorCode::Internal => Self::Internal {
                safe: message.clone(),
                debug: message,
            },
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SessionNotFound => Self::NotFound("session not found".to_string()),
            StorageError::MissingAccessToken => Self::missing_access_token(),
            StorageError::InvalidArgument(message) => Self::InvalidArgument(message),
            StorageError::Serialization(_) | StorageError::Database(_) => {
                Self::internal("internal storage error", err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_sentinels_keep_their_kind() {
        assert_eq!(
            SessionError::from(StorageError::SessionNotFound).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            SessionError::from(StorageError::MissingAccessToken).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            SessionError::from(StorageError::InvalidArgument("limit".into())),
            SessionError::InvalidArgument("limit".into())
        );
    }

    #[test]
    fn database_errors_hide_raw_text() {
        let err = SessionError::from(StorageError::Database(
            "duplicate key value violates unique constraint".into(),
        ));
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.message(false), "internal storage error");
        assert!(err.message(true).contains("duplicate key"));
        assert_eq!(err.to_string(), "internal storage error");
    }

    #[test]
    fn codes_parse_back() {
        for code in [
            ErrorCode::InvalidArgument,
            ErrorCode::NotFound,
            ErrorCode::FailedPrecondition,
            ErrorCode::DeadlineExceeded,
            ErrorCode::Unavailable,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("TEAPOT"), None);
    }

    #[test]
    fn remote_errors_are_rebuilt_by_code() {
        let err = SessionError::from_code(ErrorCode::FailedPrecondition, "not owner".into());
        assert_eq!(err, SessionError::FailedPrecondition("not owner".into()));
    }
}
