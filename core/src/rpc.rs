//! Request/response messages and the session service contract.
//!
//! [`SessionService`] is implemented twice: by the session manager, which
//! serves calls locally, and by the HTTP peer client, which re-issues them
//! against another node. Forwarding is therefore just "call the same trait
//! on a different implementation".

use crate::context::CallContext;
use crate::error::SessionError;
use crate::session::{Bag, NewSession, Session};
use crate::storage::{ExpiryRange, SessionFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`SessionService`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Create a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Session fields; required.
    pub session: Option<NewSession>,
}

/// Fetch a session by token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRequest {
    /// Token to look up.
    pub access_token: String,
}

/// Probe for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExistsRequest {
    /// Token to look up.
    pub access_token: String,
}

/// Delete one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbandonRequest {
    /// Token to delete.
    pub access_token: String,
}

/// Merge one key into a session bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetValueRequest {
    /// Session to update.
    pub access_token: String,
    /// Bag key; required.
    pub key: String,
    /// Bag value.
    pub value: String,
}

/// Delete every session matching all given filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRequest {
    /// Match this subject.
    pub subject_id: String,
    /// Match this token.
    pub access_token: String,
    /// Match this refresh token.
    pub refresh_token: String,
    /// Match sessions expiring after this instant.
    pub expire_at_from: Option<DateTime<Utc>>,
    /// Match sessions expiring before this instant.
    pub expire_at_to: Option<DateTime<Utc>>,
}

impl DeleteRequest {
    /// Storage filter equivalent to this request.
    #[must_use]
    pub fn filter(&self) -> SessionFilter {
        SessionFilter::new()
            .subject_id(self.subject_id.clone())
            .access_token(self.access_token.clone())
            .refresh_token(self.refresh_token.clone())
            .expire_from(self.expire_at_from)
            .expire_to(self.expire_at_to)
    }
}

/// Expiry window for [`ListRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    /// Sessions expiring after this instant.
    pub expire_at_from: Option<DateTime<Utc>>,
    /// Sessions expiring before this instant.
    pub expire_at_to: Option<DateTime<Utc>>,
}

impl From<ListQuery> for ExpiryRange {
    fn from(query: ListQuery) -> Self {
        Self {
            from: query.expire_at_from,
            to: query.expire_at_to,
        }
    }
}

/// Page through sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRequest {
    /// Rows to skip.
    pub offset: i64,
    /// Page size; `0` means the default of 10.
    pub limit: i64,
    /// Optional expiry window.
    pub query: Option<ListQuery>,
}

/// A single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// The session.
    pub session: Session,
}

/// Result of `Exists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResponse {
    /// Whether a live session matched.
    pub exists: bool,
}

/// Result of `Abandon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonResponse {
    /// Whether a session was deleted.
    pub abandoned: bool,
}

/// Result of `SetValue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValueResponse {
    /// Full bag after the merge.
    pub bag: Bag,
}

/// Result of `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Number of sessions removed.
    pub count: u64,
}

/// Result of `List`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// One page of sessions.
    pub sessions: Vec<Session>,
}

/// The session RPC surface.
///
/// Every method takes the caller's [`CallContext`]; implementations must
/// finish before its deadline and propagate it on forwards.
pub trait SessionService: Send + Sync {
    /// Create a session, generating a token when none is given.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a missing session or subject id.
    fn start(&self, ctx: CallContext, request: StartRequest) -> ServiceFuture<'_, SessionResponse>;

    /// Fetch a session and slide its expiry.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty token, `NotFound` for an unknown one.
    fn get(&self, ctx: CallContext, request: GetRequest) -> ServiceFuture<'_, SessionResponse>;

    /// Fetch the session named by the ambient `authorization` token.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the metadata carries no token, otherwise as [`SessionService::get`].
    fn context(&self, ctx: CallContext) -> ServiceFuture<'_, SessionResponse>;

    /// Whether a session exists.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty token.
    fn exists(&self, ctx: CallContext, request: ExistsRequest) -> ServiceFuture<'_, ExistsResponse>;

    /// Delete one session.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty token, `NotFound` if nothing was deleted.
    fn abandon(&self, ctx: CallContext, request: AbandonRequest)
    -> ServiceFuture<'_, AbandonResponse>;

    /// Merge one key into a session bag.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty token or key, `NotFound` for an unknown token.
    fn set_value(
        &self,
        ctx: CallContext,
        request: SetValueRequest,
    ) -> ServiceFuture<'_, SetValueResponse>;

    /// Delete every session matching all filters on this node.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when every filter is empty.
    fn delete(&self, ctx: CallContext, request: DeleteRequest) -> ServiceFuture<'_, DeleteResponse>;

    /// Page through this node's sessions.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative limit or offset.
    fn list(&self, ctx: CallContext, request: ListRequest) -> ServiceFuture<'_, ListResponse>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn delete_request_ignores_empty_fields() {
        assert!(DeleteRequest::default().filter().is_empty());

        let request = DeleteRequest {
            subject_id: "alice".into(),
            ..DeleteRequest::default()
        };
        let filter = request.filter();
        assert_eq!(filter.subject_id_value(), Some("alice"));
        assert_eq!(filter.access_token_value(), None);
    }

    #[test]
    fn list_request_fields_are_optional() {
        let request: ListRequest = serde_json::from_str(r#"{"offset":2}"#).unwrap();
        assert_eq!(request.offset, 2);
        assert_eq!(request.limit, 0);
        assert!(request.query.is_none());
    }

    #[test]
    fn start_request_without_session_parses() {
        let request: StartRequest = serde_json::from_str("{}").unwrap();
        assert!(request.session.is_none());
    }
}
