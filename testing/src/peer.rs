//! Stand-in for a remote cluster node.

use chrono::Utc;
use mnemosyne_core::rpc::{
    AbandonRequest, AbandonResponse, DeleteRequest, DeleteResponse, ExistsRequest, ExistsResponse,
    GetRequest, ListRequest, ListResponse, ServiceFuture, SessionResponse, SetValueRequest,
    SetValueResponse, StartRequest,
};
use mnemosyne_core::{Bag, CallContext, NewSession, SessionError, SessionService};
use std::sync::{Arc, Mutex, PoisonError};

/// One call received by a [`RecordingPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCall {
    /// Operation name, e.g. `"get"`.
    pub method: &'static str,
    /// Token the call was about, if any.
    pub access_token: Option<String>,
    /// Whether the caller marked the call as forwarded.
    pub forwarded: bool,
    /// Whether the caller propagated a deadline.
    pub has_deadline: bool,
}

/// [`SessionService`] that records every call and answers with canned data.
///
/// Sessions it returns carry `subject_id = "peer:<addr>"` so tests can tell
/// a forwarded answer from a local one.
#[derive(Debug, Clone)]
pub struct RecordingPeer {
    addr: String,
    calls: Arc<Mutex<Vec<PeerCall>>>,
    failure: Option<SessionError>,
}

impl RecordingPeer {
    /// Peer that answers every call successfully.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    /// Peer that records calls and fails each of them with `error`.
    #[must_use]
    pub fn failing_with(mut self, error: SessionError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Address this peer pretends to listen on.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subject(&self) -> String {
        format!("peer:{}", self.addr)
    }

    fn record(
        &self,
        method: &'static str,
        access_token: Option<&str>,
        ctx: &CallContext,
    ) -> Result<(), SessionError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PeerCall {
                method,
                access_token: access_token.map(str::to_string),
                forwarded: ctx.is_forwarded(),
                has_deadline: ctx.deadline().is_some(),
            });
        self.failure.clone().map_or(Ok(()), Err)
    }

    fn session(&self, access_token: &str) -> SessionResponse {
        SessionResponse {
            session: NewSession::for_subject(self.subject())
                .with_access_token(access_token)
                .into_session(Utc::now()),
        }
    }
}

impl SessionService for RecordingPeer {
    fn start(&self, ctx: CallContext, request: StartRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            let session = request.session.ok_or_else(SessionError::missing_session)?;
            self.record("start", Some(&session.access_token), &ctx)?;
            Ok(SessionResponse {
                session: session.into_session(Utc::now()),
            })
        })
    }

    fn get(&self, ctx: CallContext, request: GetRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            self.record("get", Some(&request.access_token), &ctx)?;
            Ok(self.session(&request.access_token))
        })
    }

    fn context(&self, ctx: CallContext) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            let access_token = ctx.access_token().unwrap_or_default().to_string();
            self.record("context", Some(&access_token), &ctx)?;
            Ok(self.session(&access_token))
        })
    }

    fn exists(&self, ctx: CallContext, request: ExistsRequest) -> ServiceFuture<'_, ExistsResponse> {
        Box::pin(async move {
            self.record("exists", Some(&request.access_token), &ctx)?;
            Ok(ExistsResponse { exists: true })
        })
    }

    fn abandon(
        &self,
        ctx: CallContext,
        request: AbandonRequest,
    ) -> ServiceFuture<'_, AbandonResponse> {
        Box::pin(async move {
            self.record("abandon", Some(&request.access_token), &ctx)?;
            Ok(AbandonResponse { abandoned: true })
        })
    }

    fn set_value(
        &self,
        ctx: CallContext,
        request: SetValueRequest,
    ) -> ServiceFuture<'_, SetValueResponse> {
        Box::pin(async move {
            self.record("set_value", Some(&request.access_token), &ctx)?;
            Ok(SetValueResponse {
                bag: Bag::from_iter([(request.key, request.value)]),
            })
        })
    }

    fn delete(&self, ctx: CallContext, _request: DeleteRequest) -> ServiceFuture<'_, DeleteResponse> {
        Box::pin(async move {
            self.record("delete", None, &ctx)?;
            Ok(DeleteResponse { count: 0 })
        })
    }

    fn list(&self, ctx: CallContext, _request: ListRequest) -> ServiceFuture<'_, ListResponse> {
        Box::pin(async move {
            self.record("list", None, &ctx)?;
            Ok(ListResponse {
                sessions: Vec::new(),
            })
        })
    }
}
