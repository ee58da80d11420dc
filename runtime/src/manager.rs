//! The session manager: local implementation of [`SessionService`].
//!
//! Every token-addressed call is routed first. If the token's owner is the
//! local node the call runs against the cache and the local [`Storage`];
//! otherwise it is re-issued on the owner's peer client with the forwarded
//! marker set. A forwarded call that lands on a node which does not own the
//! token fails with `FailedPrecondition`; it is never forwarded twice.
//!
//! `Delete` and `List` are not token-addressed and always run on the local
//! shard only.
//!
//! Every call runs under the caller's deadline, when one is set.

use crate::cache::Cache;
use crate::cluster::Cluster;
use crate::metrics::RpcMetrics;
use mnemosyne_core::constants::DEFAULT_LIST_LIMIT;
use mnemosyne_core::rpc::{
    AbandonRequest, AbandonResponse, DeleteRequest, DeleteResponse, ExistsRequest, ExistsResponse,
    GetRequest, ListRequest, ListResponse, ServiceFuture, SessionResponse, SetValueRequest,
    SetValueResponse, StartRequest,
};
use mnemosyne_core::{
    CallContext, ExpiryRange, Session, SessionError, SessionService, Storage, jump, token,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Where a token-addressed call is served.
enum Route {
    Local,
    Remote(Arc<dyn SessionService>),
}

/// Cache, storage and cluster glued into a [`SessionService`].
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    cache: Arc<Cache>,
    cluster: RwLock<Arc<Cluster>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cache", &self.cache)
            .field("cluster", &self.cluster.read())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager serving `cluster` from `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, cache: Arc<Cache>, cluster: Cluster) -> Self {
        Self {
            storage,
            cache,
            cluster: RwLock::new(Arc::new(cluster)),
        }
    }

    /// Install a new membership view.
    ///
    /// Calls already routed keep the view they started with.
    pub fn replace_cluster(&self, cluster: impl Into<Arc<Cluster>>) {
        let cluster = cluster.into();
        tracing::info!(nodes = cluster.len(), "Cluster membership replaced");
        *self.cluster.write() = cluster;
    }

    /// Current membership view.
    #[must_use]
    pub fn cluster(&self) -> Arc<Cluster> {
        Arc::clone(&self.cluster.read())
    }

    /// The session cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// The local storage.
    #[must_use]
    pub const fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn route(
        &self,
        method: &'static str,
        access_token: &str,
        ctx: &CallContext,
    ) -> Result<Route, SessionError> {
        let cluster = self.cluster();
        if cluster.len() <= 1 {
            return Ok(Route::Local);
        }

        let ownership = cluster
            .ownership(access_token)
            .map_err(|e| SessionError::internal("routing failed", e))?;
        if ownership.is_self {
            return Ok(Route::Local);
        }

        let addr = ownership.node.addr();
        if ctx.is_forwarded() {
            return Err(SessionError::FailedPrecondition(format!(
                "it should be final destination of {method} request ({access_token}), but found another node for it: {addr}"
            )));
        }

        let client = ownership.node.client().cloned().ok_or_else(|| {
            SessionError::Unavailable(format!("cluster node {addr} is not connected"))
        })?;
        RpcMetrics::record_forward(method);
        tracing::debug!(method, address = %addr, "Forwarding request to owner");
        Ok(Route::Remote(client))
    }

    async fn observe<T, F>(
        &self,
        method: &'static str,
        ctx: &CallContext,
        call: F,
    ) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        RpcMetrics::record_request(method);
        let result = with_deadline(method, ctx.remaining(), call).await;
        if let Err(err) = &result {
            RpcMetrics::record_error(method, err.code());
            match err {
                SessionError::Internal { debug: cause, .. } => {
                    tracing::error!(
                        method,
                        request_id = ctx.request_id().unwrap_or_default(),
                        error = %cause,
                        "Session request failed"
                    );
                }
                _ => {
                    tracing::debug!(
                        method,
                        request_id = ctx.request_id().unwrap_or_default(),
                        code = err.code().as_str(),
                        error = %err,
                        "Session request rejected"
                    );
                }
            }
        }
        result
    }

    async fn handle_start(
        &self,
        ctx: CallContext,
        request: StartRequest,
    ) -> Result<SessionResponse, SessionError> {
        let mut session = request.session.ok_or_else(SessionError::missing_session)?;
        if session.access_token.is_empty() {
            session.access_token = token::generate_access_token();
        }

        if let Route::Remote(client) = self.route("start", &session.access_token, &ctx)? {
            return client
                .start(
                    ctx.mark_forwarded(),
                    StartRequest {
                        session: Some(session),
                    },
                )
                .await;
        }

        if session.subject_id.is_empty() {
            return Err(SessionError::missing_subject_id());
        }

        let session = self.storage.start(session).await?;
        tracing::debug!(subject_id = %session.subject_id, "Session started");
        Ok(SessionResponse { session })
    }

    async fn handle_get(
        &self,
        ctx: CallContext,
        access_token: String,
    ) -> Result<SessionResponse, SessionError> {
        if access_token.is_empty() {
            return Err(SessionError::missing_access_token());
        }
        if let Route::Remote(client) = self.route("get", &access_token, &ctx)? {
            return client
                .get(ctx.mark_forwarded(), GetRequest { access_token })
                .await;
        }

        let key = jump::sum64(&access_token);
        if let Some(entry) = self.cache.read(key) {
            if entry.is_usable(self.cache.now(), self.cache.ttl()) {
                return Ok(SessionResponse {
                    session: entry.session,
                });
            }
            self.cache.refresh(key);
        }

        let reload = Reload {
            cache: &self.cache,
            key,
            stored: false,
        };
        let session = self.storage.get(access_token).await?;
        reload.store(session.clone());
        Ok(SessionResponse { session })
    }

    async fn handle_exists(
        &self,
        ctx: CallContext,
        access_token: String,
    ) -> Result<ExistsResponse, SessionError> {
        if access_token.is_empty() {
            return Err(SessionError::missing_access_token());
        }
        if let Route::Remote(client) = self.route("exists", &access_token, &ctx)? {
            return client
                .exists(ctx.mark_forwarded(), ExistsRequest { access_token })
                .await;
        }

        let exists = self.storage.exists(access_token).await?;
        Ok(ExistsResponse { exists })
    }

    async fn handle_abandon(
        &self,
        ctx: CallContext,
        access_token: String,
    ) -> Result<AbandonResponse, SessionError> {
        if access_token.is_empty() {
            return Err(SessionError::missing_access_token());
        }
        if let Route::Remote(client) = self.route("abandon", &access_token, &ctx)? {
            return client
                .abandon(ctx.mark_forwarded(), AbandonRequest { access_token })
                .await;
        }

        self.cache.del(jump::sum64(&access_token));
        let abandoned = self.storage.abandon(access_token).await?;
        Ok(AbandonResponse { abandoned })
    }

    async fn handle_set_value(
        &self,
        ctx: CallContext,
        request: SetValueRequest,
    ) -> Result<SetValueResponse, SessionError> {
        if request.access_token.is_empty() {
            return Err(SessionError::missing_access_token());
        }
        if request.key.is_empty() {
            return Err(SessionError::InvalidArgument("missing bag key".to_string()));
        }
        if let Route::Remote(client) =
            self.route("set_value", &request.access_token, &ctx)?
        {
            return client.set_value(ctx.mark_forwarded(), request).await;
        }

        let bag = self
            .storage
            .set_value(request.access_token, request.key, request.value)
            .await?;
        Ok(SetValueResponse { bag })
    }

    async fn handle_delete(&self, request: DeleteRequest) -> Result<DeleteResponse, SessionError> {
        let filter = request.filter();
        if filter.is_empty() {
            return Err(SessionError::InvalidArgument(
                "at least one filter must be provided".to_string(),
            ));
        }
        let count = self.storage.delete(filter).await?;
        tracing::debug!(count, "Sessions deleted");
        Ok(DeleteResponse { count })
    }

    async fn handle_list(&self, request: ListRequest) -> Result<ListResponse, SessionError> {
        let limit = if request.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            request.limit
        };
        let range = request
            .query
            .map_or_else(ExpiryRange::unbounded, ExpiryRange::from);
        let sessions = self.storage.list(request.offset, limit, range).await?;
        Ok(ListResponse { sessions })
    }
}

/// Evicts the entry being reloaded unless a fresh session is stored.
///
/// Dropped without [`Reload::store`] on a storage error or when the
/// deadline cancels the reload.
struct Reload<'a> {
    cache: &'a Cache,
    key: u64,
    stored: bool,
}

impl Reload<'_> {
    fn store(mut self, session: Session) {
        self.cache.put(self.key, session);
        self.stored = true;
    }
}

impl Drop for Reload<'_> {
    fn drop(&mut self) {
        if !self.stored {
            self.cache.del(self.key);
        }
    }
}

/// Run `call`, giving up once `remaining` has elapsed.
async fn with_deadline<T, F>(
    method: &'static str,
    remaining: Option<Duration>,
    call: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    let exceeded = || SessionError::DeadlineExceeded(format!("{method}: deadline exceeded"));
    match remaining {
        None => call.await,
        Some(left) if left.is_zero() => Err(exceeded()),
        Some(left) => tokio::time::timeout(left, call)
            .await
            .unwrap_or_else(|_| Err(exceeded())),
    }
}

impl SessionService for SessionManager {
    fn start(&self, ctx: CallContext, request: StartRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            self.observe("start", &ctx.clone(), self.handle_start(ctx, request))
                .await
        })
    }

    fn get(&self, ctx: CallContext, request: GetRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            self.observe("get", &ctx.clone(), self.handle_get(ctx, request.access_token))
                .await
        })
    }

    fn context(&self, ctx: CallContext) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move {
            let call = async {
                let access_token = ctx
                    .access_token()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        SessionError::InvalidArgument(
                            "missing access token in metadata".to_string(),
                        )
                    })?;
                self.handle_get(ctx.clone(), access_token).await
            };
            self.observe("context", &ctx, call).await
        })
    }

    fn exists(&self, ctx: CallContext, request: ExistsRequest) -> ServiceFuture<'_, ExistsResponse> {
        Box::pin(async move {
            self.observe(
                "exists",
                &ctx.clone(),
                self.handle_exists(ctx, request.access_token),
            )
            .await
        })
    }

    fn abandon(
        &self,
        ctx: CallContext,
        request: AbandonRequest,
    ) -> ServiceFuture<'_, AbandonResponse> {
        Box::pin(async move {
            self.observe(
                "abandon",
                &ctx.clone(),
                self.handle_abandon(ctx, request.access_token),
            )
            .await
        })
    }

    fn set_value(
        &self,
        ctx: CallContext,
        request: SetValueRequest,
    ) -> ServiceFuture<'_, SetValueResponse> {
        Box::pin(async move {
            self.observe("set_value", &ctx.clone(), self.handle_set_value(ctx, request))
                .await
        })
    }

    fn delete(&self, ctx: CallContext, request: DeleteRequest) -> ServiceFuture<'_, DeleteResponse> {
        Box::pin(async move { self.observe("delete", &ctx, self.handle_delete(request)).await })
    }

    fn list(&self, ctx: CallContext, request: ListRequest) -> ServiceFuture<'_, ListResponse> {
        Box::pin(async move { self.observe("list", &ctx, self.handle_list(request)).await })
    }
}
