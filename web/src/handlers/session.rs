//! Session RPC endpoints.
//!
//! One `POST /v1/session/<op>` route per [`SessionService`] method. Each
//! handler only moves data between HTTP and the manager: the body becomes
//! the request struct, headers become the [`CallContext`](mnemosyne_core::CallContext),
//! and the result or error becomes the response.

use crate::error::AppError;
use crate::extractors::{CallMetadata, JsonBody};
use crate::state::AppState;
use axum::{Json, extract::State};
use mnemosyne_core::SessionService;
use mnemosyne_core::rpc::{
    AbandonRequest, AbandonResponse, DeleteRequest, DeleteResponse, ExistsRequest, ExistsResponse,
    GetRequest, ListRequest, ListResponse, SessionResponse, SetValueRequest, SetValueResponse,
    StartRequest,
};

/// Result type of the session handlers.
pub type RpcResult<T> = Result<Json<T>, AppError>;

/// `POST /v1/session/start`
pub async fn start(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<StartRequest>,
) -> RpcResult<SessionResponse> {
    state
        .manager
        .start(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/get`
pub async fn get(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<GetRequest>,
) -> RpcResult<SessionResponse> {
    state
        .manager
        .get(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/context`
///
/// Takes no body; the token comes from the `authorization` header.
pub async fn context(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
) -> RpcResult<SessionResponse> {
    state
        .manager
        .context(ctx)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/exists`
pub async fn exists(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<ExistsRequest>,
) -> RpcResult<ExistsResponse> {
    state
        .manager
        .exists(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/abandon`
pub async fn abandon(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<AbandonRequest>,
) -> RpcResult<AbandonResponse> {
    state
        .manager
        .abandon(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/set_value`
pub async fn set_value(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<SetValueRequest>,
) -> RpcResult<SetValueResponse> {
    state
        .manager
        .set_value(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/delete`
pub async fn delete(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<DeleteRequest>,
) -> RpcResult<DeleteResponse> {
    state
        .manager
        .delete(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}

/// `POST /v1/session/list`
pub async fn list(
    State(state): State<AppState>,
    CallMetadata(ctx): CallMetadata,
    JsonBody(request): JsonBody<ListRequest>,
) -> RpcResult<ListResponse> {
    state
        .manager
        .list(ctx, request)
        .await
        .map(Json)
        .map_err(|e| state.error(&e))
}
