//! HTTP/JSON transport for the mnemosyne session store.
//!
//! The server side is an axum [`Router`] serving every session operation at
//! `POST /v1/session/<op>` plus `/health`, `/ready` and `/metrics`. The client
//! side is [`HttpSessionClient`], which speaks the same protocol and is what
//! a node uses to forward calls to the owner of a token.
//!
//! # Request Flow
//!
//! 1. The request id layer picks or generates `x-request-id` and opens the `rpc` span
//! 2. [`CallMetadata`] turns headers into a [`CallContext`](mnemosyne_core::CallContext)
//! 3. [`JsonBody`] parses the request struct
//! 4. The handler calls the [`SessionManager`](mnemosyne_runtime::SessionManager)
//! 5. The result becomes JSON, or [`AppError`] maps the error to a status and `{code, message}`
//!
//! # Example
//!
//! ```no_run
//! use mnemosyne_runtime::{Cache, Cluster, SessionManager};
//! use mnemosyne_core::environment::SystemClock;
//! use mnemosyne_web::{AppState, router};
//! # use mnemosyne_core::Storage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn serve(storage: Arc<dyn Storage>) -> std::io::Result<()> {
//! let cache = Arc::new(Cache::new(Duration::from_secs(5), Arc::new(SystemClock)));
//! let manager = SessionManager::new(storage, cache, Cluster::single("127.0.0.1:8080"));
//! let app = router(AppState::new(Arc::new(manager)));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use client::{ClientError, HttpDialer, HttpSessionClient};
pub use error::{AppError, ErrorBody};
pub use extractors::{CallMetadata, FORWARDED_HEADER, JsonBody, TIMEOUT_HEADER};
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_id_layer};
pub use state::AppState;

/// Build the router serving the session RPCs and the operational endpoints.
pub fn router(state: AppState) -> Router {
    use handlers::session;

    Router::new()
        .route("/v1/session/start", post(session::start))
        .route("/v1/session/get", post(session::get))
        .route("/v1/session/context", post(session::context))
        .route("/v1/session/exists", post(session::exists))
        .route("/v1/session/abandon", post(session::abandon))
        .route("/v1/session/set_value", post(session::set_value))
        .route("/v1/session/delete", post(session::delete))
        .route("/v1/session/list", post(session::list))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
