//! Custom Axum extractors.
//!
//! - [`CallMetadata`]: the [`CallContext`] carried by request headers
//! - [`JsonBody`]: `Json` whose rejection is a regular `INVALID_ARGUMENT` error

use crate::error::AppError;
use crate::middleware::{REQUEST_ID_HEADER, RequestId};
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use mnemosyne_core::CallContext;
use mnemosyne_core::constants::AUTHORIZATION_METADATA_KEY;
use std::time::Duration;

/// Marks a call re-issued by a peer (`1` or `true`).
pub const FORWARDED_HEADER: &str = "x-mnemosyne-forwarded";

/// Caller's remaining deadline budget in milliseconds.
pub const TIMEOUT_HEADER: &str = "x-mnemosyne-timeout-ms";

/// Call metadata built from request headers.
///
/// - `authorization`: ambient access token, `Bearer ` prefix optional
/// - `x-mnemosyne-forwarded`: forwarded marker
/// - `x-mnemosyne-timeout-ms`: deadline, relative to arrival
/// - `x-request-id`: correlation id (the one chosen by the request id layer
///   when installed)
///
/// Malformed values are ignored rather than rejected.
#[derive(Debug, Clone)]
pub struct CallMetadata(pub CallContext);

#[async_trait]
impl<S> FromRequestParts<S> for CallMetadata
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut ctx = call_context(&parts.headers);
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .or_else(|| header(&parts.headers, REQUEST_ID_HEADER).map(str::to_string));
        if let Some(request_id) = request_id {
            ctx = ctx.with_request_id(request_id);
        }
        Ok(Self(ctx))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Context from metadata headers, without the request id.
fn call_context(headers: &HeaderMap) -> CallContext {
    let mut ctx = CallContext::new();

    if let Some(timeout) = header(headers, TIMEOUT_HEADER).and_then(|v| v.parse::<u64>().ok()) {
        ctx = ctx.with_timeout(Duration::from_millis(timeout));
    }
    if header(headers, FORWARDED_HEADER).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    {
        ctx = ctx.mark_forwarded();
    }
    if let Some(token) = header(headers, AUTHORIZATION_METADATA_KEY) {
        let token = token
            .strip_prefix("Bearer ")
            .or_else(|| token.strip_prefix("bearer "))
            .unwrap_or(token);
        ctx = ctx.with_access_token(token.trim());
    }

    ctx
}

/// JSON request body; malformed bodies become `400 INVALID_ARGUMENT`.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);
