//! HTTP request handlers.
//!
//! - [`session`]: the `POST /v1/session/<op>` RPC endpoints
//! - [`health`]: liveness, readiness and metrics

pub mod health;
pub mod session;

pub use health::{health_check, metrics, ready_check};
