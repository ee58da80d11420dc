//! Health, readiness and metrics endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use mnemosyne_runtime::health::{
    HealthCheck, HealthReport, STORAGE_COMPONENT, check_cluster, check_storage,
};
use serde::Serialize;

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Simple health check endpoint (for basic liveness).
///
/// This endpoint does NOT check dependencies (database, etc.).
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// One component of [`ReadyResponse`].
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    /// Component name.
    pub component: &'static str,
    /// `healthy`, `degraded` or `unhealthy`.
    pub status: &'static str,
    /// Details, when not healthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<HealthCheck> for ComponentStatus {
    fn from(check: HealthCheck) -> Self {
        Self {
            component: check.component,
            status: check.status.as_str(),
            message: check.message,
        }
    }
}

/// Readiness body.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the node can serve traffic.
    pub ready: bool,
    /// Whether the store answered the ping.
    pub database: bool,
    /// Worst component status.
    pub status: &'static str,
    /// Individual checks.
    pub checks: Vec<ComponentStatus>,
}

/// Readiness check: pings the store and inspects cluster connectivity.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// ```text
/// GET /ready
/// ```
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let report = HealthReport::new(vec![
        check_storage(state.manager.storage().as_ref(), state.ready_timeout).await,
        check_cluster(&state.manager.cluster()),
    ]);

    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        ready: report.is_ready(),
        database: report
            .component(STORAGE_COMPONENT)
            .is_some_and(|status| !status.is_unhealthy()),
        status: report.status.as_str(),
        checks: report.checks.into_iter().map(ComponentStatus::from).collect(),
    };

    (status, Json(body))
}

/// Prometheus metrics in text format.
///
/// Returns 404 when no recorder was installed by this process.
///
/// ```text
/// GET /metrics
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref().and_then(|exporter| exporter.render()) {
        Some(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
