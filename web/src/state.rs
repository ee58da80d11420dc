//! Application state for Axum handlers.

use mnemosyne_core::SessionError;
use mnemosyne_runtime::SessionManager;
use mnemosyne_runtime::metrics::MetricsExporter;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;

/// Default budget for the readiness ping.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Serves every session call.
    pub manager: Arc<SessionManager>,
    /// Prometheus exporter, when installed.
    pub metrics: Option<Arc<MetricsExporter>>,
    /// Return raw internal error text to callers.
    pub expose_internal_errors: bool,
    /// Budget for the storage ping of `/ready`.
    pub ready_timeout: Duration,
}

impl AppState {
    /// State serving `manager`, without metrics and with internal errors
    /// hidden.
    #[must_use]
    pub const fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            metrics: None,
            expose_internal_errors: false,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Render `/metrics` from `exporter`.
    #[must_use]
    pub fn with_metrics(mut self, exporter: Arc<MetricsExporter>) -> Self {
        self.metrics = Some(exporter);
        self
    }

    /// Choose whether internal errors carry their raw cause.
    #[must_use]
    pub const fn with_internal_errors_exposed(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Map a session error to a response using this deployment's exposure
    /// setting.
    #[must_use]
    pub fn error(&self, err: &SessionError) -> AppError {
        AppError::from_session(err, self.expose_internal_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        // Ensure AppState implements Clone (required for Axum)
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
