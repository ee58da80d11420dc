//! Prometheus metrics for the session store.
//!
//! Components record through the small recorder structs below (or, in the
//! storage crate, through the `metrics` macros directly). [`MetricsExporter`]
//! installs the Prometheus recorder once per process and renders the text
//! format served at `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemosyne_runtime::metrics::{CacheMetrics, MetricsExporter};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.start()?;
//!
//! CacheMetrics::record_hit();
//! let text = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use mnemosyne_core::ErrorCode;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), the call
    /// succeeds but [`MetricsExporter::render`] keeps returning `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Recorder handle, if this exporter installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Cache
    describe_counter!("mnemosyne_cache_hits_total", "Cache reads that found an entry");
    describe_counter!("mnemosyne_cache_misses_total", "Cache reads that found nothing");
    describe_counter!(
        "mnemosyne_cache_refreshes_total",
        "Cache entries marked as being reloaded from storage"
    );

    // Storage
    describe_counter!(
        "mnemosyne_storage_queries_total",
        "Storage queries executed, by query"
    );
    describe_histogram!(
        "mnemosyne_storage_query_duration_seconds",
        "Storage query latency, by query"
    );
    describe_counter!(
        "mnemosyne_storage_errors_total",
        "Storage queries that failed, by query"
    );

    // Cleanup
    describe_counter!(
        "mnemosyne_cleanup_errors_total",
        "Expiry sweeps that failed"
    );
    describe_counter!(
        "mnemosyne_cleanup_deleted_total",
        "Sessions removed by the expiry sweep"
    );

    // RPC
    describe_counter!("mnemosyne_rpc_requests_total", "Calls received, by method");
    describe_counter!(
        "mnemosyne_rpc_errors_total",
        "Calls that returned an error, by method and code"
    );
    describe_counter!(
        "mnemosyne_rpc_forwarded_total",
        "Calls forwarded to the owning peer, by method"
    );
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a read that found an entry.
    pub fn record_hit() {
        counter!("mnemosyne_cache_hits_total").increment(1);
    }

    /// Record a read that found nothing.
    pub fn record_miss() {
        counter!("mnemosyne_cache_misses_total").increment(1);
    }

    /// Record an entry marked for reload.
    pub fn record_refresh() {
        counter!("mnemosyne_cache_refreshes_total").increment(1);
    }
}

/// Session RPC metrics recorder.
pub struct RpcMetrics;

impl RpcMetrics {
    /// Record a received call.
    pub fn record_request(method: &'static str) {
        counter!("mnemosyne_rpc_requests_total", "method" => method).increment(1);
    }

    /// Record a call that returned `code`.
    pub fn record_error(method: &'static str, code: ErrorCode) {
        counter!("mnemosyne_rpc_errors_total", "method" => method, "code" => code.as_str())
            .increment(1);
    }

    /// Record a call forwarded to a peer.
    pub fn record_forward(method: &'static str) {
        counter!("mnemosyne_rpc_forwarded_total", "method" => method).increment(1);
    }
}

/// Expiry sweep metrics recorder.
pub struct CleanupMetrics;

impl CleanupMetrics {
    /// Record a successful sweep.
    pub fn record_sweep(deleted: u64) {
        counter!("mnemosyne_cleanup_deleted_total").increment(deleted);
    }

    /// Record a failed sweep.
    pub fn record_error() {
        counter!("mnemosyne_cleanup_errors_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn recorded_metrics_are_rendered() {
        let mut exporter = MetricsExporter::new();
        exporter.start().unwrap();

        CacheMetrics::record_hit();
        RpcMetrics::record_request("get");
        RpcMetrics::record_error("get", ErrorCode::NotFound);
        CleanupMetrics::record_sweep(3);

        // Another test may have installed the recorder first.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains("mnemosyne_cache_hits_total"));
            assert!(rendered.contains("mnemosyne_rpc_errors_total"));
            assert!(rendered.contains("mnemosyne_cleanup_deleted_total"));
        }
    }
}
