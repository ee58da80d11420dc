//! Readiness checks.
//!
//! A [`HealthReport`] aggregates per-component [`HealthCheck`]s; its status
//! is the worst of theirs. The node is ready unless some component is
//! unhealthy.

use crate::cluster::Cluster;
use mnemosyne_core::Storage;
use std::time::Duration;

/// Health check status levels, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component works but part of it is impaired (e.g. an unreachable peer)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health check result for a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: &'static str,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub const fn healthy(component: &'static str) -> Self {
        Self {
            component,
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health report
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Whether the node can serve traffic.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        !self.status.is_unhealthy()
    }

    /// Status of one component, if it was checked.
    #[must_use]
    pub fn component(&self, component: &str) -> Option<HealthStatus> {
        self.checks
            .iter()
            .find(|check| check.component == component)
            .map(|check| check.status)
    }
}

/// Component name of [`check_storage`].
pub const STORAGE_COMPONENT: &str = "database";

/// Component name of [`check_cluster`].
pub const CLUSTER_COMPONENT: &str = "cluster";

/// Ping the store, giving up after `timeout`.
pub async fn check_storage(storage: &dyn Storage, timeout: Duration) -> HealthCheck {
    match tokio::time::timeout(timeout, storage.ping()).await {
        Ok(Ok(())) => HealthCheck::healthy(STORAGE_COMPONENT),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Storage ping failed");
            HealthCheck::unhealthy(STORAGE_COMPONENT, err.to_string())
        }
        Err(_) => HealthCheck::unhealthy(STORAGE_COMPONENT, "ping timed out"),
    }
}

/// Degraded when some peer has no client to forward through.
#[must_use]
pub fn check_cluster(cluster: &Cluster) -> HealthCheck {
    let disconnected: Vec<&str> = cluster
        .external_nodes()
        .filter(|node| node.client().is_none())
        .map(|node| node.addr())
        .collect();
    if disconnected.is_empty() {
        HealthCheck::healthy(CLUSTER_COMPONENT)
    } else {
        HealthCheck::degraded(
            CLUSTER_COMPONENT,
            format!("not connected to {}", disconnected.join(", ")),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mnemosyne_testing::{InMemoryStorage, RecordingPeer};
    use std::sync::Arc;

    #[test]
    fn report_takes_the_worst_status() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("a"),
            HealthCheck::degraded("b", "slow"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_ready());

        let report = HealthReport::new(vec![
            HealthCheck::degraded("b", "slow"),
            HealthCheck::unhealthy("c", "down"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_ready());
        assert_eq!(report.component("c"), Some(HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn storage_ping_is_checked() {
        let check = check_storage(&InMemoryStorage::new(), Duration::from_secs(1)).await;
        assert_eq!(check, HealthCheck::healthy(STORAGE_COMPONENT));

        let slow = InMemoryStorage::new().with_latency(Duration::from_secs(60));
        let check = check_storage(&slow, Duration::from_millis(10)).await;
        assert!(check.status.is_unhealthy());
    }

    #[test]
    fn unconnected_peers_degrade_the_cluster() {
        let mut cluster = Cluster::new("a:1", ["b:1", "c:1"]);
        cluster
            .set_client("b:1", Arc::new(RecordingPeer::new("b:1")))
            .unwrap();
        let check = check_cluster(&cluster);
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.message.as_deref(), Some("not connected to c:1"));

        assert!(check_cluster(&Cluster::single("a:1")).status.is_healthy());
    }
}
