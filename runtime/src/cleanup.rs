//! Periodic expiry sweep.
//!
//! One task per process wakes every TTC interval and deletes every session
//! of the local store whose expiry has passed. The sweep is never forwarded:
//! each node purges its own shard.

use crate::metrics::CleanupMetrics;
use mnemosyne_core::environment::{Clock, SystemClock};
use mnemosyne_core::{SessionFilter, Storage, StorageError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the sweep does after a failed delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Stop the sweep for good.
    #[default]
    FailStop,
    /// Log, count, and try again at the next interval.
    Continue,
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailStop => f.write_str("fail-stop"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

/// Unknown cleanup policy name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown cleanup policy {0:?}, expected \"fail-stop\" or \"continue\"")]
pub struct ParseCleanupPolicyError(String);

impl FromStr for CleanupPolicy {
    type Err = ParseCleanupPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-stop" | "fail_stop" | "failstop" => Ok(Self::FailStop),
            "continue" => Ok(Self::Continue),
            other => Err(ParseCleanupPolicyError(other.to_string())),
        }
    }
}

/// How the sweep task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Shutdown was requested.
    Stopped,
    /// A delete failed under [`CleanupPolicy::FailStop`].
    Failed(StorageError),
}

/// Expiry sweep configuration.
pub struct Cleanup {
    storage: Arc<dyn Storage>,
    interval: Duration,
    policy: CleanupPolicy,
    clock: Arc<dyn Clock>,
}

impl Cleanup {
    /// Sweep `storage` every `interval` with the fail-stop policy.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, interval: Duration) -> Self {
        Self {
            storage,
            interval,
            policy: CleanupPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Choose what happens after a failed sweep.
    #[must_use]
    pub const fn with_policy(mut self, policy: CleanupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Read "now" from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the sweep on its own task until `shutdown` turns `true` (or its
    /// sender is dropped).
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<CleanupOutcome> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the sweep on the current task.
    ///
    /// Shutdown is observed while waiting and while a sweep is in flight; an
    /// interrupted sweep is abandoned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> CleanupOutcome {
        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            policy = %self.policy,
            "Expiry sweep started"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            let sweep = self
                .storage
                .delete(SessionFilter::expired_before(self.clock.now()));
            let result = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                result = sweep => result,
            };

            match result {
                Ok(deleted) => {
                    CleanupMetrics::record_sweep(deleted);
                    tracing::debug!(deleted, "Expired sessions removed");
                }
                Err(err) => {
                    CleanupMetrics::record_error();
                    match self.policy {
                        CleanupPolicy::FailStop => {
                            tracing::error!(error = %err, "Expiry sweep failed, stopping");
                            return CleanupOutcome::Failed(err);
                        }
                        CleanupPolicy::Continue => {
                            tracing::warn!(error = %err, "Expiry sweep failed, retrying at next interval");
                        }
                    }
                }
            }
        }

        tracing::info!("Expiry sweep stopped");
        CleanupOutcome::Stopped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mnemosyne_core::NewSession;
    use mnemosyne_testing::{InMemoryStorage, StorageCall};

    const TTL: Duration = Duration::from_millis(60);
    const TTC: Duration = Duration::from_millis(20);

    fn storage() -> Arc<InMemoryStorage> {
        Arc::new(InMemoryStorage::new().with_ttl(TTL))
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("fail-stop".parse(), Ok(CleanupPolicy::FailStop));
        assert_eq!(" Continue ".parse(), Ok(CleanupPolicy::Continue));
        assert!("sometimes".parse::<CleanupPolicy>().is_err());
        assert_eq!(CleanupPolicy::default(), CleanupPolicy::FailStop);
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let storage = storage();
        for i in 0..10 {
            storage
                .start(NewSession::for_subject("alice").with_access_token(format!("tok-{i}")))
                .await
                .unwrap();
        }

        let (stop, shutdown) = watch::channel(false);
        let handle = Cleanup::new(storage.clone(), TTC).spawn(shutdown);

        tokio::time::sleep(TTL + TTC * 2 + Duration::from_millis(40)).await;
        for i in 0..10 {
            assert_eq!(
                storage.get(format!("tok-{i}")).await.unwrap_err(),
                StorageError::SessionNotFound
            );
        }
        assert!(storage.is_empty());

        stop.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), CleanupOutcome::Stopped);
    }

    #[tokio::test]
    async fn fail_stop_ends_the_sweep() {
        let storage = storage();
        storage.fail_next_deletes(1);
        let (_stop, shutdown) = watch::channel(false);

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            Cleanup::new(storage.clone(), TTC).spawn(shutdown),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(outcome, CleanupOutcome::Failed(StorageError::Database(_))));
        assert_eq!(storage.calls(StorageCall::Delete), 1);
    }

    #[tokio::test]
    async fn continue_policy_survives_failures() {
        let storage = storage();
        storage.fail_next_deletes(2);
        let (stop, shutdown) = watch::channel(false);
        let handle = Cleanup::new(storage.clone(), TTC)
            .with_policy(CleanupPolicy::Continue)
            .spawn(shutdown);

        tokio::time::timeout(Duration::from_secs(2), async {
            while storage.calls(StorageCall::Delete) < 3 {
                tokio::time::sleep(TTC).await;
            }
        })
        .await
        .unwrap();

        stop.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), CleanupOutcome::Stopped);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_slow_sweep() {
        let storage = Arc::new(InMemoryStorage::new().with_latency(Duration::from_secs(60)));
        let (stop, shutdown) = watch::channel(false);
        let handle = Cleanup::new(storage.clone(), Duration::from_millis(1)).spawn(shutdown);

        tokio::time::timeout(Duration::from_secs(1), async {
            while storage.calls(StorageCall::Delete) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, CleanupOutcome::Stopped);
    }

    #[tokio::test]
    async fn dropped_sender_stops_the_sweep() {
        let (stop, shutdown) = watch::channel(false);
        let handle = Cleanup::new(storage(), Duration::from_secs(3600)).spawn(shutdown);
        drop(stop);
        assert_eq!(handle.await.unwrap(), CleanupOutcome::Stopped);
    }
}
