//! # Mnemosyne Testing
//!
//! Hand-written test doubles for the mnemosyne session store.
//!
//! - [`mocks::ManualClock`]: time that only moves when a test says so
//! - [`InMemoryStorage`]: a [`Storage`](mnemosyne_core::Storage) with call
//!   counters, latency and failure injection
//! - [`RecordingPeer`]: a [`SessionService`](mnemosyne_core::SessionService)
//!   standing in for a remote cluster node
//!
//! ## Example
//!
//! ```
//! use mnemosyne_core::{NewSession, Storage};
//! use mnemosyne_testing::{InMemoryStorage, StorageCall};
//!
//! # tokio_test::block_on(async {
//! let storage = InMemoryStorage::new();
//! let session = storage
//!     .start(NewSession::for_subject("alice").with_access_token("tok"))
//!     .await
//!     .unwrap();
//! assert_eq!(storage.get("tok".into()).await.unwrap().subject_id, "alice");
//! assert_eq!(storage.calls(StorageCall::Get), 1);
//! # let _ = session;
//! # });
//! ```

mod peer;
mod storage;

pub use peer::{PeerCall, RecordingPeer};
pub use storage::{InMemoryStorage, StorageCall};

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use mnemosyne_core::environment::Clock;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Clock that stands still until advanced.
    ///
    /// Clones share the same instant, so a test can keep one handle and give
    /// another to the code under test.
    ///
    /// # Example
    ///
    /// ```
    /// use mnemosyne_testing::mocks::test_clock;
    /// use mnemosyne_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = test_clock();
    /// let start = clock.now();
    /// clock.advance(Duration::seconds(6));
    /// assert_eq!(clock.now() - start, Duration::seconds(6));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock fixed at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a manual clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}
