//! # Mnemosyne Runtime
//!
//! The moving parts of a mnemosyne node, independent of any transport.
//!
//! ## Core Components
//!
//! - **[`SessionManager`]**: serves [`SessionService`](mnemosyne_core::SessionService)
//!   calls, forwarding each one to the node owning its token
//! - **[`Cache`]**: process-local read-through cache in front of storage
//! - **[`Cluster`]**: sorted static membership and jump-hash ownership
//! - **[`Cleanup`]**: periodic sweep of expired sessions
//! - **[`metrics`]**: Prometheus exporter and recorders
//! - **[`retry`]**: bounded retry used while bootstrapping
//! - **[`health`]**: readiness checks
//!
//! ## Example
//!
//! ```
//! use mnemosyne_core::environment::SystemClock;
//! use mnemosyne_core::rpc::{GetRequest, StartRequest};
//! use mnemosyne_core::{CallContext, NewSession, SessionService};
//! use mnemosyne_runtime::{Cache, Cluster, SessionManager};
//! use mnemosyne_testing::InMemoryStorage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = Arc::new(Cache::new(Duration::from_secs(5), Arc::new(SystemClock)));
//! let manager = SessionManager::new(
//!     Arc::new(InMemoryStorage::new()),
//!     cache,
//!     Cluster::single("127.0.0.1:8080"),
//! );
//!
//! let started = manager
//!     .start(
//!         CallContext::new(),
//!         StartRequest { session: Some(NewSession::for_subject("alice")) },
//!     )
//!     .await?;
//! let fetched = manager
//!     .get(
//!         CallContext::new(),
//!         GetRequest { access_token: started.session.access_token.clone() },
//!     )
//!     .await?;
//! assert_eq!(fetched.session.subject_id, "alice");
//! # Ok::<(), mnemosyne_core::SessionError>(())
//! # }).unwrap();
//! ```

/// Read-through session cache
pub mod cache;

/// Periodic expiry sweep
pub mod cleanup;

/// Cluster membership and token ownership
pub mod cluster;

/// Readiness checks
pub mod health;

/// Session manager
pub mod manager;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry with backoff for bootstrap
pub mod retry;

pub use cache::{Cache, CacheEntry, CacheStats};
pub use cleanup::{Cleanup, CleanupOutcome, CleanupPolicy};
pub use cluster::{Cluster, ClusterError, Dialer, Node};
pub use manager::SessionManager;
