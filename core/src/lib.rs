//! # Mnemosyne Core
//!
//! Core types and traits for the mnemosyne distributed session store.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **[`session`]**: the [`Session`](session::Session) record and its [`Bag`](session::Bag)
//! - **[`error`]**: storage errors and the error taxonomy reported to callers
//! - **[`storage`]**: the durable [`Storage`](storage::Storage) contract
//! - **[`rpc`]**: request/response messages and the [`SessionService`](rpc::SessionService) contract
//! - **[`context`]**: per-call metadata (deadline, forwarding marker, ambient token)
//! - **[`jump`]**: jump consistent hash used for shard ownership
//! - **[`token`]**: access token generation
//! - **[`environment`]**: injectable dependencies such as the [`Clock`](environment::Clock)
//!
//! Implementations live elsewhere:
//!
//! - `mnemosyne-postgres`: `PostgreSQL` storage
//! - `mnemosyne-runtime`: cache, cluster routing, session manager, cleanup sweep
//! - `mnemosyne-web`: HTTP transport and peer client

pub mod constants;
pub mod context;
pub mod error;
pub mod jump;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod token;

pub use context::CallContext;
pub use error::{ErrorCode, SessionError, StorageError};
pub use rpc::SessionService;
pub use session::{Bag, NewSession, Session};
pub use storage::{ExpiryRange, SessionFilter, Storage};

/// Environment traits for dependency injection.
///
/// Time is injected so the cache staleness policy can be tested without
/// sleeping.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use mnemosyne_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
