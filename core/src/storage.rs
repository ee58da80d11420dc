//! Durable session storage contract.
//!
//! # Implementations
//!
//! - `PostgresStorage` (in `mnemosyne-postgres`): production implementation
//! - `InMemoryStorage` (in `mnemosyne-testing`): test double with call counters
//!
//! # Consistency
//!
//! Every operation is a single atomic statement except
//! [`Storage::set_value`], which is a read-modify-write under a row lock so
//! that concurrent updates of one session serialize instead of losing keys.
//! Dropping a returned future cancels the operation; a cancelled `set_value`
//! rolls back.

use crate::error::StorageError;
use crate::session::{Bag, NewSession, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Storage`] methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Optional, exclusive bounds on a session's expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryRange {
    /// Only sessions expiring strictly after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only sessions expiring strictly before this instant.
    pub to: Option<DateTime<Utc>>,
}

impl ExpiryRange {
    /// Range with both bounds open.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Whether no bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Whether `expire_at` falls inside the range.
    #[must_use]
    pub fn contains(&self, expire_at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| expire_at > from) && self.to.is_none_or(|to| expire_at < to)
    }
}

/// Conjunctive filter for [`Storage::delete`].
///
/// Empty strings are treated as "not set". A filter with nothing set is
/// rejected by storage so a delete can never wipe the whole table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    subject_id: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expire_at: ExpiryRange,
}

impl SessionFilter {
    /// Empty filter; add conditions with the builder methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching every session that expired before `instant`.
    #[must_use]
    pub fn expired_before(instant: DateTime<Utc>) -> Self {
        Self::new().expire_to(Some(instant))
    }

    /// Restrict to a subject.
    #[must_use]
    pub fn subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = non_empty(subject_id.into());
        self
    }

    /// Restrict to a single access token.
    #[must_use]
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = non_empty(access_token.into());
        self
    }

    /// Restrict to a refresh token.
    #[must_use]
    pub fn refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = non_empty(refresh_token.into());
        self
    }

    /// Lower expiry bound (exclusive).
    #[must_use]
    pub fn expire_from(mut self, from: Option<DateTime<Utc>>) -> Self {
        self.expire_at.from = from;
        self
    }

    /// Upper expiry bound (exclusive).
    #[must_use]
    pub fn expire_to(mut self, to: Option<DateTime<Utc>>) -> Self {
        self.expire_at.to = to;
        self
    }

    /// Subject condition, if set.
    #[must_use]
    pub fn subject_id_value(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Access token condition, if set.
    #[must_use]
    pub fn access_token_value(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Refresh token condition, if set.
    #[must_use]
    pub fn refresh_token_value(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Expiry window condition.
    #[must_use]
    pub const fn expire_at(&self) -> ExpiryRange {
        self.expire_at
    }

    /// Whether no condition is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.subject_id.is_none()
            && self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.expire_at.is_unbounded()
    }

    /// Whether `session` satisfies every condition.
    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        self.subject_id
            .as_deref()
            .is_none_or(|v| session.subject_id == v)
            && self
                .access_token
                .as_deref()
                .is_none_or(|v| session.access_token == v)
            && self
                .refresh_token
                .as_deref()
                .is_none_or(|v| session.refresh_token == v)
            && self.expire_at.contains(session.expire_at)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Durable session storage.
///
/// # Dyn Compatibility
///
/// Methods return [`StorageFuture`] instead of using `async fn` so the
/// storage can be shared as `Arc<dyn Storage>` between request tasks and the
/// cleanup sweep.
pub trait Storage: Send + Sync {
    /// Insert a new session expiring at `now + ttl`.
    ///
    /// The access token must already be set.
    ///
    /// # Errors
    ///
    /// [`StorageError::MissingAccessToken`] for an empty token,
    /// [`StorageError::Database`] if the token is already taken.
    fn start(&self, session: NewSession) -> StorageFuture<'_, Session>;

    /// Fetch a live session and slide its expiry to `now + ttl`.
    ///
    /// # Errors
    ///
    /// [`StorageError::SessionNotFound`] if no live session matches.
    fn get(&self, access_token: String) -> StorageFuture<'_, Session>;

    /// Page through sessions in insertion order, optionally restricted to an
    /// expiry window.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] if `limit <= 0` or `offset < 0`.
    fn list(&self, offset: i64, limit: i64, expire_at: ExpiryRange)
    -> StorageFuture<'_, Vec<Session>>;

    /// Whether a live session exists. Never touches the expiry.
    ///
    /// # Errors
    ///
    /// [`StorageError::Database`] on query failure.
    fn exists(&self, access_token: String) -> StorageFuture<'_, bool>;

    /// Delete one session.
    ///
    /// # Errors
    ///
    /// [`StorageError::SessionNotFound`] if nothing was deleted, so a second
    /// abandon of the same token is detectable.
    fn abandon(&self, access_token: String) -> StorageFuture<'_, bool>;

    /// Merge `key = value` into the session bag and return the merged bag.
    ///
    /// # Errors
    ///
    /// [`StorageError::MissingAccessToken`] for an empty token,
    /// [`StorageError::SessionNotFound`] if no live session matches.
    fn set_value(&self, access_token: String, key: String, value: String)
    -> StorageFuture<'_, Bag>;

    /// Delete every session matching `filter`, returning the number removed.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] if the filter is empty.
    fn delete(&self, filter: SessionFilter) -> StorageFuture<'_, u64>;

    /// Create the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// [`StorageError::Database`] on DDL failure.
    fn setup(&self) -> StorageFuture<'_, ()>;

    /// Drop the schema and everything in it.
    ///
    /// # Errors
    ///
    /// [`StorageError::Database`] on DDL failure.
    fn teardown(&self) -> StorageFuture<'_, ()>;

    /// Check that the backing store answers.
    ///
    /// # Errors
    ///
    /// [`StorageError::Database`] if it does not.
    fn ping(&self) -> StorageFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(subject: &str, token: &str, refresh: &str, expire_at: DateTime<Utc>) -> Session {
        NewSession::for_subject(subject)
            .with_access_token(token)
            .with_refresh_token(refresh)
            .into_session(expire_at)
    }

    #[test]
    fn empty_strings_do_not_count_as_filters() {
        let filter = SessionFilter::new()
            .subject_id("")
            .access_token("")
            .refresh_token("");
        assert!(filter.is_empty());
        assert!(!SessionFilter::new().subject_id("s").is_empty());
        assert!(!SessionFilter::expired_before(Utc::now()).is_empty());
    }

    #[test]
    fn filters_combine_with_and() {
        let now = Utc::now();
        let s = session("alice", "tok-1", "ref-1", now);
        assert!(SessionFilter::new().subject_id("alice").matches(&s));
        assert!(
            SessionFilter::new()
                .subject_id("alice")
                .refresh_token("ref-1")
                .matches(&s)
        );
        assert!(
            !SessionFilter::new()
                .subject_id("alice")
                .access_token("tok-2")
                .matches(&s)
        );
    }

    #[test]
    fn expiry_bounds_are_exclusive() {
        let now = Utc::now();
        let s = session("alice", "tok-1", "", now);
        assert!(!SessionFilter::expired_before(now).matches(&s));
        assert!(SessionFilter::expired_before(now + Duration::seconds(1)).matches(&s));
        assert!(
            !SessionFilter::new()
                .expire_from(Some(now))
                .expire_to(Some(now + Duration::seconds(1)))
                .matches(&s)
        );
        assert!(ExpiryRange::unbounded().contains(now));
    }
}
