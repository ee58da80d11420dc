//! In-memory storage double.

use chrono::{DateTime, Utc};
use mnemosyne_core::constants::DEFAULT_SESSION_TTL;
use mnemosyne_core::environment::{Clock, SystemClock};
use mnemosyne_core::storage::StorageFuture;
use mnemosyne_core::{Bag, ExpiryRange, NewSession, Session, SessionFilter, Storage, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Storage operation, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageCall {
    /// [`Storage::start`]
    Start,
    /// [`Storage::get`]
    Get,
    /// [`Storage::list`]
    List,
    /// [`Storage::exists`]
    Exists,
    /// [`Storage::abandon`]
    Abandon,
    /// [`Storage::set_value`]
    SetValue,
    /// [`Storage::delete`]
    Delete,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Session>,
    calls: HashMap<StorageCall, u64>,
}

/// [`Storage`] kept in a `Vec`, in insertion order.
///
/// Behaves like the `PostgreSQL` implementation: `get` slides the expiry,
/// expired rows are invisible to everything but `delete`, and an empty
/// delete filter is rejected. On top of that it counts calls and can be told
/// to slow down or fail.
#[derive(Clone)]
pub struct InMemoryStorage {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    latency: Option<Duration>,
    failing_deletes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("ttl", &self.ttl)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Empty storage with the default session TTL and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock: Arc::new(SystemClock),
            ttl: to_chrono(DEFAULT_SESSION_TTL),
            latency: None,
            failing_deletes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use a different session TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = to_chrono(ttl);
        self
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sleep for `latency` before answering any call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `count` calls to `delete` fail with a database error.
    pub fn fail_next_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// How many times `call` was invoked.
    #[must_use]
    pub fn calls(&self, call: StorageCall) -> u64 {
        self.lock()
            .map(|state| state.calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Rows currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.rows.len()).unwrap_or(0)
    }

    /// Whether no rows are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row as-is, bypassing the counters.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn insert(&self, session: Session) -> Result<(), StorageError> {
        self.lock()?.rows.push(session);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Database("Mutex lock failed".to_string()))
    }

    async fn enter(&self, call: StorageCall) -> Result<DateTime<Utc>, StorageError> {
        *self.lock()?.calls.entry(call).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.clock.now())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn live(rows: &[Session], access_token: &str, now: DateTime<Utc>) -> Option<usize> {
    rows.iter()
        .position(|s| s.access_token == access_token && s.expire_at > now)
}

impl Storage for InMemoryStorage {
    fn start(&self, session: NewSession) -> StorageFuture<'_, Session> {
        Box::pin(async move {
            let now = self.enter(StorageCall::Start).await?;
            if session.access_token.is_empty() {
                return Err(StorageError::MissingAccessToken);
            }
            let mut state = self.lock()?;
            if state
                .rows
                .iter()
                .any(|s| s.access_token == session.access_token)
            {
                return Err(StorageError::Database(
                    "duplicate key value violates unique constraint".to_string(),
                ));
            }
            let session = session.into_session(now + self.ttl);
            state.rows.push(session.clone());
            Ok(session)
        })
    }

    fn get(&self, access_token: String) -> StorageFuture<'_, Session> {
        Box::pin(async move {
            let now = self.enter(StorageCall::Get).await?;
            let mut state = self.lock()?;
            let index =
                live(&state.rows, &access_token, now).ok_or(StorageError::SessionNotFound)?;
            let row = &mut state.rows[index];
            row.expire_at = now + self.ttl;
            Ok(row.clone())
        })
    }

    fn list(
        &self,
        offset: i64,
        limit: i64,
        expire_at: ExpiryRange,
    ) -> StorageFuture<'_, Vec<Session>> {
        Box::pin(async move {
            self.enter(StorageCall::List).await?;
            if limit <= 0 {
                return Err(StorageError::InvalidArgument(
                    "limit must be a positive number".to_string(),
                ));
            }
            let offset = usize::try_from(offset).map_err(|_| {
                StorageError::InvalidArgument("offset cannot be negative".to_string())
            })?;
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let state = self.lock()?;
            Ok(state
                .rows
                .iter()
                .filter(|s| expire_at.contains(s.expire_at))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn exists(&self, access_token: String) -> StorageFuture<'_, bool> {
        Box::pin(async move {
            let now = self.enter(StorageCall::Exists).await?;
            let state = self.lock()?;
            Ok(live(&state.rows, &access_token, now).is_some())
        })
    }

    fn abandon(&self, access_token: String) -> StorageFuture<'_, bool> {
        Box::pin(async move {
            self.enter(StorageCall::Abandon).await?;
            let mut state = self.lock()?;
            let before = state.rows.len();
            state.rows.retain(|s| s.access_token != access_token);
            if state.rows.len() == before {
                return Err(StorageError::SessionNotFound);
            }
            Ok(true)
        })
    }

    fn set_value(&self, access_token: String, key: String, value: String) -> StorageFuture<'_, Bag> {
        Box::pin(async move {
            let now = self.enter(StorageCall::SetValue).await?;
            if access_token.is_empty() {
                return Err(StorageError::MissingAccessToken);
            }
            let mut state = self.lock()?;
            let index =
                live(&state.rows, &access_token, now).ok_or(StorageError::SessionNotFound)?;
            let bag = &mut state.rows[index].bag;
            bag.set(key, value);
            Ok(bag.clone())
        })
    }

    fn delete(&self, filter: SessionFilter) -> StorageFuture<'_, u64> {
        Box::pin(async move {
            self.enter(StorageCall::Delete).await?;
            if filter.is_empty() {
                return Err(StorageError::InvalidArgument(
                    "at least one filter must be provided".to_string(),
                ));
            }
            let failing = self
                .failing_deletes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(StorageError::Database("injected delete failure".to_string()));
            }
            let mut state = self.lock()?;
            let before = state.rows.len();
            state.rows.retain(|s| !filter.matches(s));
            Ok(u64::try_from(before - state.rows.len()).unwrap_or(u64::MAX))
        })
    }

    fn setup(&self) -> StorageFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn teardown(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            self.lock()?.rows.clear();
            Ok(())
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            Ok(())
        })
    }
}
