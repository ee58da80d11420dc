//! Process-local read-through session cache.
//!
//! Entries are keyed by the 64-bit fingerprint of the access token
//! ([`mnemosyne_core::jump::sum64`]), never by the token itself. The whole map
//! sits behind one reader/writer lock; every operation is O(1) and never
//! awaits while holding it.
//!
//! The cache does not decide freshness. [`CacheEntry::is_usable`] encodes the
//! staleness policy the session manager applies on top of [`Cache::read`].

use crate::metrics::CacheMetrics;
use chrono::{DateTime, Utc};
use mnemosyne_core::Session;
use mnemosyne_core::environment::Clock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cached snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Last session read from storage.
    pub session: Session,
    /// Local expiry: time of the last `put` plus the cache TTL.
    pub expire_at: DateTime<Utc>,
    /// Set once a reload of this entry has been triggered.
    pub refresh: bool,
}

impl CacheEntry {
    /// Whether the entry may be served without going to storage.
    ///
    /// An entry is usable while no more than `ttl` has passed since its local
    /// expiry, or one further `ttl` while it is being refreshed. A session
    /// whose own expiry has passed is never usable.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.session.expire_at <= now {
            return false;
        }
        let window = to_chrono(ttl);
        let overdue = now.signed_duration_since(self.expire_at);
        overdue <= window
            || (self.refresh && overdue <= window.checked_add(&window).unwrap_or(window))
    }
}

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found an entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Entries marked for reload.
    pub refreshes: u64,
}

/// Session cache.
pub struct Cache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Create an empty cache whose entries expire `ttl` after each `put`.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Configured cache TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current time according to the cache clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store `session`, resetting the local expiry and the refresh flag.
    pub fn put(&self, key: u64, session: Session) {
        let entry = CacheEntry {
            session,
            expire_at: self.clock.now() + to_chrono(self.ttl),
            refresh: false,
        };
        self.entries.write().insert(key, entry);
    }

    /// Look up an entry, counting a hit or a miss.
    ///
    /// Presence says nothing about freshness; see [`CacheEntry::is_usable`].
    #[must_use]
    pub fn read(&self, key: u64) -> Option<CacheEntry> {
        let entry = self.entries.read().get(&key).cloned();
        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_hit();
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_miss();
        }
        entry
    }

    /// Mark an entry as being reloaded so other readers keep using it.
    ///
    /// Returns `false`, and changes nothing, if the key is absent.
    pub fn refresh(&self, key: u64) -> bool {
        let marked = self
            .entries
            .write()
            .get_mut(&key)
            .map(|entry| entry.refresh = true)
            .is_some();
        if marked {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_refresh();
        }
        marked
    }

    /// Remove an entry.
    pub fn del(&self, key: u64) {
        self.entries.write().remove(&key);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
