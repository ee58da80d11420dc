//! Shared defaults.

use std::time::Duration;

/// Call metadata key carrying the ambient access token for `Context`.
pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";

/// Sliding expiration window applied on creation and on every `Get`.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60);

/// Interval between two expiry sweeps.
pub const DEFAULT_SESSION_TTC: Duration = Duration::from_secs(60);

/// Local validity window of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Page size used by `List` when the caller leaves the limit unset.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Default `PostgreSQL` schema holding the session table.
pub const DEFAULT_SCHEMA: &str = "mnemosyne";

/// Default session table name.
pub const DEFAULT_TABLE: &str = "session";
