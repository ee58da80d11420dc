//! `PostgreSQL` session storage for mnemosyne.
//!
//! This crate provides the production [`Storage`](mnemosyne_core::Storage)
//! implementation. All sessions of a node live in one table:
//!
//! - Sliding expiry on every `get`, in a single `UPDATE ... RETURNING`
//! - Row-locked read-modify-write for bag updates
//! - Insertion-ordered paging
//! - Idempotent schema setup and teardown
//!
//! # Example
//!
//! ```no_run
//! use mnemosyne_postgres::{PostgresStorage, PostgresStorageOptions, connect};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/mnemosyne", 10, Duration::from_secs(5)).await?;
//! let storage = PostgresStorage::new(pool, PostgresStorageOptions::default())?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod schema;
mod storage;

pub use schema::is_identifier;
pub use storage::{PostgresStorage, PostgresStorageOptions};

use mnemosyne_core::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool and check that the server answers.
///
/// # Errors
///
/// [`StorageError::Database`] if no connection can be established within
/// `acquire_timeout`.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;
    tracing::debug!(max_connections, "Database pool opened");
    Ok(pool)
}
