//! [`Storage`] backed by one `PostgreSQL` table.

use crate::schema::Statements;
use chrono::{DateTime, Utc};
use mnemosyne_core::constants::{DEFAULT_SCHEMA, DEFAULT_SESSION_TTL, DEFAULT_TABLE};
use mnemosyne_core::storage::StorageFuture;
use mnemosyne_core::{
    Bag, ExpiryRange, NewSession, Session, SessionFilter, Storage, StorageError,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::future::Future;
use std::time::{Duration, Instant};

/// Where sessions live and how long they last.
#[derive(Debug, Clone)]
pub struct PostgresStorageOptions {
    /// Schema holding the table.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Sliding expiration applied on insert and on every `get`.
    pub ttl: Duration,
}

impl Default for PostgresStorageOptions {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// `PostgreSQL` session storage.
///
/// Every operation is a single statement except `set_value`, which locks the
/// row with `SELECT ... FOR UPDATE` inside a transaction so concurrent merges
/// into one bag serialize.
///
/// # Example
///
/// ```no_run
/// use mnemosyne_core::{NewSession, Storage};
/// use mnemosyne_postgres::{PostgresStorage, PostgresStorageOptions};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let storage = PostgresStorage::new(pool, PostgresStorageOptions::default())?;
/// storage.setup().await?;
///
/// let session = storage
///     .start(NewSession::for_subject("alice").with_access_token("0123abcd"))
///     .await?;
/// let bag = storage
///     .set_value(session.access_token.clone(), "theme".into(), "dark".into())
///     .await?;
/// assert_eq!(bag.get("theme"), Some("dark"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    statements: Statements,
    ttl_secs: f64,
}

impl PostgresStorage {
    /// Create a storage on top of an existing pool.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] if the schema or table name is not a
    /// plain identifier.
    pub fn new(pool: PgPool, options: PostgresStorageOptions) -> Result<Self, StorageError> {
        Ok(Self {
            pool,
            statements: Statements::new(&options.schema, &options.table)?,
            ttl_secs: options.ttl.as_secs_f64(),
        })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Record query count, latency and failures under `query`.
async fn observe<T, F>(query: &'static str, operation: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    let started = Instant::now();
    let result = operation.await;

    metrics::counter!("mnemosyne_storage_queries_total", "query" => query).increment(1);
    metrics::histogram!("mnemosyne_storage_query_duration_seconds", "query" => query)
        .record(started.elapsed().as_secs_f64());
    if matches!(
        result,
        Err(StorageError::Database(_) | StorageError::Serialization(_))
    ) {
        metrics::counter!("mnemosyne_storage_errors_total", "query" => query).increment(1);
    }

    result
}

fn database(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::RowNotFound => StorageError::SessionNotFound,
        other => StorageError::Database(other.to_string()),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn session_from_row(row: &PgRow) -> Result<Session, StorageError> {
    let bag: Vec<u8> = row.try_get("bag").map_err(database)?;
    Ok(Session {
        access_token: row.try_get("access_token").map_err(database)?,
        refresh_token: row
            .try_get::<Option<String>, _>("refresh_token")
            .map_err(database)?
            .unwrap_or_default(),
        subject_id: row.try_get("subject_id").map_err(database)?,
        subject_client: row
            .try_get::<Option<String>, _>("subject_client")
            .map_err(database)?
            .unwrap_or_default(),
        bag: Bag::decode(&bag)?,
        expire_at: row.try_get("expire_at").map_err(database)?,
    })
}

fn push_expiry(builder: &mut QueryBuilder<'_, Postgres>, range: ExpiryRange) {
    if let Some(from) = range.from {
        builder.push(" AND expire_at > ").push_bind(from);
    }
    if let Some(to) = range.to {
        builder.push(" AND expire_at < ").push_bind(to);
    }
}

impl Storage for PostgresStorage {
    fn start(&self, session: NewSession) -> StorageFuture<'_, Session> {
        Box::pin(observe("start", async move {
            if session.access_token.is_empty() {
                return Err(StorageError::MissingAccessToken);
            }
            let bag = session.bag.encode()?;

            let row = sqlx::query(&self.statements.insert)
                .bind(&session.access_token)
                .bind(non_empty(&session.refresh_token))
                .bind(&session.subject_id)
                .bind(non_empty(&session.subject_client))
                .bind(bag)
                .bind(self.ttl_secs)
                .fetch_one(&self.pool)
                .await
                .map_err(database)?;
            let expire_at: DateTime<Utc> = row.try_get("expire_at").map_err(database)?;

            Ok(session.into_session(expire_at))
        }))
    }

    fn get(&self, access_token: String) -> StorageFuture<'_, Session> {
        Box::pin(observe("get", async move {
            let row = sqlx::query(&self.statements.get)
                .bind(&access_token)
                .bind(self.ttl_secs)
                .fetch_one(&self.pool)
                .await
                .map_err(database)?;
            session_from_row(&row)
        }))
    }

    fn list(
        &self,
        offset: i64,
        limit: i64,
        expire_at: ExpiryRange,
    ) -> StorageFuture<'_, Vec<Session>> {
        Box::pin(observe("list", async move {
            if limit <= 0 {
                return Err(StorageError::InvalidArgument(
                    "limit must be a positive number".to_string(),
                ));
            }
            if offset < 0 {
                return Err(StorageError::InvalidArgument(
                    "offset cannot be negative".to_string(),
                ));
            }

            let mut builder = QueryBuilder::<Postgres>::new(self.statements.select_page.as_str());
            push_expiry(&mut builder, expire_at);
            builder
                .push(" ORDER BY id LIMIT ")
                .push_bind(limit)
                .push(" OFFSET ")
                .push_bind(offset);

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(database)?;
            rows.iter().map(session_from_row).collect()
        }))
    }

    fn exists(&self, access_token: String) -> StorageFuture<'_, bool> {
        Box::pin(observe("exists", async move {
            let row = sqlx::query(&self.statements.exists)
                .bind(&access_token)
                .fetch_one(&self.pool)
                .await
                .map_err(database)?;
            row.try_get::<bool, _>(0).map_err(database)
        }))
    }

    fn abandon(&self, access_token: String) -> StorageFuture<'_, bool> {
        Box::pin(observe("abandon", async move {
            let result = sqlx::query(&self.statements.abandon)
                .bind(&access_token)
                .execute(&self.pool)
                .await
                .map_err(database)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::SessionNotFound);
            }
            Ok(true)
        }))
    }

    fn set_value(&self, access_token: String, key: String, value: String) -> StorageFuture<'_, Bag> {
        Box::pin(observe("set_value", async move {
            if access_token.is_empty() {
                return Err(StorageError::MissingAccessToken);
            }

            // Dropping the transaction without commit rolls it back.
            let mut tx = self.pool.begin().await.map_err(database)?;

            let row = sqlx::query(&self.statements.lock_bag)
                .bind(&access_token)
                .fetch_optional(&mut *tx)
                .await
                .map_err(database)?
                .ok_or(StorageError::SessionNotFound)?;
            let encoded: Vec<u8> = row.try_get("bag").map_err(database)?;

            let mut bag = Bag::decode(&encoded)?;
            bag.set(key, value);

            sqlx::query(&self.statements.update_bag)
                .bind(&access_token)
                .bind(bag.encode()?)
                .execute(&mut *tx)
                .await
                .map_err(database)?;
            tx.commit().await.map_err(database)?;

            Ok(bag)
        }))
    }

    fn delete(&self, filter: SessionFilter) -> StorageFuture<'_, u64> {
        Box::pin(observe("delete", async move {
            if filter.is_empty() {
                return Err(StorageError::InvalidArgument(
                    "at least one filter must be provided".to_string(),
                ));
            }

            let mut builder = QueryBuilder::<Postgres>::new(self.statements.delete.as_str());
            if let Some(subject_id) = filter.subject_id_value() {
                builder.push(" AND subject_id = ").push_bind(subject_id.to_string());
            }
            if let Some(access_token) = filter.access_token_value() {
                builder.push(" AND access_token = ").push_bind(access_token.to_string());
            }
            if let Some(refresh_token) = filter.refresh_token_value() {
                builder.push(" AND refresh_token = ").push_bind(refresh_token.to_string());
            }
            push_expiry(&mut builder, filter.expire_at());

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(database)?;
            Ok(result.rows_affected())
        }))
    }

    fn setup(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            let statements = [
                &self.statements.create_schema,
                &self.statements.create_table,
                &self.statements.create_indexes[0],
                &self.statements.create_indexes[1],
                &self.statements.create_indexes[2],
            ];
            for statement in statements {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(database)?;
            }
            tracing::info!("Session schema ready");
            Ok(())
        })
    }

    fn teardown(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(&self.statements.drop_schema)
                .execute(&self.pool)
                .await
                .map_err(database)?;
            tracing::info!("Session schema dropped");
            Ok(())
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(observe("ping", async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(database)?;
            Ok(())
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_a_missing_session() {
        assert_eq!(database(sqlx::Error::RowNotFound), StorageError::SessionNotFound);
        assert!(matches!(
            database(sqlx::Error::PoolTimedOut),
            StorageError::Database(_)
        ));
    }

    #[test]
    fn options_default_to_the_standard_table() {
        let options = PostgresStorageOptions::default();
        assert_eq!(options.schema, "mnemosyne");
        assert_eq!(options.table, "session");
        assert_eq!(options.ttl, Duration::from_secs(24 * 60));
    }

    #[tokio::test]
    async fn invalid_table_name_is_rejected() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let options = PostgresStorageOptions {
            table: "session;drop".to_string(),
            ..PostgresStorageOptions::default()
        };
        assert!(matches!(
            PostgresStorage::new(pool, options),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
