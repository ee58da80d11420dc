//! Table layout and the SQL statements built from it.
//!
//! Schema and table names cannot be bound as parameters, so they are
//! validated once and spliced into every statement up front.

use mnemosyne_core::StorageError;

/// Columns returned for a full session row.
const COLUMNS: &str = "access_token, refresh_token, subject_id, subject_client, bag, expire_at";

/// Whether `name` is a plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn identifier<'a>(kind: &str, name: &'a str) -> Result<&'a str, StorageError> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidArgument(format!(
            "invalid {kind} name {name:?}"
        )))
    }
}

/// Every statement the storage runs, rendered for one schema and table.
#[derive(Debug, Clone)]
pub(crate) struct Statements {
    pub create_schema: String,
    pub create_table: String,
    pub create_indexes: [String; 3],
    pub drop_schema: String,
    pub insert: String,
    pub get: String,
    pub select_page: String,
    pub exists: String,
    pub abandon: String,
    pub lock_bag: String,
    pub update_bag: String,
    pub delete: String,
}

impl Statements {
    pub(crate) fn new(schema: &str, table: &str) -> Result<Self, StorageError> {
        let schema = identifier("schema", schema)?;
        let table = identifier("table", table)?;
        let qualified = format!("{schema}.{table}");

        Ok(Self {
            create_schema: format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            create_table: format!(
                r"
                CREATE TABLE IF NOT EXISTS {qualified} (
                    id BIGSERIAL,
                    access_token TEXT PRIMARY KEY,
                    refresh_token TEXT,
                    subject_id TEXT NOT NULL,
                    subject_client TEXT,
                    bag BYTEA NOT NULL,
                    expire_at TIMESTAMPTZ NOT NULL
                )
                "
            ),
            create_indexes: [
                format!(
                    "CREATE INDEX IF NOT EXISTS {table}_refresh_token_idx ON {qualified} (refresh_token)"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {table}_subject_id_idx ON {qualified} (subject_id)"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS {table}_expire_at_idx ON {qualified} (expire_at DESC)"
                ),
            ],
            drop_schema: format!("DROP SCHEMA IF EXISTS {schema} CASCADE"),
            insert: format!(
                r"
                INSERT INTO {qualified} (access_token, refresh_token, subject_id, subject_client, bag, expire_at)
                VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
                RETURNING expire_at
                "
            ),
            get: format!(
                r"
                UPDATE {qualified}
                SET expire_at = NOW() + ($2 * INTERVAL '1 second')
                WHERE access_token = $1 AND expire_at > NOW()
                RETURNING {COLUMNS}
                "
            ),
            select_page: format!("SELECT {COLUMNS} FROM {qualified} WHERE TRUE"),
            exists: format!(
                "SELECT EXISTS (SELECT 1 FROM {qualified} WHERE access_token = $1 AND expire_at > NOW())"
            ),
            abandon: format!("DELETE FROM {qualified} WHERE access_token = $1"),
            lock_bag: format!(
                "SELECT bag FROM {qualified} WHERE access_token = $1 AND expire_at > NOW() FOR UPDATE"
            ),
            update_bag: format!("UPDATE {qualified} SET bag = $2 WHERE access_token = $1"),
            delete: format!("DELETE FROM {qualified} WHERE TRUE"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(is_identifier("mnemosyne"));
        assert!(is_identifier("_session_2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("session; DROP TABLE x"));
        assert!(!is_identifier("my-schema"));
    }

    #[test]
    fn statements_use_the_qualified_table() {
        let statements = Statements::new("auth", "sessions").unwrap();
        assert_eq!(statements.create_schema, "CREATE SCHEMA IF NOT EXISTS auth");
        assert!(statements.get.contains("UPDATE auth.sessions"));
        assert!(statements.create_indexes[2].contains("(expire_at DESC)"));
        assert_eq!(statements.drop_schema, "DROP SCHEMA IF EXISTS auth CASCADE");
    }

    #[test]
    fn bad_names_are_rejected() {
        let err = Statements::new("auth", "x y").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(msg) if msg.contains("table")));
    }
}
