use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::constants::IDENTITY_COLUMN;
use crate::db::schema::{validate_identifier, FieldKind, RecordSchema};
use crate::error::{AppError, Result};

/// What `ensure` found (or did) for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The table was already there
    Existing,
    /// The table was created by this call
    Created,
}

/// Makes sure the backing table for a schema exists
#[derive(Debug, Clone)]
pub struct SchemaProvisioner {
    pool: SqlitePool,
    timeout: Duration,
}

impl SchemaProvisioner {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Ensure `table` exists for `schema`.
    ///
    /// Fails with `TableMissing` when the table is absent and `auto_create` is off.
    pub async fn ensure(
        &self,
        schema: &RecordSchema,
        table: &str,
        key_kind: FieldKind,
        auto_create: bool,
    ) -> Result<Provisioned> {
        schema.validate()?;
        validate_identifier(table)?;

        if self.table_exists(table).await? {
            self.check_columns(schema, table).await?;
            tracing::debug!("Table '{}' already provisioned", table);
            return Ok(Provisioned::Existing);
        }

        if !auto_create {
            tracing::error!("Table '{}' is not found and auto-create is disabled", table);
            return Err(AppError::TableMissing {
                table: table.to_string(),
            });
        }

        tracing::info!("Creating '{}' table for {} records", table, schema.name);

        let sql = create_table_sql(schema, table, key_kind);
        self.bounded(table, sqlx::query(&sql).execute(&self.pool))
            .await?;

        Ok(Provisioned::Created)
    }

    /// Catalog lookup, bound by name
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<i64> = self
            .bounded(
                table,
                sqlx::query_scalar(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ? LIMIT 1",
                )
                .bind(table)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(found.is_some())
    }

    /// An existing table must carry exactly the identity, key and declared columns
    async fn check_columns(&self, schema: &RecordSchema, table: &str) -> Result<()> {
        let found: Vec<String> = self
            .bounded(
                table,
                sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
                    .bind(table)
                    .fetch_all(&self.pool),
            )
            .await?;

        let found = found.into_iter().collect::<BTreeSet<_>>();
        let expected = expected_columns(schema);

        if found != expected {
            tracing::error!(
                "Table '{}' has columns {:?}, {} records need {:?}",
                table,
                found,
                schema.name,
                expected
            );
            return Err(AppError::InvalidSchema(format!(
                "table '{}' does not match the {} schema",
                table, schema.name
            )));
        }

        Ok(())
    }

    async fn bounded<T, F>(&self, table: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| {
                AppError::Connectivity(format!("provisioning '{}' timed out", table))
            })?
            .map_err(AppError::from)
    }
}

fn expected_columns(schema: &RecordSchema) -> BTreeSet<String> {
    [IDENTITY_COLUMN, schema.key]
        .into_iter()
        .chain(schema.fields.iter().map(|f| f.name))
        .map(str::to_string)
        .collect()
}

/// Build the creation statement.
///
/// Identifiers must already be validated; `IF NOT EXISTS` keeps concurrent
/// provisioning idempotent.
pub fn create_table_sql(schema: &RecordSchema, table: &str, key_kind: FieldKind) -> String {
    let columns = schema
        .fields
        .iter()
        .map(|f| format!("\"{}\" {} NOT NULL", f.name, f.kind.storage_type()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (\
         \"{id}\" INTEGER PRIMARY KEY AUTOINCREMENT, \
         \"{key}\" {key_type} NOT NULL UNIQUE, \
         {columns})",
        table = table,
        id = IDENTITY_COLUMN,
        key = schema.key,
        key_type = key_kind.storage_type(),
        columns = columns,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::Field;

    const SAMPLE: RecordSchema = RecordSchema::new(
        "sample",
        "user_id",
        &[
            Field::new("nickname", FieldKind::Text),
            Field::new("count", FieldKind::Integer),
            Field::new("hours", FieldKind::Float),
            Field::new("seen_at", FieldKind::Timestamp),
        ],
    );

    #[test]
    fn test_create_table_sql_maps_kinds() {
        let sql = create_table_sql(&SAMPLE, "samples", FieldKind::Integer);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"samples\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"user_id\" BIGINT NOT NULL UNIQUE"));
        assert!(sql.contains("\"nickname\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("\"count\" BIGINT NOT NULL"));
        assert!(sql.contains("\"hours\" REAL NOT NULL"));
        assert!(sql.contains("\"seen_at\" DATETIME NOT NULL"));
    }

    #[test]
    fn test_expected_columns() {
        let columns = expected_columns(&SAMPLE);
        let names = columns.iter().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["count", "hours", "id", "nickname", "seen_at", "user_id"]
        );
    }
}
