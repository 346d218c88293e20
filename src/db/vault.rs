use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::constants::DEFAULT_STORAGE_TIMEOUT_SECS;
use crate::db::provision::{Provisioned, SchemaProvisioner};
use crate::db::schema::{FieldKind, Model, Record, RecordSchema, Value};
use crate::error::{AppError, Result};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Identifier addressing one row of a vault
pub trait ExternalKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    /// Column kind used for the key column
    const KIND: FieldKind;

    fn to_value(&self) -> Value;
}

impl ExternalKey for i64 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl ExternalKey for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VaultOptions {
    /// Create the table when it is missing instead of failing
    pub auto_create: bool,
    /// Bound on every storage call
    pub timeout: Duration,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            auto_create: true,
            timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECS),
        }
    }
}

/// Prepared statement text for one table
#[derive(Debug)]
struct Statements {
    select: String,
    upsert: String,
    update: String,
    delete: String,
    count: String,
    drop: String,
}

impl Statements {
    fn new(schema: &RecordSchema, table: &str) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| format!("\"{}\"", f.name))
            .collect::<Vec<_>>();
        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        let key = format!("\"{}\"", schema.key);

        let excluded = columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = columns.join(", ");

        Self {
            select: format!("SELECT {columns} FROM \"{table}\" WHERE {key} = ? LIMIT 1"),
            upsert: format!(
                "INSERT INTO \"{table}\" ({key}, {columns}) VALUES ({placeholders}) \
                 ON CONFLICT({key}) DO UPDATE SET {excluded}"
            ),
            update: format!("UPDATE \"{table}\" SET {assignments} WHERE {key} = ?"),
            delete: format!("DELETE FROM \"{table}\" WHERE {key} = ?"),
            count: format!("SELECT COUNT(*) FROM \"{table}\""),
            drop: format!("DROP TABLE IF EXISTS \"{table}\""),
        }
    }
}

/// Generic store for records of one [`Model`], addressed by an external key.
///
/// Every value reaches SQLite through parameter binding. Identifiers come from
/// the validated schema declaration.
pub struct Vault<M: Model, K: ExternalKey = i64> {
    pool: SqlitePool,
    table: String,
    options: VaultOptions,
    provisioner: SchemaProvisioner,
    created_on_open: bool,
    sql: Statements,
    _marker: PhantomData<fn() -> (M, K)>,
}

impl<M: Model, K: ExternalKey> Vault<M, K> {
    /// Open a vault over `table`, provisioning it first.
    ///
    /// A missing table with auto-create disabled fails here, at startup.
    pub async fn open(
        pool: SqlitePool,
        table: impl Into<String>,
        options: VaultOptions,
    ) -> Result<Self> {
        let table = table.into();
        let provisioner = SchemaProvisioner::new(pool.clone(), options.timeout);

        let outcome = provisioner
            .ensure(M::SCHEMA, &table, K::KIND, options.auto_create)
            .await?;

        tracing::info!(
            "Vault for {} records opened on '{}' ({:?})",
            M::SCHEMA.name,
            table,
            outcome
        );

        Ok(Self {
            sql: Statements::new(M::SCHEMA, &table),
            pool,
            table,
            options,
            provisioner,
            created_on_open: outcome == Provisioned::Created,
            _marker: PhantomData,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether opening this vault created the backing table
    pub fn created_on_open(&self) -> bool {
        self.created_on_open
    }

    /// Fetch the record for `key`; a missing row is `Ok(None)`
    pub async fn get(&self, key: &K) -> Result<Option<M>> {
        self.get_record(key).await?.map(M::from_record).transpose()
    }

    pub async fn get_record(&self, key: &K) -> Result<Option<Record>> {
        self.ready().await?;

        let query = bind_value(sqlx::query(&self.sql.select), &key.to_value());
        let row = self.bounded(query.fetch_optional(&self.pool)).await?;

        row.map(|row| decode_row(M::SCHEMA, &row)).transpose()
    }

    /// Validate and upsert: one row per key, repeated saves are idempotent
    pub async fn save(&self, key: &K, value: &M) -> Result<M> {
        let record = value.to_record()?;
        M::from_record(self.save_record(key, record).await?)
    }

    /// Coerce a loosely typed object, then upsert it
    pub async fn save_loose(&self, key: &K, value: &JsonValue) -> Result<M> {
        let record = M::SCHEMA.coerce(value)?;
        M::from_record(self.save_record(key, record).await?)
    }

    pub async fn save_record(&self, key: &K, record: Record) -> Result<Record> {
        let record = M::SCHEMA.accept(record)?;
        self.ready().await?;

        let query = record
            .values()
            .iter()
            .fold(bind_value(sqlx::query(&self.sql.upsert), &key.to_value()), bind_value);
        self.bounded(query.execute(&self.pool)).await?;

        tracing::debug!("Saved {} record for key {} in '{}'", M::SCHEMA.name, key, self.table);

        Ok(record)
    }

    /// Overwrite an existing row; a missing key is `NotFound`
    pub async fn update(&self, key: &K, value: &M) -> Result<()> {
        let record = value.to_record()?;
        self.ready().await?;

        let query = record
            .values()
            .iter()
            .fold(sqlx::query(&self.sql.update), bind_value);
        let query = bind_value(query, &key.to_value());
        let result = self.bounded(query.execute(&self.pool)).await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                table: self.table.clone(),
                key: key.to_string(),
            });
        }

        Ok(())
    }

    /// Remove the row for `key`; absent rows are not an error
    pub async fn delete(&self, key: &K) -> Result<()> {
        self.ready().await?;

        let query = bind_value(sqlx::query(&self.sql.delete), &key.to_value());
        let result = self.bounded(query.execute(&self.pool)).await?;

        if result.rows_affected() > 0 {
            tracing::info!("Deleted key {} from '{}'", key, self.table);
        }

        Ok(())
    }

    /// Drop the whole backing table
    pub async fn erase(&self) -> Result<()> {
        self.bounded(sqlx::query(&self.sql.drop).execute(&self.pool))
            .await?;

        tracing::warn!("Erased table '{}'", self.table);

        Ok(())
    }

    /// Number of stored rows
    pub async fn count(&self) -> Result<i64> {
        self.ready().await?;
        self.bounded(sqlx::query_scalar(&self.sql.count).fetch_one(&self.pool))
            .await
    }

    /// Probe the catalog before each operation.
    ///
    /// The table may have been erased through any handle on it, so a dropped
    /// table is re-provisioned here or reported as `TableMissing`.
    async fn ready(&self) -> Result<()> {
        if self.provisioner.table_exists(&self.table).await? {
            return Ok(());
        }

        self.provisioner
            .ensure(M::SCHEMA, &self.table, K::KIND, self.options.auto_create)
            .await?;

        Ok(())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.options.timeout, fut)
            .await
            .map_err(|_| {
                AppError::Connectivity(format!("storage call on '{}' timed out", self.table))
            })?
            .map_err(AppError::from)
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Integer(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Float(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    }
}

fn decode_row(schema: &'static RecordSchema, row: &SqliteRow) -> Result<Record> {
    let values = schema
        .fields
        .iter()
        .map(|field| -> Result<Value> {
            let value = match field.kind {
                FieldKind::Integer => Value::Integer(row.try_get::<i64, _>(field.name)?),
                FieldKind::Text => Value::Text(row.try_get::<String, _>(field.name)?),
                FieldKind::Float => Value::Float(row.try_get::<f64, _>(field.name)?),
                FieldKind::Timestamp => {
                    Value::Timestamp(row.try_get::<DateTime<Utc>, _>(field.name)?)
                }
            };
            Ok(value)
        })
        .collect::<Result<Vec<_>>>()?;

    Record::from_values(schema, values)
}
