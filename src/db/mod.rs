pub mod pool;
pub mod provision;
pub mod schema;
pub mod vault;

use sqlx::SqlitePool;
use std::path::Path;

pub use pool::create_pool;
pub use provision::{Provisioned, SchemaProvisioner};
pub use schema::{Field, FieldKind, Model, Record, RecordSchema, Value};
pub use vault::{ExternalKey, Vault, VaultOptions};

/// Open the SQLite database behind `database_url`
///
/// Creates the parent directory of a file-backed database on first run.
pub async fn open_database(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    tracing::info!("Opening database at: {}", database_url);

    if let Some(parent) = database_file(database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Failed to create database directory: {}", e);
                sqlx::Error::Io(e)
            })?;
        }
    }

    create_pool(database_url, max_connections).await
}

fn database_file(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);

    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_file() {
        assert_eq!(
            database_file("sqlite://./data/rolelink.db"),
            Some(Path::new("./data/rolelink.db"))
        );
        assert_eq!(
            database_file("sqlite:app.db?mode=rwc"),
            Some(Path::new("app.db"))
        );
        assert_eq!(database_file("sqlite::memory:"), None);
        assert_eq!(database_file("postgres://localhost/db"), None);
    }
}
