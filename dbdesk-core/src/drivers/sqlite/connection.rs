//! SQLite connection handling.
//!
//! SQLite is file-based, so the driver keeps a single-connection pool. One
//! connection means `PRAGMA` settings and open transactions stay on the
//! handle every later call uses.
//!
//! # Connection Modes
//! - File-based: `filePath` (or `database`) names the file, created if missing
//! - In-memory: `:memory:`

use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// Resolves the database location from the config.
pub(crate) fn database_path(config: &ConnectionConfig) -> Option<&str> {
    config
        .file_path
        .as_deref()
        .or(config.database.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Whether the location names an in-memory database.
pub(crate) fn is_in_memory(path: &str) -> bool {
    path == ":memory:" || path.contains(":memory:") || path.contains("mode=memory")
}

/// Builds connect options for a path or `sqlite:` URL.
pub(crate) fn connect_options(path: &str) -> Result<SqliteConnectOptions> {
    let options = if is_in_memory(path) {
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            DbDeskError::configuration(format!("Invalid SQLite location: {}", e))
        })?
    } else if path.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(path).map_err(|e| {
            DbDeskError::configuration(format!("Invalid SQLite location: {}", e))
        })?
    } else {
        SqliteConnectOptions::new().filename(path)
    };

    Ok(options.create_if_missing(true).foreign_keys(true))
}

/// Opens the single-connection pool.
///
/// Idle timeout and max lifetime are disabled so an in-memory database is
/// never dropped behind the caller's back.
pub(crate) async fn open_pool(config: &ConnectionConfig) -> Result<SqlitePool> {
    let path = database_path(config)
        .ok_or_else(|| DbDeskError::configuration("SQLite connections require a file path"))?;
    let options = connect_options(path)?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| DbDeskError::connection_failed("Failed to open SQLite database", e))
}
