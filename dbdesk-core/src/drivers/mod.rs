//! Driver contract and factory.
//!
//! Every backend implements [`DatabaseDriver`] independently; there is no
//! shared base type. The set of backends is closed ([`DatabaseType`]) and
//! [`create_driver`] maps each tag to its implementation.
//!
//! # Module Structure
//! - Backend modules (`sqlite`, `mysql`, `postgres`, `clickhouse`, `mongodb`,
//!   `redis`), each behind the cargo feature of the same name
//! - `batch`: multi-statement result accumulation for SQL backends

use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, ConnectionTestResult, DataOptions, DatabaseType, EventInfo,
    ForeignKeyDefinition, ForeignKeyInfo, IndexDefinition, IndexInfo, PartitionInfo, QueryResult,
    RoutineInfo, RoutineKind, Row, SchemaOperationResult, SequenceInfo, ServerInfo,
    TableDefinition, TableInfo, TriggerDefinition, TriggerInfo, UserDefinition, UserInfo,
    ViewDefinition,
};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

pub(crate) mod batch;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;
#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgresql")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// The contract every backend satisfies.
///
/// Only [`connect`](Self::connect) may fail with `Err` for an unreachable
/// server. Every other call either folds failures into the returned
/// `QueryResult`/`SchemaOperationResult`, or returns a typed error for
/// lookups, so a UI can render all six backends through one error path.
/// Calls made before a successful `connect` report [`DbDeskError::NotConnected`].
///
/// # Object Safety
/// The trait is object-safe and used as `Box<dyn DatabaseDriver>`.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Backend handled by this driver.
    fn database_type(&self) -> DatabaseType;

    /// Whether a native handle is currently held.
    fn is_connected(&self) -> bool;

    /// Opens the native connection.
    ///
    /// `is_connected` becomes true only once the handshake succeeded and is
    /// false after any failure, including a failed TLS fallback.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the server cannot
    /// be reached.
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Releases the native connection. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Round-trips a trivial command. False when disconnected or failing.
    async fn ping(&self) -> bool;

    /// Best-effort cancellation of the in-flight statement.
    ///
    /// Returns false when the backend cannot cancel or nothing was signalled.
    async fn cancel_query(&self) -> bool;

    /// Server version and lightweight metadata.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn server_info(&self) -> Result<ServerInfo>;

    /// Runs an ad-hoc command in the backend's native language.
    ///
    /// `params` bind positionally when the command is a single statement.
    async fn execute(&self, command: &str, params: &[Value]) -> QueryResult;

    /// Databases (or schemas, or logical indexes) visible to the login.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_databases(&self) -> Result<Vec<String>>;

    /// Tables and views of the current database.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_tables(&self) -> Result<Vec<TableInfo>>;

    /// Columns of a table.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Indexes of a table.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    /// Foreign keys of a table; always empty for backends without them.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>>;

    /// Primary key column names in key order.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_primary_key_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Statement that recreates the table.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_table_ddl(&self, table: &str) -> Result<String>;

    /// A page of rows with filters and sorting applied.
    async fn get_table_data(&self, table: &str, options: &DataOptions) -> QueryResult;

    /// Type names offered when defining columns.
    fn get_data_types(&self) -> Vec<String>;

    /// Adds a column.
    async fn add_column(&self, table: &str, column: &ColumnDefinition) -> SchemaOperationResult;

    /// Changes a column's name, type, nullability, default or uniqueness.
    async fn modify_column(
        &self,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
    ) -> SchemaOperationResult;

    /// Drops a column.
    async fn drop_column(&self, table: &str, column: &str) -> SchemaOperationResult;

    /// Renames a column.
    async fn rename_column(&self, table: &str, old_name: &str, new_name: &str)
    -> SchemaOperationResult;

    /// Creates an index.
    async fn create_index(&self, table: &str, index: &IndexDefinition) -> SchemaOperationResult;

    /// Drops an index.
    async fn drop_index(&self, table: &str, index: &str) -> SchemaOperationResult;

    /// Adds a foreign key.
    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyDefinition,
    ) -> SchemaOperationResult;

    /// Drops a foreign key by constraint name.
    async fn drop_foreign_key(&self, table: &str, name: &str) -> SchemaOperationResult;

    /// Creates a table.
    async fn create_table(&self, table: &TableDefinition) -> SchemaOperationResult;

    /// Drops a table.
    async fn drop_table(&self, table: &str) -> SchemaOperationResult;

    /// Renames a table.
    async fn rename_table(&self, old_name: &str, new_name: &str) -> SchemaOperationResult;

    /// Inserts one row.
    async fn insert_row(&self, table: &str, row: &Row) -> SchemaOperationResult;

    /// Deletes the row identified by `key`.
    async fn delete_row(&self, table: &str, key: &Row) -> SchemaOperationResult;

    /// Applies `changes` to the row identified by `key`.
    async fn update_row(&self, table: &str, key: &Row, changes: &Row) -> SchemaOperationResult;

    /// Creates a view.
    async fn create_view(&self, view: &ViewDefinition) -> SchemaOperationResult;

    /// Drops a view.
    async fn drop_view(&self, name: &str) -> SchemaOperationResult;

    /// Renames a view.
    async fn rename_view(&self, old_name: &str, new_name: &str) -> SchemaOperationResult;

    /// Definition of a view.
    ///
    /// # Errors
    /// Returns an error when not connected or the lookup fails.
    async fn get_view_ddl(&self, name: &str) -> Result<String>;

    /// Stored procedures and functions.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_routines(&self) -> Result<Vec<RoutineInfo>> {
        Err(DbDeskError::unsupported_feature(
            "Stored routines",
            self.database_type().to_string(),
        ))
    }

    /// Source of a stored routine.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_routine_definition(&self, _name: &str, _kind: RoutineKind) -> Result<String> {
        Err(DbDeskError::unsupported_feature(
            "Stored routines",
            self.database_type().to_string(),
        ))
    }

    /// Drops a stored routine.
    async fn drop_routine(&self, _name: &str, _kind: RoutineKind) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("Stored routines", self.database_type())
    }

    /// Triggers, optionally limited to one table.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_triggers(&self, _table: Option<&str>) -> Result<Vec<TriggerInfo>> {
        Err(DbDeskError::unsupported_feature(
            "Triggers",
            self.database_type().to_string(),
        ))
    }

    /// Creates a trigger.
    async fn create_trigger(&self, _trigger: &TriggerDefinition) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("Triggers", self.database_type())
    }

    /// Drops a trigger.
    async fn drop_trigger(&self, _name: &str, _table: &str) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("Triggers", self.database_type())
    }

    /// Database users or roles.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_users(&self) -> Result<Vec<UserInfo>> {
        Err(DbDeskError::unsupported_feature(
            "User management",
            self.database_type().to_string(),
        ))
    }

    /// Creates a user.
    async fn create_user(&self, _user: &UserDefinition) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("User management", self.database_type())
    }

    /// Drops a user.
    async fn drop_user(&self, _name: &str, _host: Option<&str>) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("User management", self.database_type())
    }

    /// Sequences.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_sequences(&self) -> Result<Vec<SequenceInfo>> {
        Err(DbDeskError::unsupported_feature(
            "Sequences",
            self.database_type().to_string(),
        ))
    }

    /// Partitions of a table.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_partitions(&self, _table: &str) -> Result<Vec<PartitionInfo>> {
        Err(DbDeskError::unsupported_feature(
            "Partitions",
            self.database_type().to_string(),
        ))
    }

    /// Scheduled events.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_events(&self) -> Result<Vec<EventInfo>> {
        Err(DbDeskError::unsupported_feature(
            "Scheduled events",
            self.database_type().to_string(),
        ))
    }

    /// Drops a scheduled event.
    async fn drop_event(&self, _name: &str) -> SchemaOperationResult {
        SchemaOperationResult::unsupported("Scheduled events", self.database_type())
    }

    /// Character sets offered by the server.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_charsets(&self) -> Result<Vec<String>> {
        Err(DbDeskError::unsupported_feature(
            "Character sets",
            self.database_type().to_string(),
        ))
    }

    /// Collations, optionally limited to one character set.
    ///
    /// # Errors
    /// Unsupported unless the backend overrides it.
    async fn get_collations(&self, _charset: Option<&str>) -> Result<Vec<String>> {
        Err(DbDeskError::unsupported_feature(
            "Collations",
            self.database_type().to_string(),
        ))
    }
}

/// Creates an unconnected driver for a backend.
///
/// # Errors
/// Returns an unsupported-feature error if the backend was not compiled in.
pub fn create_driver(database_type: DatabaseType) -> Result<Box<dyn DatabaseDriver>> {
    match database_type {
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => Ok(Box::new(sqlite::SqliteDriver::new())),
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => Err(DbDeskError::unsupported_feature(
            "SQLite driver",
            "builds without the 'sqlite' feature",
        )),
        #[cfg(feature = "mysql")]
        DatabaseType::MySql => Ok(Box::new(mysql::MySqlDriver::new())),
        #[cfg(not(feature = "mysql"))]
        DatabaseType::MySql => Err(DbDeskError::unsupported_feature(
            "MySQL driver",
            "builds without the 'mysql' feature",
        )),
        #[cfg(feature = "postgresql")]
        DatabaseType::PostgreSql => Ok(Box::new(postgres::PostgresDriver::new())),
        #[cfg(not(feature = "postgresql"))]
        DatabaseType::PostgreSql => Err(DbDeskError::unsupported_feature(
            "PostgreSQL driver",
            "builds without the 'postgresql' feature",
        )),
        #[cfg(feature = "clickhouse")]
        DatabaseType::ClickHouse => Ok(Box::new(clickhouse::ClickHouseDriver::new())),
        #[cfg(not(feature = "clickhouse"))]
        DatabaseType::ClickHouse => Err(DbDeskError::unsupported_feature(
            "ClickHouse driver",
            "builds without the 'clickhouse' feature",
        )),
        #[cfg(feature = "mongodb")]
        DatabaseType::MongoDb => Ok(Box::new(mongodb::MongoDriver::new())),
        #[cfg(not(feature = "mongodb"))]
        DatabaseType::MongoDb => Err(DbDeskError::unsupported_feature(
            "MongoDB driver",
            "builds without the 'mongodb' feature",
        )),
        #[cfg(feature = "redis")]
        DatabaseType::Redis => Ok(Box::new(redis::RedisDriver::new())),
        #[cfg(not(feature = "redis"))]
        DatabaseType::Redis => Err(DbDeskError::unsupported_feature(
            "Redis driver",
            "builds without the 'redis' feature",
        )),
    }
}

/// Opens a throwaway connection, gathers server metadata and measures latency.
///
/// The driver is always disconnected before returning.
///
/// # Errors
/// Returns an error if the config is invalid or the connection fails.
pub async fn test_connection(config: &ConnectionConfig) -> Result<ConnectionTestResult> {
    config.validate()?;
    let mut driver = create_driver(config.database_type)?;
    let start = Instant::now();

    if let Err(e) = driver.connect(config).await {
        driver.disconnect().await;
        debug!("Connection test for {} failed: {}", config, e);
        return Err(e);
    }

    let info = driver.server_info().await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    driver.disconnect().await;

    let (server_version, details) = match info {
        Ok(info) => (info.version, info.details),
        Err(e) => {
            debug!("Server metadata unavailable: {}", e);
            (None, serde_json::Map::new())
        }
    };
    info!("Connection test for {} succeeded in {}ms", config, latency_ms);

    Ok(ConnectionTestResult {
        success: true,
        latency_ms,
        server_version,
        details,
    })
}

#[cfg(all(
    test,
    feature = "sqlite",
    feature = "mysql",
    feature = "postgresql",
    feature = "clickhouse",
    feature = "mongodb",
    feature = "redis"
))]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_every_backend() {
        for database_type in DatabaseType::ALL {
            let driver = create_driver(database_type).unwrap();
            assert_eq!(driver.database_type(), database_type);
            assert!(!driver.is_connected());
        }
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        for database_type in DatabaseType::ALL {
            let mut driver = create_driver(database_type).unwrap();
            driver.disconnect().await;
            driver.disconnect().await;
            assert!(!driver.is_connected());
        }
    }

    #[tokio::test]
    async fn test_operations_before_connect_report_not_connected() {
        for database_type in DatabaseType::ALL {
            let driver = create_driver(database_type).unwrap();
            assert!(!driver.ping().await);
            assert!(!driver.cancel_query().await);

            let result = driver.execute("SELECT 1", &[]).await;
            assert_eq!(result.error.as_deref(), Some("Not connected to database"));
            assert!(result.rows.is_empty());
            assert_eq!(result.row_count, 0);

            let data = driver.get_table_data("t", &DataOptions::default()).await;
            assert!(data.is_error());

            assert!(matches!(
                driver.get_tables().await,
                Err(DbDeskError::NotConnected)
            ));
            let op = driver.drop_table("t").await;
            assert!(!op.success);
            assert!(op.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_test_connection_rejects_invalid_config() {
        let config = ConnectionConfig::new(DatabaseType::Sqlite);
        assert!(matches!(
            test_connection(&config).await,
            Err(DbDeskError::Configuration { .. })
        ));
    }
}
