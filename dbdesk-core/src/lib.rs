//! Driver abstraction layer for the dbdesk database client.
//!
//! One contract ([`DatabaseDriver`]) is implemented by six independent
//! backends: SQLite, MySQL, PostgreSQL, ClickHouse, MongoDB and Redis. Each
//! driver translates connect, introspect, execute and mutate operations into
//! its native protocol and normalizes the results into JSON-safe shapes.
//!
//! # Error Channels
//! - `connect` and [`test_connection`] return `Err` when a server cannot be
//!   reached.
//! - Everything else reports expected failures as values: an `error` string
//!   on [`QueryResult`]/[`SchemaOperationResult`], or a typed
//!   [`DbDeskError`] for lookups.
//!
//! # Security
//! - Passwords are held in a zeroizing [`config::Secret`] and never logged
//! - Error messages redact connection strings

pub mod config;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod models;
pub mod sql;
pub mod tls;

// Re-export commonly used types
pub use config::{ConnectionConfig, SslConfig, SslMode};
pub use drivers::{DatabaseDriver, create_driver, test_connection};
pub use error::{DbDeskError, Result};
pub use models::{
    ColumnDefinition, ColumnInfo, ConnectionTestResult, DataOptions, DatabaseType, Filter,
    FilterOperator, ForeignKeyDefinition, ForeignKeyInfo, IndexDefinition, IndexInfo,
    QueryColumn, QueryResult, Row, SchemaOperationResult, ServerInfo, SortDirection,
    TableDefinition, TableInfo, TableKind, ViewDefinition,
};
