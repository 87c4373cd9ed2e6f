//! Redis driver.
//!
//! # Module Structure
//! - `connection`: connection info, TLS material and the handshake
//! - `command`: raw command tokenizing and reply shaping
//! - `keys`: key scanning, grouping and row materialization
//! - `mutation`: key writes for inserted, updated and deleted rows
//!
//! # Redis-Specific Behavior
//! - A table is a key or a glob pattern; every table exposes the fixed
//!   columns `key`, `type`, `ttl` and `value`
//! - Databases are the numbered logical databases `db0`..`dbN`
//! - Filters are evaluated in memory and only on `key` and `type`
//! - Columns, indexes, foreign keys and views do not exist; lookups return
//!   the fixed projection or empty lists, and changes report the feature as
//!   unsupported

pub(crate) mod command;
pub(crate) mod connection;
pub(crate) mod keys;
pub(crate) mod mutation;

#[cfg(test)]
mod tests;

use super::DatabaseDriver;
use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, ForeignKeyDefinition, ForeignKeyInfo,
    IndexDefinition, IndexInfo, QueryResult, Row, SchemaOperationResult, ServerInfo,
    TableDefinition, TableInfo, ViewDefinition,
};
use async_trait::async_trait;
use connection::Session;
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Keys per page when browsing a pattern.
const DEFAULT_PAGE_SIZE: u64 = 100;

/// Logical databases assumed when `CONFIG GET` is not permitted.
const DEFAULT_DATABASE_COUNT: u32 = 16;

const DATA_TYPES: &[&str] = &["string", "list", "set", "zset", "hash", "stream"];

const INFO_FIELDS: &[&str] = &["redis_mode", "os", "uptime_in_seconds", "tcp_port"];

/// `key:value` lines of an `INFO` section.
fn parse_info(text: &str) -> Vec<(&str, &str)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .collect()
}

/// Database count from a `CONFIG GET databases` reply.
fn database_count(reply: &[String]) -> Option<u32> {
    reply.get(1).and_then(|count| count.trim().parse().ok()).filter(|n| *n > 0)
}

/// Redis implementation of [`DatabaseDriver`].
#[derive(Debug, Default)]
pub struct RedisDriver {
    session: Option<Session>,
}

impl RedisDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(DbDeskError::NotConnected)
    }

    /// A handle on the shared multiplexed connection.
    fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.session()?.connection.clone())
    }

    async fn browse(&self, table: &str, options: &DataOptions) -> Result<QueryResult> {
        let mut conn = self.connection()?;
        let candidates = if keys::is_pattern(table) {
            keys::scan_keys(&mut conn, table, Some(keys::SCAN_LIMIT)).await?
        } else {
            let count: i64 = redis::cmd("EXISTS").arg(table).query_async(&mut conn).await?;
            if count > 0 { vec![table.to_string()] } else { Vec::new() }
        };
        let types = keys::key_types(&mut conn, &candidates).await?;
        let entries: Vec<(String, String)> = candidates.into_iter().zip(types).collect();
        debug!("Redis browse {} over {} key(s)", table, entries.len());

        let page = keys::select_page(entries, options, DEFAULT_PAGE_SIZE);
        let rows = keys::fetch_rows(&mut conn, &page).await?;
        Ok(QueryResult::with_rows(keys::query_columns(), rows))
    }

    async fn run_command(&self, line: &str) -> Result<QueryResult> {
        let mut conn = self.connection()?;
        let args = command::tokenize(line)?;
        debug!("Redis command {}", args[0].to_ascii_uppercase());
        let mut cmd = redis::cmd(&args[0]);
        for arg in &args[1..] {
            cmd.arg(arg);
        }
        let reply: redis::Value = cmd.query_async(&mut conn).await?;
        Ok(command::format_reply(&args, &reply))
    }
}

#[async_trait]
impl DatabaseDriver for RedisDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Redis
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        config.validate()?;
        let session = connection::open(config).await?;
        info!("Connected to Redis at {} (db{})", session.endpoint, session.db);
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!("Disconnected from Redis");
        }
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    async fn cancel_query(&self) -> bool {
        false
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let session = self.session()?;
        let mut conn = session.connection.clone();
        let text: String = redis::cmd("INFO").arg("server").query_async(&mut conn).await?;
        let info = parse_info(&text);

        let mut details = serde_json::Map::new();
        for (key, value) in &info {
            if INFO_FIELDS.contains(key) {
                details.insert((*key).to_string(), Value::String((*value).to_string()));
            }
        }
        details.insert("db".to_string(), Value::from(session.db));
        details.insert("endpoint".to_string(), Value::String(session.endpoint.clone()));
        Ok(ServerInfo {
            version: info
                .iter()
                .find(|(key, _)| *key == "redis_version")
                .map(|(_, value)| (*value).to_string()),
            details,
        })
    }

    /// Runs one command line, e.g. `HGETALL user:1`. Parameters are ignored.
    async fn execute(&self, command: &str, params: &[Value]) -> QueryResult {
        let start = Instant::now();
        if self.session.is_none() {
            return QueryResult::from_error(DbDeskError::NotConnected);
        }
        if !params.is_empty() {
            debug!("Ignoring {} parameter(s) for Redis command", params.len());
        }
        match self.run_command(command).await {
            Ok(result) => result.timed(start),
            Err(e) => QueryResult::from_error(e).timed(start),
        }
    }

    async fn get_databases(&self) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let reply: redis::RedisResult<Vec<String>> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("databases")
            .query_async(&mut conn)
            .await;
        let count = match reply {
            Ok(reply) => database_count(&reply).unwrap_or(DEFAULT_DATABASE_COUNT),
            Err(e) => {
                warn!("CONFIG GET databases failed, assuming {}: {}", DEFAULT_DATABASE_COUNT, e);
                DEFAULT_DATABASE_COUNT
            }
        };
        Ok((0..count).map(|i| format!("db{}", i)).collect())
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        let mut conn = self.connection()?;
        let names = keys::scan_keys(&mut conn, "*", Some(keys::SCAN_LIMIT)).await?;
        if names.len() >= keys::SCAN_LIMIT {
            debug!("Redis key listing capped at {}", keys::SCAN_LIMIT);
        }
        Ok(keys::group_keys(&names))
    }

    async fn get_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        self.session()?;
        Ok(keys::columns())
    }

    async fn get_indexes(&self, _table: &str) -> Result<Vec<IndexInfo>> {
        self.session()?;
        Ok(Vec::new())
    }

    async fn get_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyInfo>> {
        self.session()?;
        Ok(Vec::new())
    }

    async fn get_primary_key_columns(&self, _table: &str) -> Result<Vec<String>> {
        self.session()?;
        Ok(vec!["key".to_string()])
    }

    async fn get_table_ddl(&self, _table: &str) -> Result<String> {
        self.session()?;
        Err(DbDeskError::unsupported_feature(
            "Table DDL",
            DatabaseType::Redis.to_string(),
        ))
    }

    async fn get_table_data(&self, table: &str, options: &DataOptions) -> QueryResult {
        let start = Instant::now();
        match self.browse(table, options).await {
            Ok(result) => result.timed(start),
            Err(e) => QueryResult::from_error(e).timed(start),
        }
    }

    fn get_data_types(&self) -> Vec<String> {
        DATA_TYPES.iter().map(|t| (*t).to_string()).collect()
    }

    async fn add_column(&self, _table: &str, _column: &ColumnDefinition) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Column changes", DatabaseType::Redis)
    }

    async fn modify_column(
        &self,
        _table: &str,
        _old_name: &str,
        _column: &ColumnDefinition,
    ) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Column changes", DatabaseType::Redis)
    }

    async fn drop_column(&self, _table: &str, _column: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Column changes", DatabaseType::Redis)
    }

    async fn rename_column(
        &self,
        _table: &str,
        _old_name: &str,
        _new_name: &str,
    ) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Column changes", DatabaseType::Redis)
    }

    async fn create_index(&self, _table: &str, _index: &IndexDefinition) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Indexes", DatabaseType::Redis)
    }

    async fn drop_index(&self, _table: &str, _index: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Indexes", DatabaseType::Redis)
    }

    async fn add_foreign_key(
        &self,
        _table: &str,
        _foreign_key: &ForeignKeyDefinition,
    ) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::Redis)
    }

    async fn drop_foreign_key(&self, _table: &str, _name: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::Redis)
    }

    /// Keys come into existence on first write; use `insert_row`.
    async fn create_table(&self, _table: &TableDefinition) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Table creation", DatabaseType::Redis)
    }

    async fn drop_table(&self, table: &str) -> SchemaOperationResult {
        let Ok(mut conn) = self.connection() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_table(&mut conn, table).await
    }

    async fn rename_table(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(mut conn) = self.connection() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_table(&mut conn, old_name, new_name).await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> SchemaOperationResult {
        let Ok(mut conn) = self.connection() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::insert_row(&mut conn, table, row).await
    }

    async fn delete_row(&self, table: &str, key: &Row) -> SchemaOperationResult {
        let Ok(mut conn) = self.connection() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::delete_row(&mut conn, table, key).await
    }

    async fn update_row(&self, table: &str, key: &Row, changes: &Row) -> SchemaOperationResult {
        let Ok(mut conn) = self.connection() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::update_row(&mut conn, table, key, changes).await
    }

    async fn create_view(&self, _view: &ViewDefinition) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Views", DatabaseType::Redis)
    }

    async fn drop_view(&self, _name: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Views", DatabaseType::Redis)
    }

    async fn rename_view(&self, _old_name: &str, _new_name: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Views", DatabaseType::Redis)
    }

    async fn get_view_ddl(&self, _name: &str) -> Result<String> {
        self.session()?;
        Err(DbDeskError::unsupported_feature(
            "Views",
            DatabaseType::Redis.to_string(),
        ))
    }
}
