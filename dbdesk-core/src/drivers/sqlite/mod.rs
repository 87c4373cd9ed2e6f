//! SQLite driver.
//!
//! # Module Structure
//! - `connection`: single-connection pool over a file or `:memory:`
//! - `values`: row decoding and parameter binding
//! - `schema`: introspection via `sqlite_master` and the `pragma_*` functions
//! - `mutation`: DDL/DML, in place where SQLite allows it
//! - `recreate`: transactional table rebuild for everything else
//!
//! # SQLite-Specific Behavior
//! - Query cancellation is not supported
//! - Stored routines, users, sequences and partitions do not exist
//! - Foreign keys are enforced on every connection

pub(crate) mod connection;
pub(crate) mod mutation;
pub(crate) mod recreate;
pub(crate) mod schema;
pub(crate) mod values;

#[cfg(test)]
mod tests;

use super::DatabaseDriver;
use super::batch::Batch;
use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, ForeignKeyDefinition, ForeignKeyInfo,
    IndexDefinition, IndexInfo, QueryColumn, QueryResult, Row, SchemaOperationResult, ServerInfo,
    TableDefinition, TableInfo, TriggerDefinition, TriggerInfo, ViewDefinition,
};
use crate::sql::{Dialect, build_where_clause, order_and_page, split_statements};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Executor, SqlitePool, Statement as _};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_PAGE_SIZE: u64 = 100;

const DATA_TYPES: &[&str] = &[
    "INTEGER", "REAL", "TEXT", "BLOB", "NUMERIC", "BOOLEAN", "DATE", "DATETIME", "VARCHAR",
    "DECIMAL",
];

/// Outcome of one statement.
enum Outcome {
    Rows(Vec<QueryColumn>, Vec<Row>),
    Affected(u64),
}

/// Runs one statement, returning rows when it declares result columns.
async fn run_one(pool: &SqlitePool, sql: &str, params: &[Value]) -> Result<Outcome> {
    let prepared = pool.prepare(sql).await?;
    let columns = values::columns_of(prepared.columns());

    let mut query = sqlx::query(sql);
    for param in params {
        query = values::bind_json(query, param);
    }

    if columns.is_empty() {
        let done = query.execute(pool).await?;
        return Ok(Outcome::Affected(done.rows_affected()));
    }
    let rows = query.fetch_all(pool).await?;
    Ok(Outcome::Rows(
        columns,
        rows.iter().map(values::row_to_json).collect(),
    ))
}

/// SQLite implementation of [`DatabaseDriver`].
#[derive(Default)]
pub struct SqliteDriver {
    pool: Option<SqlitePool>,
    path: Option<String>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .field("connected", &self.pool.is_some())
            .finish()
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.as_ref().ok_or(DbDeskError::NotConnected)
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        let pool = connection::open_pool(config).await?;
        self.path = connection::database_path(config).map(str::to_string);
        info!("Opened SQLite database {}", self.path.as_deref().unwrap_or_default());
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Closed SQLite database");
        }
    }

    async fn ping(&self) -> bool {
        match self.pool() {
            Ok(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn cancel_query(&self) -> bool {
        false
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let pool = self.pool()?;
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(pool)
            .await?;
        let journal_mode: Option<String> = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_optional(pool)
            .await?;

        let mut details = serde_json::Map::new();
        if let Some(path) = &self.path {
            details.insert("file".to_string(), Value::String(path.clone()));
        }
        if let Some(mode) = journal_mode {
            details.insert("journalMode".to_string(), Value::String(mode));
        }
        Ok(ServerInfo {
            version: Some(version),
            details,
        })
    }

    async fn execute(&self, command: &str, params: &[Value]) -> QueryResult {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => return QueryResult::from_error(e),
        };
        let statements = split_statements(command);
        let mut batch = Batch::start();
        // Parameters only make sense for a single statement
        let params: &[Value] = if statements.len() == 1 { params } else { &[] };

        for statement in &statements {
            match run_one(pool, statement, params).await {
                Ok(Outcome::Rows(columns, rows)) => batch.rows(columns, rows),
                Ok(Outcome::Affected(count)) => batch.affected(count),
                Err(e) => return batch.fail(e),
            }
        }
        batch.finish()
    }

    async fn get_databases(&self) -> Result<Vec<String>> {
        schema::get_databases(self.pool()?).await
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        schema::get_tables(self.pool()?).await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        schema::get_columns(self.pool()?, table).await
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        schema::get_indexes(self.pool()?, table).await
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        schema::get_foreign_keys(self.pool()?, table).await
    }

    async fn get_primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        schema::get_primary_key_columns(self.pool()?, table).await
    }

    async fn get_table_ddl(&self, table: &str) -> Result<String> {
        schema::get_table_ddl(self.pool()?, table).await
    }

    async fn get_table_data(&self, table: &str, options: &DataOptions) -> QueryResult {
        let start = Instant::now();
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => return QueryResult::from_error(e),
        };
        let dialect = Dialect::Sqlite;
        let clause = build_where_clause(&options.filters, dialect, &HashMap::new());
        let sql = format!(
            "SELECT * FROM {}{}{}",
            dialect.quote_ident(table),
            clause.to_where_sql(),
            order_and_page(dialect, options, DEFAULT_PAGE_SIZE)
        );
        debug!("SQLite data query: {}", sql);

        let (mut columns, rows) = match run_one(pool, &sql, &clause.params).await {
            Ok(Outcome::Rows(columns, rows)) => (columns, rows),
            Ok(Outcome::Affected(_)) => (Vec::new(), Vec::new()),
            Err(e) => return QueryResult::from_error(e).timed(start),
        };
        let primary_key = schema::get_primary_key_columns(pool, table)
            .await
            .unwrap_or_default();
        for column in &mut columns {
            column.primary_key = primary_key.contains(&column.name);
        }
        QueryResult::with_rows(columns, rows).timed(start)
    }

    fn get_data_types(&self) -> Vec<String> {
        DATA_TYPES.iter().map(|t| (*t).to_string()).collect()
    }

    async fn add_column(&self, table: &str, column: &ColumnDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::add_column(pool, table, column).await
    }

    async fn modify_column(
        &self,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
    ) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::modify_column(pool, table, old_name, column).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_column(pool, table, column).await
    }

    async fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_column(pool, table, old_name, new_name).await
    }

    async fn create_index(&self, table: &str, index: &IndexDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_index(pool, table, index).await
    }

    async fn drop_index(&self, _table: &str, index: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_index(pool, index).await
    }

    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyDefinition,
    ) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::add_foreign_key(pool, table, foreign_key).await
    }

    async fn drop_foreign_key(&self, table: &str, name: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_foreign_key(pool, table, name).await
    }

    async fn create_table(&self, table: &TableDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_table(pool, table).await
    }

    async fn drop_table(&self, table: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_table(pool, table).await
    }

    async fn rename_table(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_table(pool, old_name, new_name).await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::insert_row(pool, table, row).await
    }

    async fn delete_row(&self, table: &str, key: &Row) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::delete_row(pool, table, key).await
    }

    async fn update_row(&self, table: &str, key: &Row, changes: &Row) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::update_row(pool, table, key, changes).await
    }

    async fn create_view(&self, view: &ViewDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_view(pool, view).await
    }

    async fn drop_view(&self, name: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_view(pool, name).await
    }

    async fn rename_view(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_view(pool, old_name, new_name).await
    }

    async fn get_view_ddl(&self, name: &str) -> Result<String> {
        schema::get_view_ddl(self.pool()?, name).await
    }

    async fn get_triggers(&self, table: Option<&str>) -> Result<Vec<TriggerInfo>> {
        schema::get_triggers(self.pool()?, table).await
    }

    async fn create_trigger(&self, trigger: &TriggerDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_trigger(pool, trigger).await
    }

    async fn drop_trigger(&self, name: &str, _table: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_trigger(pool, name).await
    }
}
