//! MySQL driver.
//!
//! # Module Structure
//! - `connection`: pool setup, TLS mode mapping and `KILL QUERY` cancellation
//! - `values`: row decoding by column type name and parameter binding
//! - `schema`: `INFORMATION_SCHEMA` introspection and `SHOW CREATE` output
//! - `objects`: routines, triggers, users, events, charsets and partitions
//! - `mutation`: DDL and row mutations
//!
//! # MySQL-Specific Behavior
//! - Parameterless statements use the text protocol so any statement the
//!   server accepts interactively can run, including `CREATE TRIGGER`
//! - Statements with parameters are prepared
//! - `USE db` persists because the pool holds a single connection

pub(crate) mod connection;
pub(crate) mod mutation;
pub(crate) mod objects;
pub(crate) mod schema;
pub(crate) mod values;


use super::DatabaseDriver;
use super::batch::Batch;
use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, EventInfo, ForeignKeyDefinition,
    ForeignKeyInfo, IndexDefinition, IndexInfo, PartitionInfo, QueryColumn, QueryResult,
    RoutineInfo, RoutineKind, Row, SchemaOperationResult, ServerInfo, TableDefinition, TableInfo,
    TriggerDefinition, TriggerInfo, UserDefinition, UserInfo, ViewDefinition,
};
use crate::sql::{Dialect, build_where_clause, leading_keyword, order_and_page, split_statements};
use async_trait::async_trait;
use connection::Session;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::mysql::MySqlArguments;
use sqlx::{Either, Executor, MySql, MySqlPool, Row as _, Statement as _};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_PAGE_SIZE: u64 = 100;

const DATA_TYPES: &[&str] = &[
    "TINYINT", "SMALLINT", "MEDIUMINT", "INT", "BIGINT", "DECIMAL", "FLOAT", "DOUBLE", "BIT",
    "BOOLEAN", "CHAR", "VARCHAR", "TINYTEXT", "TEXT", "MEDIUMTEXT", "LONGTEXT", "BINARY",
    "VARBINARY", "BLOB", "MEDIUMBLOB", "LONGBLOB", "DATE", "TIME", "DATETIME", "TIMESTAMP",
    "YEAR", "ENUM", "SET", "JSON", "GEOMETRY", "POINT",
];

/// Statements that produce a result set even when it is empty.
const RESULT_SET_KEYWORDS: &[&str] = &[
    "SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH", "VALUES", "TABLE", "CHECKSUM",
];

/// Outcome of one statement.
#[derive(Debug)]
enum Outcome {
    Rows(Vec<QueryColumn>, Vec<Row>),
    Affected(u64),
}

/// Drains a statement's stream of rows and completion packets.
async fn drain<'q, E>(pool: &MySqlPool, query: E) -> Result<(Option<Vec<QueryColumn>>, Vec<Row>, u64)>
where
    E: 'q + sqlx::Execute<'q, MySql>,
{
    let mut stream = pool.fetch_many(query);
    let mut columns = None;
    let mut rows = Vec::new();
    let mut affected = 0_u64;
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => affected = affected.saturating_add(done.rows_affected()),
            Either::Right(row) => {
                if columns.is_none() {
                    columns = Some(values::columns_of(row.columns()));
                }
                rows.push(values::row_to_json(&row));
            }
        }
    }
    Ok((columns, rows, affected))
}

/// Runs one statement, returning rows when it produced or declares a result set.
async fn run_one(pool: &MySqlPool, sql: &str, params: &[Value]) -> Result<Outcome> {
    let (columns, rows, affected) = if params.is_empty() {
        drain(pool, sql).await?
    } else {
        let mut query: sqlx::query::Query<'_, MySql, MySqlArguments> = sqlx::query(sql);
        for param in params {
            query = values::bind_json(query, param);
        }
        drain(pool, query).await?
    };

    if let Some(columns) = columns {
        return Ok(Outcome::Rows(columns, rows));
    }
    if RESULT_SET_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
        // Empty result set; the column list comes from preparing the statement
        let columns = match pool.prepare(sql).await {
            Ok(statement) => values::columns_of(statement.columns()),
            Err(e) => {
                debug!("Could not describe empty MySQL result: {}", e);
                Vec::new()
            }
        };
        return Ok(Outcome::Rows(columns, rows));
    }
    Ok(Outcome::Affected(affected))
}

/// MySQL implementation of [`DatabaseDriver`].
#[derive(Default)]
pub struct MySqlDriver {
    session: Option<Session>,
}

impl std::fmt::Debug for MySqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlDriver")
            .field("connected", &self.session.is_some())
            .field(
                "connection_id",
                &self
                    .session
                    .as_ref()
                    .map(|s| s.connection_id.load(Ordering::SeqCst)),
            )
            .finish()
    }
}

impl MySqlDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&MySqlPool> {
        self.session
            .as_ref()
            .map(|s| &s.pool)
            .ok_or(DbDeskError::NotConnected)
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        config.validate()?;
        let session = connection::open(config).await?;
        info!(
            "Connected to MySQL at {}:{} (connection {})",
            config.host_or_default(),
            config.effective_port().unwrap_or(3306),
            session.connection_id.load(Ordering::SeqCst)
        );
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.pool.close().await;
            debug!("Closed MySQL connection");
        }
    }

    async fn ping(&self) -> bool {
        match self.pool() {
            Ok(pool) => pool.execute("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    async fn cancel_query(&self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let id = session.connection_id.load(Ordering::SeqCst);
        let killed = connection::kill_query(&session.options, id).await;
        if killed {
            info!("Sent KILL QUERY for MySQL connection {}", id);
        } else {
            warn!("Cancelling MySQL connection {} failed", id);
        }
        killed
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let pool = self.pool()?;
        let row = sqlx::query(
            "SELECT VERSION() AS version, CAST(@@version_comment AS CHAR) AS comment, CAST(@@character_set_server AS CHAR) AS charset, DATABASE() AS current_db",
        )
        .fetch_one(pool)
        .await?;

        let mut details = serde_json::Map::new();
        for key in ["comment", "charset", "current_db"] {
            if let Ok(Some(value)) = row.try_get::<Option<String>, _>(key) {
                let name = match key {
                    "current_db" => "database",
                    "charset" => "characterSet",
                    other => other,
                };
                details.insert(name.to_string(), Value::String(value));
            }
        }
        if let Some(session) = self.session.as_ref() {
            details.insert(
                "connectionId".to_string(),
                Value::from(session.connection_id.load(Ordering::SeqCst)),
            );
        }
        Ok(ServerInfo {
            version: row.try_get("version").ok(),
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
        let dialect = Dialect::MySql;
        let clause = build_where_clause(&options.filters, dialect, &HashMap::new());
        let sql = format!(
            "SELECT * FROM {}{}{}",
            dialect.quote_ident(table),
            clause.to_where_sql(),
            order_and_page(dialect, options, DEFAULT_PAGE_SIZE)
        );
        debug!("MySQL data query: {}", sql);

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

    async fn drop_index(&self, table: &str, index: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_index(pool, table, index).await
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
        mutation::rename_table(pool, old_name, new_name).await
    }

    async fn get_view_ddl(&self, name: &str) -> Result<String> {
        schema::get_view_ddl(self.pool()?, name).await
    }

    async fn get_routines(&self) -> Result<Vec<RoutineInfo>> {
        objects::get_routines(self.pool()?).await
    }

    async fn get_routine_definition(&self, name: &str, kind: RoutineKind) -> Result<String> {
        objects::get_routine_definition(self.pool()?, name, kind).await
    }

    async fn drop_routine(&self, name: &str, kind: RoutineKind) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_routine(pool, name, kind).await
    }

    async fn get_triggers(&self, table: Option<&str>) -> Result<Vec<TriggerInfo>> {
        objects::get_triggers(self.pool()?, table).await
    }

    async fn create_trigger(&self, trigger: &TriggerDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::create_trigger(pool, trigger).await
    }

    async fn drop_trigger(&self, name: &str, _table: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_trigger(pool, name).await
    }

    async fn get_users(&self) -> Result<Vec<UserInfo>> {
        objects::get_users(self.pool()?).await
    }

    async fn create_user(&self, user: &UserDefinition) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::create_user(pool, user).await
    }

    async fn drop_user(&self, name: &str, host: Option<&str>) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_user(pool, name, host).await
    }

    async fn get_partitions(&self, table: &str) -> Result<Vec<PartitionInfo>> {
        objects::get_partitions(self.pool()?, table).await
    }

    async fn get_events(&self) -> Result<Vec<EventInfo>> {
        objects::get_events(self.pool()?).await
    }

    async fn drop_event(&self, name: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_event(pool, name).await
    }

    async fn get_charsets(&self) -> Result<Vec<String>> {
        objects::get_charsets(self.pool()?).await
    }

    async fn get_collations(&self, charset: Option<&str>) -> Result<Vec<String>> {
        objects::get_collations(self.pool()?, charset).await
    }
}
