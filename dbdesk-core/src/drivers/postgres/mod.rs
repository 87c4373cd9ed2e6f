//! PostgreSQL driver.
//!
//! # Module Structure
//! - `connection`: pool setup, TLS mode mapping and backend cancellation
//! - `values`: OID type names, row decoding and parameter binding
//! - `schema`: `pg_catalog` introspection and DDL reconstruction
//! - `objects`: routines, triggers, roles, sequences and partitions
//! - `mutation`: transactional DDL and row mutations
//!
//! # PostgreSQL-Specific Behavior
//! - Tables outside `public` are addressed as `schema.table`
//! - Parameterless statements use the simple query protocol, so commands
//!   such as `VACUUM` or `DO` blocks behave as in `psql`
//! - Filter and row-mutation values are bound as text and cast to the
//!   column's declared type

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
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, ForeignKeyDefinition, ForeignKeyInfo,
    IndexDefinition, IndexInfo, PartitionInfo, QueryColumn, QueryResult, RoutineInfo, RoutineKind,
    Row, SchemaOperationResult, SequenceInfo, ServerInfo, TableDefinition, TableInfo,
    TriggerDefinition, TriggerInfo, UserDefinition, UserInfo, ViewDefinition,
};
use crate::sql::{Dialect, build_where_clause, leading_keyword, order_and_page, split_statements};
use async_trait::async_trait;
use connection::Session;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{Either, Executor, PgPool, Postgres, Row as _, Statement as _};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_PAGE_SIZE: u64 = 100;

const DATA_TYPES: &[&str] = &[
    "smallint", "integer", "bigint", "serial", "bigserial", "numeric", "real",
    "double precision", "money", "boolean", "char", "varchar", "text", "citext", "bytea",
    "date", "time", "timetz", "timestamp", "timestamptz", "interval", "uuid", "json", "jsonb",
    "xml", "inet", "cidr", "macaddr", "point", "tsvector", "int4range", "tstzrange",
];

/// Statements that produce a result set even when it is empty.
const RESULT_SET_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "VALUES", "TABLE", "EXPLAIN", "FETCH"];

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// How parameters are attached to a prepared statement.
type BindFn = for<'q, 'v> fn(PgQuery<'q>, &'v Value) -> PgQuery<'q>;

#[derive(Debug)]
enum Outcome {
    Rows(Vec<QueryColumn>, Vec<Row>),
    Affected(u64),
}

async fn drain<'q, E>(pool: &PgPool, query: E) -> Result<(Option<Vec<QueryColumn>>, Vec<Row>, u64)>
where
    E: 'q + sqlx::Execute<'q, Postgres>,
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

async fn run_one(pool: &PgPool, sql: &str, params: &[Value], bind: BindFn) -> Result<Outcome> {
    let (columns, rows, affected) = if params.is_empty() {
        drain(pool, sql).await?
    } else {
        let mut query: PgQuery<'_> = sqlx::query(sql);
        for param in params {
            query = bind(query, param);
        }
        drain(pool, query).await?
    };

    if let Some(columns) = columns {
        return Ok(Outcome::Rows(columns, rows));
    }
    if RESULT_SET_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
        let columns = match pool.prepare(sql).await {
            Ok(statement) => values::columns_of(statement.columns()),
            Err(e) => {
                debug!("Could not describe empty PostgreSQL result: {}", e);
                Vec::new()
            }
        };
        return Ok(Outcome::Rows(columns, rows));
    }
    Ok(Outcome::Affected(affected))
}

/// PostgreSQL implementation of [`DatabaseDriver`].
#[derive(Default)]
pub struct PostgresDriver {
    session: Option<Session>,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("connected", &self.session.is_some())
            .field(
                "backend_pid",
                &self
                    .session
                    .as_ref()
                    .map(|s| s.backend_pid.load(Ordering::SeqCst)),
            )
            .finish()
    }
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&PgPool> {
        self.session
            .as_ref()
            .map(|s| &s.pool)
            .ok_or(DbDeskError::NotConnected)
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSql
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        config.validate()?;
        let session = connection::open(config).await?;
        info!(
            "Connected to PostgreSQL at {}:{} (backend {})",
            config.host_or_default(),
            config.effective_port().unwrap_or(5432),
            session.backend_pid.load(Ordering::SeqCst)
        );
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.pool.close().await;
            debug!("Closed PostgreSQL connection");
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
        let pid = session.backend_pid.load(Ordering::SeqCst);
        let cancelled = connection::cancel_backend(&session.options, pid).await;
        if cancelled {
            info!("Cancelled query on PostgreSQL backend {}", pid);
        } else {
            warn!("Cancelling PostgreSQL backend {} failed", pid);
        }
        cancelled
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let pool = self.pool()?;
        let row = sqlx::query(
            "SELECT current_setting('server_version') AS version, version() AS full_version, current_database()::text AS current_db, current_user::text AS current_role, current_setting('server_encoding') AS encoding",
        )
        .fetch_one(pool)
        .await?;

        let mut details = serde_json::Map::new();
        for (column, key) in [
            ("full_version", "fullVersion"),
            ("current_db", "database"),
            ("current_role", "user"),
            ("encoding", "encoding"),
        ] {
            if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column) {
                details.insert(key.to_string(), Value::String(value));
            }
        }
        if let Some(session) = self.session.as_ref() {
            details.insert(
                "backendPid".to_string(),
                Value::from(session.backend_pid.load(Ordering::SeqCst)),
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
            match run_one(pool, statement, params, values::bind_json).await {
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
        let dialect = Dialect::Postgres;
        let types = schema::column_types(pool, table).await.unwrap_or_default();
        let clause = build_where_clause(&options.filters, dialect, &types);
        let sql = format!(
            "SELECT * FROM {}{}{}",
            dialect.quote_table(table),
            clause.to_where_sql(),
            order_and_page(dialect, options, DEFAULT_PAGE_SIZE)
        );
        debug!("PostgreSQL data query: {}", sql);

        let (mut columns, rows) = match run_one(pool, &sql, &clause.params, values::bind_text).await {
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
        mutation::rename_view(pool, old_name, new_name).await
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

    async fn drop_trigger(&self, name: &str, table: &str) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_trigger(pool, name, table).await
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

    async fn drop_user(&self, name: &str, _host: Option<&str>) -> SchemaOperationResult {
        let Ok(pool) = self.pool() else {
            return SchemaOperationResult::not_connected();
        };
        objects::drop_user(pool, name).await
    }

    async fn get_sequences(&self) -> Result<Vec<SequenceInfo>> {
        objects::get_sequences(self.pool()?).await
    }

    async fn get_partitions(&self, table: &str) -> Result<Vec<PartitionInfo>> {
        objects::get_partitions(self.pool()?, table).await
    }
}
