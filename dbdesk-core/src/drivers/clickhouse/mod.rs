//! ClickHouse driver over the HTTP interface.
//!
//! # Module Structure
//! - `client`: request building, `FORMAT JSON` handling and cancellation
//! - `schema`: `system.*` introspection
//! - `mutation`: DDL, `ALTER TABLE` row mutations and users
//!
//! # ClickHouse-Specific Behavior
//! - There is no session: every statement is an independent request, so
//!   `SET` and `USE` do not persist between calls
//! - Parameters are inlined as escaped literals
//! - Foreign keys do not exist; lookups return an empty list and the
//!   mutations report the feature as unsupported

pub(crate) mod client;
pub(crate) mod mutation;
pub(crate) mod schema;

#[cfg(test)]
mod tests;

use super::DatabaseDriver;
use super::batch::Batch;
use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, ForeignKeyDefinition, ForeignKeyInfo,
    IndexDefinition, IndexInfo, PartitionInfo, QueryColumn, QueryResult, Row,
    SchemaOperationResult, ServerInfo, TableDefinition, TableInfo, UserDefinition, UserInfo,
    ViewDefinition,
};
use crate::sql::{Dialect, build_where_clause, order_and_page, split_statements};
use crate::tls::{self, TlsPlan};
use async_trait::async_trait;
use client::HttpClient;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_PAGE_SIZE: u64 = 100;

const DATA_TYPES: &[&str] = &[
    "UInt8", "UInt16", "UInt32", "UInt64", "UInt128", "UInt256", "Int8", "Int16", "Int32",
    "Int64", "Int128", "Int256", "Float32", "Float64", "Decimal", "Bool", "String",
    "FixedString", "UUID", "Date", "Date32", "DateTime", "DateTime64", "Enum8", "Enum16",
    "Array", "Tuple", "Map", "Nullable", "LowCardinality", "IPv4", "IPv6", "JSON",
];

#[derive(Debug)]
enum Outcome {
    Rows(Vec<QueryColumn>, Vec<Row>),
    Affected(u64),
}

async fn run_one(client: &HttpClient, sql: &str, params: &[Value]) -> Result<Outcome> {
    let sql = if params.is_empty() {
        sql.to_string()
    } else {
        client::inline_params(sql, params)?
    };

    if client::wants_json(&sql) {
        let response = client.send(&client::with_json_format(&sql)).await?;
        let (columns, rows) = client::parse_result_set(&response.body)?;
        return Ok(Outcome::Rows(columns, rows));
    }

    let response = client.send(&sql).await?;
    if client::has_format_clause(&sql) {
        // Caller-chosen output format; returned as text lines
        let rows = response
            .body
            .lines()
            .map(|line| {
                let mut row = Row::new();
                row.insert("result".to_string(), Value::String(line.to_string()));
                row
            })
            .collect();
        return Ok(Outcome::Rows(vec![QueryColumn::new("result", "String")], rows));
    }
    Ok(Outcome::Affected(response.written_rows))
}

/// ClickHouse implementation of [`DatabaseDriver`].
#[derive(Debug, Default)]
pub struct ClickHouseDriver {
    client: Option<HttpClient>,
}

impl ClickHouseDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&HttpClient> {
        self.client.as_ref().ok_or(DbDeskError::NotConnected)
    }
}

#[async_trait]
impl DatabaseDriver for ClickHouseDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::ClickHouse
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        config.validate()?;
        let plan = TlsPlan::resolve(config);
        let client = tls::connect_with_plan(&plan, |params| async move {
            let client = HttpClient::build(config, params.as_ref())?;
            client.send("SELECT 1").await.map_err(|e| match e {
                DbDeskError::Connection { .. } => e,
                other => DbDeskError::connection_failed("ClickHouse rejected the connection", other),
            })?;
            Ok(client)
        })
        .await?;
        info!("Connected to ClickHouse at {}", client.base_url());
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.cancel_all();
            debug!("Dropped ClickHouse HTTP client");
        }
    }

    async fn ping(&self) -> bool {
        match self.client() {
            Ok(client) => client.send("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    /// Aborts in-flight requests locally and kills them on the server.
    async fn cancel_query(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        let query_ids = client.cancel_all();
        if query_ids.is_empty() {
            return false;
        }
        let list = query_ids
            .iter()
            .map(|id| Dialect::ClickHouse.string_literal(id))
            .collect::<Vec<_>>()
            .join(", ");
        if let Err(e) = client
            .send(&format!("KILL QUERY WHERE query_id IN ({}) ASYNC", list))
            .await
        {
            warn!("Server-side KILL QUERY failed: {}", e);
        }
        info!("Cancelled {} ClickHouse request(s)", query_ids.len());
        true
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        let client = self.client()?;
        let rows = client
            .rows("SELECT version() AS version, currentDatabase() AS database, timezone() AS timezone, uptime() AS uptime")
            .await?;
        let row = rows.into_iter().next().unwrap_or_default();
        let version = client::text(&row, "version");
        let mut details = serde_json::Map::new();
        for key in ["database", "timezone", "uptime"] {
            if let Some(value) = row.get(key) {
                details.insert(key.to_string(), value.clone());
            }
        }
        details.insert(
            "endpoint".to_string(),
            Value::String(client.base_url().to_string()),
        );
        Ok(ServerInfo { version, details })
    }

    async fn execute(&self, command: &str, params: &[Value]) -> QueryResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return QueryResult::from_error(e),
        };
        let statements = split_statements(command);
        let mut batch = Batch::start();
        let params: &[Value] = if statements.len() == 1 { params } else { &[] };

        for statement in &statements {
            match run_one(client, statement, params).await {
                Ok(Outcome::Rows(columns, rows)) => batch.rows(columns, rows),
                Ok(Outcome::Affected(count)) => batch.affected(count),
                Err(e) => return batch.fail(e),
            }
        }
        batch.finish()
    }

    async fn get_databases(&self) -> Result<Vec<String>> {
        schema::get_databases(self.client()?).await
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        schema::get_tables(self.client()?).await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        schema::get_columns(self.client()?, table).await
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        schema::get_indexes(self.client()?, table).await
    }

    async fn get_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyInfo>> {
        self.client()?;
        Ok(Vec::new())
    }

    async fn get_primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        schema::get_primary_key_columns(self.client()?, table).await
    }

    async fn get_table_ddl(&self, table: &str) -> Result<String> {
        schema::show_create(self.client()?, table).await
    }

    async fn get_table_data(&self, table: &str, options: &DataOptions) -> QueryResult {
        let start = Instant::now();
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return QueryResult::from_error(e),
        };
        let dialect = Dialect::ClickHouse;
        let clause = build_where_clause(&options.filters, dialect, &HashMap::new());
        let sql = format!(
            "SELECT * FROM {}{}{}",
            dialect.quote_ident(table),
            clause.to_where_sql(),
            order_and_page(dialect, options, DEFAULT_PAGE_SIZE)
        );
        debug!("ClickHouse data query: {}", sql);

        let response = match client.send(&client::with_json_format(&sql)).await {
            Ok(response) => response,
            Err(e) => return QueryResult::from_error(e).timed(start),
        };
        let (mut columns, rows) = match client::parse_result_set(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => return QueryResult::from_error(e).timed(start),
        };
        let primary_key = schema::get_primary_key_columns(client, table)
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
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::add_column(client, table, column).await
    }

    async fn modify_column(
        &self,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
    ) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::modify_column(client, table, old_name, column).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_column(client, table, column).await
    }

    async fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_column(client, table, old_name, new_name).await
    }

    async fn create_index(&self, table: &str, index: &IndexDefinition) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_index(client, table, index).await
    }

    async fn drop_index(&self, table: &str, index: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_index(client, table, index).await
    }

    async fn add_foreign_key(
        &self,
        _table: &str,
        _foreign_key: &ForeignKeyDefinition,
    ) -> SchemaOperationResult {
        if self.client.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::ClickHouse)
    }

    async fn drop_foreign_key(&self, _table: &str, _name: &str) -> SchemaOperationResult {
        if self.client.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::ClickHouse)
    }

    async fn create_table(&self, table: &TableDefinition) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_table(client, table).await
    }

    async fn drop_table(&self, table: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_table(client, table).await
    }

    async fn rename_table(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_table(client, old_name, new_name).await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::insert_row(client, table, row).await
    }

    async fn delete_row(&self, table: &str, key: &Row) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::delete_row(client, table, key).await
    }

    async fn update_row(&self, table: &str, key: &Row, changes: &Row) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::update_row(client, table, key, changes).await
    }

    async fn create_view(&self, view: &ViewDefinition) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_view(client, view).await
    }

    async fn drop_view(&self, name: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_view(client, name).await
    }

    async fn rename_view(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_table(client, old_name, new_name).await
    }

    async fn get_view_ddl(&self, name: &str) -> Result<String> {
        schema::show_create(self.client()?, name).await
    }

    async fn get_users(&self) -> Result<Vec<UserInfo>> {
        schema::get_users(self.client()?).await
    }

    async fn create_user(&self, user: &UserDefinition) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_user(client, user).await
    }

    async fn drop_user(&self, name: &str, _host: Option<&str>) -> SchemaOperationResult {
        let Ok(client) = self.client() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_user(client, name).await
    }

    async fn get_partitions(&self, table: &str) -> Result<Vec<PartitionInfo>> {
        schema::get_partitions(self.client()?, table).await
    }
}
