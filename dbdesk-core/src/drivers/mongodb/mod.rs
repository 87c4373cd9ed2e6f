//! MongoDB driver.
//!
//! # Module Structure
//! - `connection`: client options, TLS material and the handshake
//! - `shell`: parser for `db.<collection>.<method>(...)` commands
//! - `commands`: runs parsed commands and shapes their output
//! - `inference`: column inference from sampled documents
//! - `values`: BSON to JSON conversion and filter value coercion
//! - `filter`: data-browsing filters as a query document
//! - `schema`: collection, index, view and user introspection
//! - `mutation`: field, index, collection, document, view and user changes
//!
//! # MongoDB-Specific Behavior
//! - Collections are tables; columns are inferred from the newest documents
//! - `_id` is the only key and is never renamed, removed or overwritten
//! - Foreign keys do not exist; lookups return an empty list and the
//!   mutations report the feature as unsupported
//! - Running commands cannot be cancelled

pub(crate) mod commands;
pub(crate) mod connection;
pub(crate) mod filter;
pub(crate) mod inference;
pub(crate) mod mutation;
pub(crate) mod schema;
pub(crate) mod shell;
pub(crate) mod values;

#[cfg(test)]
mod tests;

use super::DatabaseDriver;
use crate::config::ConnectionConfig;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ColumnInfo, DataOptions, DatabaseType, ForeignKeyDefinition, ForeignKeyInfo,
    IndexDefinition, IndexInfo, QueryColumn, QueryResult, Row, SchemaOperationResult, ServerInfo,
    TableDefinition, TableInfo, UserDefinition, UserInfo, ViewDefinition,
};
use async_trait::async_trait;
use connection::Session;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

/// Documents per page when browsing a collection.
const DEFAULT_PAGE_SIZE: u64 = 50;

const DATA_TYPES: &[&str] = &[
    "String", "Int32", "Int64", "Double", "Decimal128", "Boolean", "Date", "ObjectId", "Array",
    "Object", "Binary", "Timestamp", "RegExp", "Null",
];

/// Inferred columns followed by any field only seen in the page itself.
fn merge_columns(inferred: &[ColumnInfo], page: &[Document]) -> Vec<QueryColumn> {
    let mut columns: Vec<QueryColumn> = inferred
        .iter()
        .map(|c| QueryColumn {
            name: c.name.clone(),
            data_type: c.data_type.clone(),
            primary_key: c.primary_key,
        })
        .collect();
    for column in inference::query_columns(page) {
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(column);
        }
    }
    columns
}

/// MongoDB implementation of [`DatabaseDriver`].
#[derive(Debug, Default)]
pub struct MongoDriver {
    session: Option<Session>,
}

impl MongoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(DbDeskError::NotConnected)
    }

    async fn browse(&self, collection: &str, options: &DataOptions) -> Result<QueryResult> {
        let session = self.session()?;
        let coll = session.collection(collection);
        let sample = inference::sample_documents(&coll).await?;
        let inferred = inference::infer_columns(&sample);
        let field_types = inference::field_types(&inferred);

        let query = filter::build_filter(&options.filters, &field_types);
        let limit = i64::try_from(options.limit_or(DEFAULT_PAGE_SIZE)).unwrap_or(i64::MAX);
        debug!(
            "MongoDB browse {} filter={} limit={} skip={}",
            collection,
            values::shell_json(&query),
            limit,
            options.offset_or_zero()
        );

        let mut find = coll
            .find(query)
            .skip(options.offset_or_zero())
            .limit(limit);
        if let Some(sort) = filter::sort_document(options) {
            find = find.sort(sort);
        }
        let page: Vec<Document> = find.await?.try_collect().await?;
        let columns = merge_columns(&inferred, &page);
        let rows = page.iter().map(values::document_to_row).collect();
        Ok(QueryResult::with_rows(columns, rows))
    }
}

#[async_trait]
impl DatabaseDriver for MongoDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.disconnect().await;
        config.validate()?;
        let session = connection::open(config).await?;
        info!("Connected to MongoDB database {}", session.database);
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.client.shutdown().await;
            info!("Disconnected from MongoDB");
        }
    }

    async fn ping(&self) -> bool {
        match self.session() {
            Ok(session) => session
                .admin()
                .run_command(doc! { "ping": 1 })
                .await
                .is_ok(),
            Err(_) => false,
        }
    }

    async fn cancel_query(&self) -> bool {
        false
    }

    async fn server_info(&self) -> Result<ServerInfo> {
        schema::server_info(self.session()?).await
    }

    /// Runs a shell-style command. Positional parameters are not supported.
    async fn execute(&self, command: &str, params: &[Value]) -> QueryResult {
        let start = Instant::now();
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => return QueryResult::from_error(e),
        };
        if !params.is_empty() {
            debug!("Ignoring {} parameter(s) for MongoDB command", params.len());
        }
        let parsed = match shell::parse(command) {
            Ok(parsed) => parsed,
            Err(e) => return QueryResult::from_error(e).timed(start),
        };
        debug!(
            "MongoDB command {:?} on {}",
            parsed.method,
            parsed.collection.as_deref().unwrap_or("<database>")
        );
        match commands::run(&session.db(), parsed).await {
            Ok(outcome) => outcome.into_result().timed(start),
            Err(e) => QueryResult::from_error(e).timed(start),
        }
    }

    async fn get_databases(&self) -> Result<Vec<String>> {
        schema::get_databases(self.session()?).await
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        schema::get_tables(self.session()?).await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        schema::get_columns(self.session()?, table).await
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        schema::get_indexes(self.session()?, table).await
    }

    async fn get_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyInfo>> {
        self.session()?;
        Ok(Vec::new())
    }

    async fn get_primary_key_columns(&self, _table: &str) -> Result<Vec<String>> {
        self.session()?;
        Ok(vec!["_id".to_string()])
    }

    async fn get_table_ddl(&self, table: &str) -> Result<String> {
        schema::table_ddl(self.session()?, table).await
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

    async fn add_column(&self, table: &str, column: &ColumnDefinition) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::add_column(session, table, column).await
    }

    async fn modify_column(
        &self,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
    ) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::modify_column(session, table, old_name, column).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_column(session, table, column).await
    }

    async fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
    ) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_column(session, table, old_name, new_name).await
    }

    async fn create_index(&self, table: &str, index: &IndexDefinition) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_index(session, table, index).await
    }

    async fn drop_index(&self, table: &str, index: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_index(session, table, index).await
    }

    async fn add_foreign_key(
        &self,
        _table: &str,
        _foreign_key: &ForeignKeyDefinition,
    ) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::MongoDb)
    }

    async fn drop_foreign_key(&self, _table: &str, _name: &str) -> SchemaOperationResult {
        if self.session.is_none() {
            return SchemaOperationResult::not_connected();
        }
        SchemaOperationResult::unsupported("Foreign keys", DatabaseType::MongoDb)
    }

    async fn create_table(&self, table: &TableDefinition) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_table(session, table).await
    }

    async fn drop_table(&self, table: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_table(session, table).await
    }

    async fn rename_table(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_table(session, old_name, new_name).await
    }

    async fn insert_row(&self, table: &str, row: &Row) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::insert_row(session, table, row).await
    }

    async fn delete_row(&self, table: &str, key: &Row) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::delete_row(session, table, key).await
    }

    async fn update_row(&self, table: &str, key: &Row, changes: &Row) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::update_row(session, table, key, changes).await
    }

    async fn create_view(&self, view: &ViewDefinition) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_view(session, view).await
    }

    async fn drop_view(&self, name: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_table(session, name).await
    }

    async fn rename_view(&self, old_name: &str, new_name: &str) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::rename_view(session, old_name, new_name).await
    }

    async fn get_view_ddl(&self, name: &str) -> Result<String> {
        schema::view_ddl(self.session()?, name).await
    }

    async fn get_users(&self) -> Result<Vec<UserInfo>> {
        schema::get_users(self.session()?).await
    }

    async fn create_user(&self, user: &UserDefinition) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::create_user(session, user).await
    }

    /// `host` names the database that owns the user.
    async fn drop_user(&self, name: &str, host: Option<&str>) -> SchemaOperationResult {
        let Ok(session) = self.session() else {
            return SchemaOperationResult::not_connected();
        };
        mutation::drop_user(session, name, host).await
    }
}
