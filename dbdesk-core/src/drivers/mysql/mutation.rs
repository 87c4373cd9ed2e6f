//! Schema and row mutations for MySQL.
//!
//! DDL goes over the text protocol because several statements (triggers,
//! events, account management) cannot be prepared. MySQL commits DDL
//! implicitly, so multi-statement operations run one statement at a time
//! and stop at the first failure.

use super::values::bind_json;
use crate::error::DbDeskError;
use crate::models::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, Row, SchemaOperationResult,
    TableDefinition, ViewDefinition,
};
use crate::sql::{Dialect, ddl, dml};
use sqlx::{Executor, MySqlPool};
use std::collections::HashMap;
use tracing::debug;

const DIALECT: Dialect = Dialect::MySql;

/// Runs DDL statements in order; the first failure stops the run.
pub(crate) async fn run_ddl(pool: &MySqlPool, statements: Vec<String>) -> SchemaOperationResult {
    let sql = statements.join(";\n");
    let mut affected = 0_u64;
    for statement in &statements {
        debug!("MySQL DDL: {}", statement);
        match pool.execute(statement.as_str()).await {
            Ok(done) => affected = affected.saturating_add(done.rows_affected()),
            Err(e) => return SchemaOperationResult::failed(sql, DbDeskError::from(e)),
        }
    }
    SchemaOperationResult::ok_with_rows(sql, affected)
}

async fn run_statement(pool: &MySqlPool, statement: dml::Statement) -> SchemaOperationResult {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_json(query, param);
    }
    match query.execute(pool).await {
        Ok(done) => SchemaOperationResult::ok_with_rows(statement.sql.clone(), done.rows_affected()),
        Err(e) => SchemaOperationResult::failed(statement.sql.clone(), DbDeskError::from(e)),
    }
}

fn alter(table: &str, clause: &str) -> String {
    format!("ALTER TABLE {} {}", DIALECT.quote_ident(table), clause)
}

/// Column definition with an inline `PRIMARY KEY` when requested.
fn column_clause(column: &ColumnDefinition) -> String {
    let mut clause = ddl::column_definition(DIALECT, column);
    if column.primary_key {
        clause.push_str(" PRIMARY KEY");
    }
    clause
}

pub(crate) fn add_column_sql(table: &str, column: &ColumnDefinition) -> String {
    alter(table, &format!("ADD COLUMN {}", column_clause(column)))
}

/// `MODIFY COLUMN` when the name is kept, `CHANGE COLUMN` when it changes.
pub(crate) fn modify_column_sql(table: &str, old_name: &str, column: &ColumnDefinition) -> String {
    let definition = ddl::column_definition(DIALECT, column);
    if old_name == column.name {
        alter(table, &format!("MODIFY COLUMN {}", definition))
    } else {
        alter(
            table,
            &format!("CHANGE COLUMN {} {}", DIALECT.quote_ident(old_name), definition),
        )
    }
}

pub(crate) async fn add_column(
    pool: &MySqlPool,
    table: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![add_column_sql(table, column)]).await
}

pub(crate) async fn modify_column(
    pool: &MySqlPool,
    table: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![modify_column_sql(table, old_name, column)]).await
}

pub(crate) async fn drop_column(pool: &MySqlPool, table: &str, column: &str) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![alter(table, &format!("DROP COLUMN {}", DIALECT.quote_ident(column)))],
    )
    .await
}

pub(crate) async fn rename_column(
    pool: &MySqlPool,
    table: &str,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    let clause = format!(
        "RENAME COLUMN {} TO {}",
        DIALECT.quote_ident(old_name),
        DIALECT.quote_ident(new_name)
    );
    run_ddl(pool, vec![alter(table, &clause)]).await
}

pub(crate) async fn create_index(
    pool: &MySqlPool,
    table: &str,
    index: &IndexDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![ddl::create_index(DIALECT, table, index)]).await
}

pub(crate) fn drop_index_sql(table: &str, index: &str) -> String {
    if index.eq_ignore_ascii_case("PRIMARY") {
        alter(table, "DROP PRIMARY KEY")
    } else {
        format!(
            "DROP INDEX {} ON {}",
            DIALECT.quote_ident(index),
            DIALECT.quote_ident(table)
        )
    }
}

pub(crate) async fn drop_index(pool: &MySqlPool, table: &str, index: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![drop_index_sql(table, index)]).await
}

pub(crate) async fn add_foreign_key(
    pool: &MySqlPool,
    table: &str,
    foreign_key: &ForeignKeyDefinition,
) -> SchemaOperationResult {
    let clause = format!("ADD {}", ddl::foreign_key_clause(DIALECT, foreign_key));
    run_ddl(pool, vec![alter(table, &clause)]).await
}

pub(crate) async fn drop_foreign_key(pool: &MySqlPool, table: &str, name: &str) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![alter(table, &format!("DROP FOREIGN KEY {}", DIALECT.quote_ident(name)))],
    )
    .await
}

/// `CREATE TABLE` followed by each secondary index.
pub(crate) fn create_table_statements(table: &TableDefinition) -> Vec<String> {
    let mut statements = vec![ddl::create_table(DIALECT, table)];
    statements.extend(
        table
            .indexes
            .iter()
            .map(|index| ddl::create_index(DIALECT, &table.name, index)),
    );
    statements
}

pub(crate) async fn create_table(pool: &MySqlPool, table: &TableDefinition) -> SchemaOperationResult {
    if table.columns.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A table needs at least one column"),
        );
    }
    run_ddl(pool, create_table_statements(table)).await
}

pub(crate) async fn drop_table(pool: &MySqlPool, table: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP TABLE {}", DIALECT.quote_ident(table))]).await
}

/// `RENAME TABLE` also renames views within one database.
pub(crate) async fn rename_table(
    pool: &MySqlPool,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![format!(
            "RENAME TABLE {} TO {}",
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        )],
    )
    .await
}

pub(crate) async fn insert_row(pool: &MySqlPool, table: &str, row: &Row) -> SchemaOperationResult {
    run_statement(pool, dml::insert(DIALECT, table, row, &HashMap::new())).await
}

pub(crate) async fn delete_row(pool: &MySqlPool, table: &str, key: &Row) -> SchemaOperationResult {
    if key.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A row key is required to delete a row"),
        );
    }
    run_statement(pool, dml::delete(DIALECT, table, key, &HashMap::new())).await
}

pub(crate) async fn update_row(
    pool: &MySqlPool,
    table: &str,
    key: &Row,
    changes: &Row,
) -> SchemaOperationResult {
    if key.is_empty() || changes.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A row key and at least one change are required"),
        );
    }
    run_statement(pool, dml::update(DIALECT, table, key, changes, &HashMap::new())).await
}

pub(crate) async fn create_view(pool: &MySqlPool, view: &ViewDefinition) -> SchemaOperationResult {
    run_ddl(pool, vec![ddl::create_view(DIALECT, view)]).await
}

pub(crate) async fn drop_view(pool: &MySqlPool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP VIEW {}", DIALECT.quote_ident(name))]).await
}
