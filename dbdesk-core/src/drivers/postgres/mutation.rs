//! Schema and row mutations for PostgreSQL.
//!
//! DDL is transactional: every statement of one operation runs inside a
//! single transaction, so a failing step leaves the schema untouched.

use super::schema::{self, split_name};
use super::values::bind_text;
use crate::error::DbDeskError;
use crate::models::{
    ColumnDefinition, ColumnInfo, ForeignKeyDefinition, IndexDefinition, Row,
    SchemaOperationResult, TableDefinition, ViewDefinition,
};
use crate::sql::{Dialect, ddl, dml};
use sqlx::{Executor, PgPool};
use tracing::{debug, warn};

const DIALECT: Dialect = Dialect::Postgres;

/// Runs DDL statements in one transaction; any failure rolls back all of them.
pub(crate) async fn run_ddl(pool: &PgPool, statements: Vec<String>) -> SchemaOperationResult {
    let sql = statements.join(";\n");
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return SchemaOperationResult::failed(sql, DbDeskError::from(e)),
    };
    let mut affected = 0_u64;
    for statement in &statements {
        debug!("PostgreSQL DDL: {}", statement);
        match (&mut *tx).execute(statement.as_str()).await {
            Ok(done) => affected = affected.saturating_add(done.rows_affected()),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback after failed DDL failed: {}", rollback);
                }
                return SchemaOperationResult::failed(sql, DbDeskError::from(e));
            }
        }
    }
    match tx.commit().await {
        Ok(()) => SchemaOperationResult::ok_with_rows(sql, affected),
        Err(e) => SchemaOperationResult::failed(sql, DbDeskError::from(e)),
    }
}

async fn run_statement(pool: &PgPool, statement: dml::Statement) -> SchemaOperationResult {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_text(query, param);
    }
    match query.execute(pool).await {
        Ok(done) => SchemaOperationResult::ok_with_rows(statement.sql.clone(), done.rows_affected()),
        Err(e) => SchemaOperationResult::failed(statement.sql.clone(), DbDeskError::from(e)),
    }
}

fn alter(table: &str, clause: &str) -> String {
    format!("ALTER TABLE {} {}", DIALECT.quote_table(table), clause)
}

/// `schema.name` for objects living next to `table`.
fn sibling(table: &str, name: &str) -> String {
    let (schema, _) = split_name(table);
    format!("{}.{}", DIALECT.quote_ident(schema), DIALECT.quote_ident(name))
}

fn unique_constraint_name(table: &str, column: &str) -> String {
    format!("{}_{}_key", split_name(table).1, column)
}

fn comment_on_column(table: &str, column: &str, comment: Option<&str>) -> String {
    format!(
        "COMMENT ON COLUMN {}.{} IS {}",
        DIALECT.quote_table(table),
        DIALECT.quote_ident(column),
        comment
            .filter(|c| !c.is_empty())
            .map_or_else(|| "NULL".to_string(), |c| DIALECT.string_literal(c))
    )
}

pub(crate) fn add_column_statements(table: &str, column: &ColumnDefinition) -> Vec<String> {
    let mut definition = ddl::column_definition(DIALECT, column);
    if column.primary_key {
        definition.push_str(" PRIMARY KEY");
    }
    let mut statements = vec![alter(table, &format!("ADD COLUMN {}", definition))];
    if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
        statements.push(comment_on_column(table, &column.name, Some(comment)));
    }
    statements
}

/// One `ALTER` per changed aspect of the column.
///
/// `current` is the column as it exists; aspects that already match are
/// skipped. Without it every aspect is restated.
pub(crate) fn modify_column_statements(
    table: &str,
    old_name: &str,
    current: Option<&ColumnInfo>,
    column: &ColumnDefinition,
) -> Vec<String> {
    let mut statements = Vec::new();
    let name = DIALECT.quote_ident(&column.name);

    if old_name != column.name {
        statements.push(alter(
            table,
            &format!("RENAME COLUMN {} TO {}", DIALECT.quote_ident(old_name), name),
        ));
    }

    let new_type = column.full_type();
    if current.is_none_or(|c| !c.data_type.eq_ignore_ascii_case(&new_type)) {
        statements.push(alter(
            table,
            &format!(
                "ALTER COLUMN {} TYPE {} USING {}::{}",
                name, new_type, name, new_type
            ),
        ));
    }

    if current.is_none_or(|c| c.nullable != column.nullable) {
        let clause = if column.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
        statements.push(alter(table, &format!("ALTER COLUMN {} {}", name, clause)));
    }

    let new_default = column.default_value.as_deref().filter(|d| !d.is_empty());
    if current.is_none_or(|c| c.default_value.as_deref() != new_default) {
        let clause = match new_default {
            Some(default) => format!("SET DEFAULT {}", default),
            None => "DROP DEFAULT".to_string(),
        };
        statements.push(alter(table, &format!("ALTER COLUMN {} {}", name, clause)));
    }

    if current.is_none_or(|c| c.unique != column.unique) && !column.primary_key {
        let constraint = DIALECT.quote_ident(&unique_constraint_name(table, &column.name));
        let clause = if column.unique {
            format!("ADD CONSTRAINT {} UNIQUE ({})", constraint, name)
        } else {
            format!("DROP CONSTRAINT IF EXISTS {}", constraint)
        };
        statements.push(alter(table, &clause));
    }

    let new_comment = column.comment.as_deref().filter(|c| !c.is_empty());
    if current.is_none_or(|c| c.comment.as_deref() != new_comment) {
        statements.push(comment_on_column(table, &column.name, new_comment));
    }
    statements
}

pub(crate) async fn add_column(pool: &PgPool, table: &str, column: &ColumnDefinition) -> SchemaOperationResult {
    run_ddl(pool, add_column_statements(table, column)).await
}

pub(crate) async fn modify_column(
    pool: &PgPool,
    table: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    let columns = match schema::get_columns(pool, table).await {
        Ok(columns) => columns,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let Some(current) = columns.iter().find(|c| c.name == old_name) else {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query(format!("column \"{}\" does not exist", old_name)),
        );
    };
    let statements = modify_column_statements(table, old_name, Some(current), column);
    if statements.is_empty() {
        return SchemaOperationResult::ok(String::new());
    }
    run_ddl(pool, statements).await
}

pub(crate) async fn drop_column(pool: &PgPool, table: &str, column: &str) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![alter(table, &format!("DROP COLUMN {}", DIALECT.quote_ident(column)))],
    )
    .await
}

pub(crate) async fn rename_column(
    pool: &PgPool,
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

pub(crate) async fn create_index(pool: &PgPool, table: &str, index: &IndexDefinition) -> SchemaOperationResult {
    run_ddl(pool, vec![ddl::create_index(DIALECT, table, index)]).await
}

/// Drops an index, or the constraint that owns it.
///
/// Primary key and unique constraint indexes cannot be dropped directly.
pub(crate) async fn drop_index(pool: &PgPool, table: &str, index: &str) -> SchemaOperationResult {
    let owned_by_constraint: bool = match sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_constraint WHERE conrelid = to_regclass($1) AND conname = $2 AND conindid <> 0)",
    )
    .bind(schema::regclass_name(table))
    .bind(index)
    .fetch_one(pool)
    .await
    {
        Ok(exists) => exists,
        Err(e) => return SchemaOperationResult::failed(String::new(), DbDeskError::from(e)),
    };

    let statement = if owned_by_constraint {
        alter(table, &format!("DROP CONSTRAINT {}", DIALECT.quote_ident(index)))
    } else {
        format!("DROP INDEX {}", sibling(table, index))
    };
    run_ddl(pool, vec![statement]).await
}

pub(crate) async fn add_foreign_key(
    pool: &PgPool,
    table: &str,
    foreign_key: &ForeignKeyDefinition,
) -> SchemaOperationResult {
    let clause = format!("ADD {}", ddl::foreign_key_clause(DIALECT, foreign_key));
    run_ddl(pool, vec![alter(table, &clause)]).await
}

pub(crate) async fn drop_foreign_key(pool: &PgPool, table: &str, name: &str) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![alter(table, &format!("DROP CONSTRAINT {}", DIALECT.quote_ident(name)))],
    )
    .await
}

/// `CREATE TABLE`, its indexes, then table and column comments.
pub(crate) fn create_table_statements(table: &TableDefinition) -> Vec<String> {
    let mut statements = vec![ddl::create_table(DIALECT, table)];
    statements.extend(
        table
            .indexes
            .iter()
            .map(|index| ddl::create_index(DIALECT, &table.name, index)),
    );
    if let Some(comment) = table.comment.as_deref().filter(|c| !c.is_empty()) {
        statements.push(format!(
            "COMMENT ON TABLE {} IS {}",
            DIALECT.quote_table(&table.name),
            DIALECT.string_literal(comment)
        ));
    }
    for column in &table.columns {
        if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
            statements.push(comment_on_column(&table.name, &column.name, Some(comment)));
        }
    }
    statements
}

pub(crate) async fn create_table(pool: &PgPool, table: &TableDefinition) -> SchemaOperationResult {
    if table.columns.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A table needs at least one column"),
        );
    }
    run_ddl(pool, create_table_statements(table)).await
}

pub(crate) async fn drop_table(pool: &PgPool, table: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP TABLE {}", DIALECT.quote_table(table))]).await
}

/// `ALTER TABLE|VIEW ... RENAME TO`; the relation stays in its schema.
pub(crate) fn rename_relation_sql(kind: &str, old_name: &str, new_name: &str) -> String {
    let (_, bare) = split_name(new_name);
    format!(
        "ALTER {} {} RENAME TO {}",
        kind,
        DIALECT.quote_table(old_name),
        DIALECT.quote_ident(bare)
    )
}

pub(crate) async fn rename_table(pool: &PgPool, old_name: &str, new_name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![rename_relation_sql("TABLE", old_name, new_name)]).await
}

pub(crate) async fn rename_view(pool: &PgPool, old_name: &str, new_name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![rename_relation_sql("VIEW", old_name, new_name)]).await
}

pub(crate) async fn insert_row(pool: &PgPool, table: &str, row: &Row) -> SchemaOperationResult {
    let types = schema::column_types(pool, table).await.unwrap_or_default();
    run_statement(pool, dml::insert(DIALECT, table, row, &types)).await
}

pub(crate) async fn delete_row(pool: &PgPool, table: &str, key: &Row) -> SchemaOperationResult {
    if key.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A row key is required to delete a row"),
        );
    }
    let types = schema::column_types(pool, table).await.unwrap_or_default();
    run_statement(pool, dml::delete(DIALECT, table, key, &types)).await
}

pub(crate) async fn update_row(
    pool: &PgPool,
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
    let types = schema::column_types(pool, table).await.unwrap_or_default();
    run_statement(pool, dml::update(DIALECT, table, key, changes, &types)).await
}

pub(crate) async fn create_view(pool: &PgPool, view: &ViewDefinition) -> SchemaOperationResult {
    run_ddl(pool, vec![ddl::create_view(DIALECT, view)]).await
}

pub(crate) async fn drop_view(pool: &PgPool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP VIEW {}", DIALECT.quote_table(name))]).await
}
