//! Schema and row mutations for SQLite.
//!
//! Column and foreign key changes try `ALTER TABLE` first and fall back to
//! [`recreate`] when SQLite rejects the statement as unsupported.

use super::recreate::{self, Modification, RecreatePlan, SqliteExecutor, TableSnapshot};
use super::values::bind_json;
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, Row, SchemaOperationResult,
    TableDefinition, TriggerDefinition, ViewDefinition,
};
use crate::sql::{Dialect, ddl, dml};
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info};

const DIALECT: Dialect = Dialect::Sqlite;

static VIEW_BODY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*CREATE\s+(?:TEMP\w*\s+)?VIEW\s+.*?\s+AS\s+(.*)$").ok());

/// Runs statements, inside one transaction when there are several.
pub(crate) async fn run_statements(pool: &SqlitePool, statements: &[String]) -> Result<()> {
    if let [single] = statements {
        sqlx::query(single).execute(pool).await?;
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn run_ddl(pool: &SqlitePool, statements: Vec<String>) -> SchemaOperationResult {
    let sql = statements.join(";\n");
    match run_statements(pool, &statements).await {
        Ok(()) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Rebuilds `table` with `modification` applied.
pub(crate) async fn recreate(
    pool: &SqlitePool,
    table: &str,
    modification: &Modification,
) -> SchemaOperationResult {
    let plan = match TableSnapshot::capture(pool, table)
        .await
        .and_then(|snapshot| RecreatePlan::build(&snapshot, modification))
    {
        Ok(plan) => plan,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let sql = plan.to_sql();

    let mut executor = match SqliteExecutor::acquire(pool).await {
        Ok(executor) => executor,
        Err(e) => return SchemaOperationResult::failed(sql, e),
    };
    let outcome = recreate::run_plan(&mut executor, &plan).await;
    executor.finish().await;

    match outcome {
        Ok(()) => {
            info!("Rebuilt table {} ({} statements)", table, plan.statements.len());
            SchemaOperationResult::ok(sql)
        }
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Tries `sql` in place and rebuilds the table if SQLite cannot do it.
async fn alter_or_recreate(
    pool: &SqlitePool,
    table: &str,
    sql: String,
    modification: Modification,
) -> SchemaOperationResult {
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => SchemaOperationResult::ok(sql),
        Err(e) => {
            let message = e.to_string();
            if recreate::needs_recreate(&message) {
                debug!("In-place ALTER on {} failed ({}); rebuilding", table, message);
                recreate(pool, table, &modification).await
            } else {
                SchemaOperationResult::failed(sql, DbDeskError::from(e))
            }
        }
    }
}

pub(crate) async fn add_column(
    pool: &SqlitePool,
    table: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    let modification = Modification::AddColumn(column.clone());
    // ADD COLUMN cannot carry UNIQUE or PRIMARY KEY constraints
    if column.unique || column.primary_key {
        return recreate(pool, table, &modification).await;
    }
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        DIALECT.quote_ident(table),
        ddl::column_definition(DIALECT, column)
    );
    alter_or_recreate(pool, table, sql, modification).await
}

pub(crate) async fn modify_column(
    pool: &SqlitePool,
    table: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    recreate(
        pool,
        table,
        &Modification::ModifyColumn {
            old_name: old_name.to_string(),
            column: column.clone(),
        },
    )
    .await
}

pub(crate) async fn drop_column(pool: &SqlitePool, table: &str, column: &str) -> SchemaOperationResult {
    let sql = format!(
        "ALTER TABLE {} DROP COLUMN {}",
        DIALECT.quote_ident(table),
        DIALECT.quote_ident(column)
    );
    alter_or_recreate(pool, table, sql, Modification::DropColumn(column.to_string())).await
}

pub(crate) async fn rename_column(
    pool: &SqlitePool,
    table: &str,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    let sql = format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        DIALECT.quote_ident(table),
        DIALECT.quote_ident(old_name),
        DIALECT.quote_ident(new_name)
    );
    let modification = Modification::RenameColumn {
        old_name: old_name.to_string(),
        new_name: new_name.to_string(),
    };
    alter_or_recreate(pool, table, sql, modification).await
}

pub(crate) async fn add_foreign_key(
    pool: &SqlitePool,
    table: &str,
    foreign_key: &ForeignKeyDefinition,
) -> SchemaOperationResult {
    // SQLite has no ADD CONSTRAINT; the attempt fails with a syntax error
    let sql = format!(
        "ALTER TABLE {} ADD {}",
        DIALECT.quote_ident(table),
        ddl::foreign_key_clause(DIALECT, foreign_key)
    );
    alter_or_recreate(
        pool,
        table,
        sql,
        Modification::AddForeignKey(foreign_key.clone()),
    )
    .await
}

pub(crate) async fn drop_foreign_key(
    pool: &SqlitePool,
    table: &str,
    name: &str,
) -> SchemaOperationResult {
    let sql = format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        DIALECT.quote_ident(table),
        DIALECT.quote_ident(name)
    );
    alter_or_recreate(pool, table, sql, Modification::DropForeignKey(name.to_string())).await
}

pub(crate) async fn create_index(
    pool: &SqlitePool,
    table: &str,
    index: &IndexDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![ddl::create_index(DIALECT, table, index)]).await
}

pub(crate) async fn drop_index(pool: &SqlitePool, index: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP INDEX {}", DIALECT.quote_ident(index))]).await
}

pub(crate) async fn create_table(pool: &SqlitePool, table: &TableDefinition) -> SchemaOperationResult {
    if table.columns.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A table needs at least one column"),
        );
    }
    let mut statements = vec![ddl::create_table(DIALECT, table)];
    statements.extend(
        table
            .indexes
            .iter()
            .map(|index| ddl::create_index(DIALECT, &table.name, index)),
    );
    run_ddl(pool, statements).await
}

pub(crate) async fn drop_table(pool: &SqlitePool, table: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP TABLE {}", DIALECT.quote_ident(table))]).await
}

pub(crate) async fn rename_table(
    pool: &SqlitePool,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        )],
    )
    .await
}

async fn run_statement(pool: &SqlitePool, statement: dml::Statement) -> SchemaOperationResult {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_json(query, param);
    }
    match query.execute(pool).await {
        Ok(done) => SchemaOperationResult::ok_with_rows(statement.sql.clone(), done.rows_affected()),
        Err(e) => SchemaOperationResult::failed(statement.sql.clone(), DbDeskError::from(e)),
    }
}

pub(crate) async fn insert_row(pool: &SqlitePool, table: &str, row: &Row) -> SchemaOperationResult {
    run_statement(pool, dml::insert(DIALECT, table, row, &HashMap::new())).await
}

pub(crate) async fn delete_row(pool: &SqlitePool, table: &str, key: &Row) -> SchemaOperationResult {
    if key.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A row key is required to delete a row"),
        );
    }
    run_statement(pool, dml::delete(DIALECT, table, key, &HashMap::new())).await
}

pub(crate) async fn update_row(
    pool: &SqlitePool,
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

pub(crate) async fn create_view(pool: &SqlitePool, view: &ViewDefinition) -> SchemaOperationResult {
    let mut statements = Vec::new();
    // No CREATE OR REPLACE in SQLite
    if view.replace {
        statements.push(format!("DROP VIEW IF EXISTS {}", DIALECT.quote_ident(&view.name)));
    }
    statements.push(ddl::create_view(DIALECT, view));
    run_ddl(pool, statements).await
}

pub(crate) async fn drop_view(pool: &SqlitePool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP VIEW {}", DIALECT.quote_ident(name))]).await
}

/// Body of a `CREATE VIEW` statement after `AS`.
pub(crate) fn view_body(create_sql: &str) -> Option<String> {
    VIEW_BODY
        .as_ref()
        .and_then(|re| re.captures(create_sql))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_end_matches(';').to_string())
}

/// SQLite cannot rename views, so the view is dropped and recreated.
pub(crate) async fn rename_view(
    pool: &SqlitePool,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    let existing = match super::schema::get_view_ddl(pool, old_name).await {
        Ok(sql) => sql,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let Some(body) = view_body(&existing) else {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query(format!("Could not parse definition of view {}", old_name)),
        );
    };
    let view = ViewDefinition {
        name: new_name.to_string(),
        definition: body,
        replace: false,
        if_not_exists: false,
    };
    run_ddl(
        pool,
        vec![
            format!("DROP VIEW {}", DIALECT.quote_ident(old_name)),
            ddl::create_view(DIALECT, &view),
        ],
    )
    .await
}

/// Renders `CREATE TRIGGER ... BEGIN body; END`.
pub(crate) fn create_trigger_sql(trigger: &TriggerDefinition) -> String {
    let body = trigger.body.trim().trim_end_matches(';');
    format!(
        "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW BEGIN {}; END",
        DIALECT.quote_ident(&trigger.name),
        trigger.timing.to_ascii_uppercase(),
        trigger.event.to_ascii_uppercase(),
        DIALECT.quote_ident(&trigger.table),
        body
    )
}

pub(crate) async fn create_trigger(
    pool: &SqlitePool,
    trigger: &TriggerDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![create_trigger_sql(trigger)]).await
}

pub(crate) async fn drop_trigger(pool: &SqlitePool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP TRIGGER IF EXISTS {}", DIALECT.quote_ident(name))]).await
}
