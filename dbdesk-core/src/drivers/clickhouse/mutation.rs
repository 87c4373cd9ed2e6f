//! ClickHouse DDL and row mutations.
//!
//! Statements run one at a time; ClickHouse has no transactional DDL, so a
//! failure leaves earlier statements of the same operation applied.
//! Row updates and deletes are asynchronous `ALTER TABLE` mutations.

use super::client::HttpClient;
use crate::error::DbDeskError;
use crate::models::{
    ColumnDefinition, IndexDefinition, Row, SchemaOperationResult, TableDefinition,
    UserDefinition, ViewDefinition,
};
use crate::sql::{Dialect, ddl, dml};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

const DIALECT: Dialect = Dialect::ClickHouse;

const DEFAULT_ENGINE: &str = "MergeTree()";
const DEFAULT_SKIP_INDEX_TYPE: &str = "minmax";

/// Runs statements in order and stops at the first failure.
pub(crate) async fn run_all(client: &HttpClient, statements: Vec<String>) -> SchemaOperationResult {
    let sql = statements.join(";\n");
    let mut written = 0_u64;
    for statement in &statements {
        debug!("ClickHouse DDL: {}", statement);
        match client.send(statement).await {
            Ok(response) => written = written.saturating_add(response.written_rows),
            Err(e) => return SchemaOperationResult::failed(sql, e),
        }
    }
    SchemaOperationResult::ok_with_rows(sql, written)
}

fn alter(table: &str, clause: &str) -> String {
    format!("ALTER TABLE {} {}", DIALECT.quote_ident(table), clause)
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| DIALECT.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn add_column_sql(table: &str, column: &ColumnDefinition) -> String {
    alter(
        table,
        &format!("ADD COLUMN {}", ddl::column_definition(DIALECT, column)),
    )
}

/// Optional `RENAME COLUMN` followed by `MODIFY COLUMN`.
pub(crate) fn modify_column_statements(
    table: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> Vec<String> {
    let mut statements = Vec::new();
    if old_name != column.name {
        statements.push(rename_column_sql(table, old_name, &column.name));
    }
    statements.push(alter(
        table,
        &format!("MODIFY COLUMN {}", ddl::column_definition(DIALECT, column)),
    ));
    statements
}

pub(crate) fn rename_column_sql(table: &str, old_name: &str, new_name: &str) -> String {
    alter(
        table,
        &format!(
            "RENAME COLUMN {} TO {}",
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        ),
    )
}

fn skip_index_clause(index: &IndexDefinition) -> String {
    let kind = index
        .index_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_SKIP_INDEX_TYPE);
    let expression = if index.columns.len() == 1 {
        DIALECT.quote_ident(&index.columns[0])
    } else {
        format!("({})", quoted_list(&index.columns))
    };
    format!(
        "INDEX {} {} TYPE {} GRANULARITY 1",
        DIALECT.quote_ident(&index.name),
        expression,
        kind
    )
}

pub(crate) fn create_index_sql(table: &str, index: &IndexDefinition) -> String {
    alter(table, &format!("ADD {}", skip_index_clause(index)))
}

/// Renders `CREATE TABLE` with inline skipping indices.
///
/// MergeTree-family engines get `ORDER BY` and `PRIMARY KEY` from the key
/// columns, or `ORDER BY tuple()` without one. Key columns are never wrapped
/// in `Nullable`.
pub(crate) fn create_table_sql(table: &TableDefinition) -> String {
    let primary_key: Vec<String> = table
        .primary_key_columns()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            if c.primary_key && c.nullable {
                let mut key = c.clone();
                key.nullable = false;
                ddl::column_definition(DIALECT, &key)
            } else {
                ddl::column_definition(DIALECT, c)
            }
        })
        .collect();
    parts.extend(table.indexes.iter().map(skip_index_clause));

    let engine = table
        .engine
        .as_deref()
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_ENGINE);
    let engine = if engine.contains('(') {
        engine.to_string()
    } else {
        format!("{}()", engine)
    };

    let mut sql = format!(
        "CREATE TABLE {} (\n  {}\n) ENGINE = {}",
        DIALECT.quote_ident(&table.name),
        parts.join(",\n  "),
        engine
    );
    if engine.contains("MergeTree") {
        if primary_key.is_empty() {
            sql.push_str("\nORDER BY tuple()");
        } else {
            let key = format!("({})", quoted_list(&primary_key));
            sql.push_str(&format!("\nORDER BY {}\nPRIMARY KEY {}", key, key));
        }
    }
    if let Some(comment) = table.comment.as_deref().filter(|c| !c.is_empty()) {
        sql.push_str(&format!("\nCOMMENT {}", DIALECT.string_literal(comment)));
    }
    sql
}

/// `CREATE USER` with an optional host restriction, then role grants.
pub(crate) fn create_user_statements(user: &UserDefinition) -> Vec<String> {
    let name = DIALECT.quote_ident(&user.name);
    let mut create = format!("CREATE USER {}", name);
    match user.password.as_ref().filter(|p| !p.is_empty()) {
        Some(password) => create.push_str(&format!(
            " IDENTIFIED WITH sha256_password BY {}",
            DIALECT.string_literal(password.expose())
        )),
        None => create.push_str(" NOT IDENTIFIED"),
    }
    match user.host.as_deref().filter(|h| !h.is_empty() && *h != "%") {
        Some(host) if host.parse::<IpAddr>().is_ok() || host.contains('/') => {
            create.push_str(&format!(" HOST IP {}", DIALECT.string_literal(host)));
        }
        Some(host) => create.push_str(&format!(" HOST NAME {}", DIALECT.string_literal(host))),
        None => create.push_str(" HOST ANY"),
    }
    let mut statements = vec![create];
    statements.extend(
        user.roles
            .iter()
            .map(|role| format!("GRANT {} TO {}", DIALECT.quote_ident(role), name)),
    );
    statements
}

pub(crate) async fn add_column(client: &HttpClient, table: &str, column: &ColumnDefinition) -> SchemaOperationResult {
    run_all(client, vec![add_column_sql(table, column)]).await
}

pub(crate) async fn modify_column(
    client: &HttpClient,
    table: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    run_all(client, modify_column_statements(table, old_name, column)).await
}

pub(crate) async fn drop_column(client: &HttpClient, table: &str, column: &str) -> SchemaOperationResult {
    run_all(
        client,
        vec![alter(table, &format!("DROP COLUMN {}", DIALECT.quote_ident(column)))],
    )
    .await
}

pub(crate) async fn rename_column(
    client: &HttpClient,
    table: &str,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    run_all(client, vec![rename_column_sql(table, old_name, new_name)]).await
}

pub(crate) async fn create_index(client: &HttpClient, table: &str, index: &IndexDefinition) -> SchemaOperationResult {
    run_all(client, vec![create_index_sql(table, index)]).await
}

pub(crate) async fn drop_index(client: &HttpClient, table: &str, index: &str) -> SchemaOperationResult {
    if index.eq_ignore_ascii_case("PRIMARY") {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("The primary key of a ClickHouse table cannot be dropped"),
        );
    }
    run_all(
        client,
        vec![alter(table, &format!("DROP INDEX {}", DIALECT.quote_ident(index)))],
    )
    .await
}

pub(crate) async fn create_table(client: &HttpClient, table: &TableDefinition) -> SchemaOperationResult {
    if table.columns.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A table needs at least one column"),
        );
    }
    run_all(client, vec![create_table_sql(table)]).await
}

pub(crate) async fn drop_table(client: &HttpClient, table: &str) -> SchemaOperationResult {
    run_all(client, vec![format!("DROP TABLE {}", DIALECT.quote_ident(table))]).await
}

/// `RENAME TABLE` renames views as well.
pub(crate) async fn rename_table(client: &HttpClient, old_name: &str, new_name: &str) -> SchemaOperationResult {
    run_all(
        client,
        vec![format!(
            "RENAME TABLE {} TO {}",
            DIALECT.quote_ident(old_name),
            DIALECT.quote_ident(new_name)
        )],
    )
    .await
}

pub(crate) async fn insert_row(client: &HttpClient, table: &str, row: &Row) -> SchemaOperationResult {
    if row.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("ClickHouse needs at least one column value to insert a row"),
        );
    }
    let statement = dml::insert(DIALECT, table, row, &HashMap::new());
    run_all(client, vec![statement.sql]).await
}

pub(crate) async fn delete_row(client: &HttpClient, table: &str, key: &Row) -> SchemaOperationResult {
    if key.is_empty() {
        return SchemaOperationResult::failed(
            String::new(),
            DbDeskError::query("A row key is required to delete a row"),
        );
    }
    let statement = dml::delete(DIALECT, table, key, &HashMap::new());
    run_all(client, vec![statement.sql]).await
}

pub(crate) async fn update_row(
    client: &HttpClient,
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
    let statement = dml::update(DIALECT, table, key, changes, &HashMap::new());
    run_all(client, vec![statement.sql]).await
}

pub(crate) async fn create_view(client: &HttpClient, view: &ViewDefinition) -> SchemaOperationResult {
    run_all(client, vec![ddl::create_view(DIALECT, view)]).await
}

pub(crate) async fn drop_view(client: &HttpClient, name: &str) -> SchemaOperationResult {
    run_all(client, vec![format!("DROP VIEW {}", DIALECT.quote_ident(name))]).await
}

pub(crate) async fn create_user(client: &HttpClient, user: &UserDefinition) -> SchemaOperationResult {
    let mut result = run_all(client, create_user_statements(user)).await;
    if let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) {
        result.sql = result
            .sql
            .replace(&DIALECT.string_literal(password.expose()), "'****'");
    }
    result
}

pub(crate) async fn drop_user(client: &HttpClient, name: &str) -> SchemaOperationResult {
    run_all(client, vec![format!("DROP USER IF EXISTS {}", DIALECT.quote_ident(name))]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn key_column(name: &str, data_type: &str) -> ColumnDefinition {
        let mut column = ColumnDefinition::new(name, data_type);
        column.primary_key = true;
        column
    }

    #[test]
    fn test_create_table_defaults_to_merge_tree() {
        let table = TableDefinition {
            name: "events".to_string(),
            columns: vec![
                key_column("tenant", "UInt32"),
                key_column("ts", "DateTime"),
                ColumnDefinition::new("payload", "String"),
            ],
            ..Default::default()
        };
        assert_eq!(
            create_table_sql(&table),
            "CREATE TABLE `events` (\n  `tenant` UInt32,\n  `ts` DateTime,\n  `payload` Nullable(String)\n) ENGINE = MergeTree()\nORDER BY (`tenant`, `ts`)\nPRIMARY KEY (`tenant`, `ts`)"
        );
    }

    #[test]
    fn test_create_table_without_key_orders_by_tuple() {
        let mut payload = ColumnDefinition::new("payload", "String");
        payload.nullable = false;
        let table = TableDefinition {
            name: "log".to_string(),
            columns: vec![payload],
            indexes: vec![IndexDefinition {
                name: "idx_payload".to_string(),
                columns: vec!["payload".to_string()],
                unique: false,
                index_type: Some("bloom_filter".to_string()),
            }],
            engine: Some("ReplacingMergeTree".to_string()),
            comment: Some("raw log".to_string()),
            ..Default::default()
        };
        assert_eq!(
            create_table_sql(&table),
            "CREATE TABLE `log` (\n  `payload` String,\n  INDEX `idx_payload` `payload` TYPE bloom_filter GRANULARITY 1\n) ENGINE = ReplacingMergeTree()\nORDER BY tuple()\nCOMMENT 'raw log'"
        );
    }

    #[test]
    fn test_other_engines_get_no_sorting_key() {
        let table = TableDefinition {
            name: "scratch".to_string(),
            columns: vec![ColumnDefinition::new("a", "UInt8")],
            engine: Some("Memory".to_string()),
            ..Default::default()
        };
        assert!(create_table_sql(&table).ends_with(") ENGINE = Memory()"));
    }

    #[test]
    fn test_modify_column_with_rename() {
        let mut column = ColumnDefinition::new("amount", "Decimal(18, 2)");
        column.nullable = false;
        assert_eq!(
            modify_column_statements("orders", "amt", &column),
            vec![
                "ALTER TABLE `orders` RENAME COLUMN `amt` TO `amount`".to_string(),
                "ALTER TABLE `orders` MODIFY COLUMN `amount` Decimal(18, 2)".to_string(),
            ]
        );
    }

    #[test]
    fn test_create_index_sql() {
        let index = IndexDefinition {
            name: "idx_ab".to_string(),
            columns: vec!["a".to_string(), "b".to_string()],
            unique: false,
            index_type: None,
        };
        assert_eq!(
            create_index_sql("t", &index),
            "ALTER TABLE `t` ADD INDEX `idx_ab` (`a`, `b`) TYPE minmax GRANULARITY 1"
        );
    }

    #[test]
    fn test_create_user_statements() {
        let mut user = UserDefinition {
            name: "etl".to_string(),
            password: Some(Secret::new("pw")),
            host: Some("10.0.0.0/8".to_string()),
            roles: vec!["writer".to_string()],
        };
        assert_eq!(
            create_user_statements(&user),
            vec![
                "CREATE USER `etl` IDENTIFIED WITH sha256_password BY 'pw' HOST IP '10.0.0.0/8'".to_string(),
                "GRANT `writer` TO `etl`".to_string(),
            ]
        );
        user.host = Some("%".to_string());
        user.password = None;
        user.roles.clear();
        assert_eq!(
            create_user_statements(&user),
            vec!["CREATE USER `etl` NOT IDENTIFIED HOST ANY".to_string()]
        );
    }
}
