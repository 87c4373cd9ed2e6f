//! Row mutation statements with bound parameters.

use super::{Binder, Dialect};
use crate::models::Row;
use serde_json::Value;
use std::collections::HashMap;

/// A statement plus the values bound to its placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    /// Statement text
    pub sql: String,
    /// Bound values in placeholder order
    pub params: Vec<Value>,
}

fn key_condition(binder: &mut Binder<'_>, dialect: Dialect, key: &Row) -> String {
    key.iter()
        .map(|(column, value)| {
            let quoted = dialect.quote_ident(column);
            if value.is_null() {
                format!("{} IS NULL", quoted)
            } else {
                format!("{} = {}", quoted, binder.typed(column, value))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `INSERT INTO t (...) VALUES (...)`.
///
/// An empty row inserts defaults.
pub fn insert(
    dialect: Dialect,
    table: &str,
    row: &Row,
    column_types: &HashMap<String, String>,
) -> Statement {
    let table_sql = dialect.quote_table(table);
    if row.is_empty() {
        let sql = match dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table_sql),
            _ => format!("INSERT INTO {} DEFAULT VALUES", table_sql),
        };
        return Statement {
            sql,
            params: Vec::new(),
        };
    }

    let mut binder = Binder::new(dialect, column_types);
    let columns: Vec<String> = row.keys().map(|c| dialect.quote_ident(c)).collect();
    let values: Vec<String> = row.iter().map(|(c, v)| binder.typed(c, v)).collect();
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_sql,
            columns.join(", "),
            values.join(", ")
        ),
        params: binder.into_params(),
    }
}

/// `UPDATE t SET ... WHERE <key>`; ClickHouse gets `ALTER TABLE t UPDATE`.
pub fn update(
    dialect: Dialect,
    table: &str,
    key: &Row,
    changes: &Row,
    column_types: &HashMap<String, String>,
) -> Statement {
    let mut binder = Binder::new(dialect, column_types);
    let assignments: Vec<String> = changes
        .iter()
        .map(|(c, v)| format!("{} = {}", dialect.quote_ident(c), binder.typed(c, v)))
        .collect();
    let condition = key_condition(&mut binder, dialect, key);
    let table_sql = dialect.quote_table(table);
    let sql = match dialect {
        Dialect::ClickHouse => format!(
            "ALTER TABLE {} UPDATE {} WHERE {}",
            table_sql,
            assignments.join(", "),
            condition
        ),
        _ => format!(
            "UPDATE {} SET {} WHERE {}",
            table_sql,
            assignments.join(", "),
            condition
        ),
    };
    Statement {
        sql,
        params: binder.into_params(),
    }
}

/// `DELETE FROM t WHERE <key>`; ClickHouse gets `ALTER TABLE t DELETE`.
pub fn delete(
    dialect: Dialect,
    table: &str,
    key: &Row,
    column_types: &HashMap<String, String>,
) -> Statement {
    let mut binder = Binder::new(dialect, column_types);
    let condition = key_condition(&mut binder, dialect, key);
    let table_sql = dialect.quote_table(table);
    let sql = match dialect {
        Dialect::ClickHouse => format!("ALTER TABLE {} DELETE WHERE {}", table_sql, condition),
        _ => format!("DELETE FROM {} WHERE {}", table_sql, condition),
    };
    Statement {
        sql,
        params: binder.into_params(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_insert_mysql() {
        let stmt = insert(
            Dialect::MySql,
            "users",
            &row(json!({"age": 31, "name": "ann"})),
            &HashMap::new(),
        );
        assert_eq!(stmt.sql, "INSERT INTO `users` (`age`, `name`) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![json!(31), json!("ann")]);
    }

    #[test]
    fn test_insert_empty_row_uses_defaults() {
        let stmt = insert(Dialect::Sqlite, "t", &Row::new(), &HashMap::new());
        assert_eq!(stmt.sql, "INSERT INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn test_update_postgres_casts_keys() {
        let mut types = HashMap::new();
        types.insert("id".to_string(), "integer".to_string());
        types.insert("score".to_string(), "numeric(5,2)".to_string());
        let stmt = update(
            Dialect::Postgres,
            "public.scores",
            &row(json!({"id": 7})),
            &row(json!({"score": 9.5})),
            &types,
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"scores\" SET \"score\" = CAST($1 AS numeric(5,2)) WHERE \"id\" = CAST($2 AS integer)"
        );
        assert_eq!(stmt.params, vec![json!("9.5"), json!("7")]);
    }

    #[test]
    fn test_delete_clickhouse_uses_alter() {
        let stmt = delete(
            Dialect::ClickHouse,
            "events",
            &row(json!({"id": 3, "kind": "click"})),
            &HashMap::new(),
        );
        assert_eq!(
            stmt.sql,
            "ALTER TABLE `events` DELETE WHERE `id` = 3 AND `kind` = 'click'"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_null_key_uses_is_null() {
        let stmt = delete(
            Dialect::Sqlite,
            "t",
            &row(json!({"a": null})),
            &HashMap::new(),
        );
        assert_eq!(stmt.sql, "DELETE FROM \"t\" WHERE \"a\" IS NULL");
    }
}
