//! SQLite schema introspection.
//!
//! # SQLite System Tables
//! - `sqlite_master`: schema definitions for every object
//! - `pragma_table_info()`: columns of a table
//! - `pragma_index_list()` / `pragma_index_info()`: indexes and their columns
//! - `pragma_foreign_key_list()`: foreign keys, one row per column pair

use crate::error::{DbDeskError, Result};
use crate::models::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo, TriggerInfo};
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TYPE_PARAMS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z ]+?)\s*\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)").ok());

static TRIGGER_TIMING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(BEFORE|AFTER|INSTEAD\s+OF)\s+(INSERT|UPDATE|DELETE)\b").ok()
});

/// Splits `VARCHAR(255)` / `DECIMAL(10,2)` into length or precision/scale.
pub(crate) fn type_params(declared: &str) -> (Option<u32>, Option<u32>, Option<u32>) {
    let Some(caps) = TYPE_PARAMS.as_ref().and_then(|re| re.captures(declared)) else {
        return (None, None, None);
    };
    let base = caps.get(1).map_or("", |m| m.as_str()).to_ascii_uppercase();
    let first = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let second = caps.get(3).and_then(|m| m.as_str().parse().ok());
    if base.contains("CHAR") || base.contains("TEXT") || base.contains("CLOB") {
        (first, None, None)
    } else {
        (None, first, second)
    }
}

/// Databases attached to the connection.
pub(crate) async fn get_databases(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT name FROM pragma_database_list ORDER BY seq")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect())
}

/// Tables and views, excluding SQLite internals.
pub(crate) async fn get_tables(pool: &SqlitePool) -> Result<Vec<TableInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT name, type
        FROM sqlite_master
        WHERE type IN ('table', 'view')
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("name")?;
        let kind: String = row.try_get("type")?;
        if kind == "view" {
            tables.push(TableInfo::view(name));
            continue;
        }
        let count_query = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
        let row_count: Option<i64> = sqlx::query_scalar(&count_query).fetch_one(pool).await.ok();
        let mut table = TableInfo::table(name);
        table.row_count = row_count.and_then(|c| u64::try_from(c).ok());
        tables.push(table);
    }
    Ok(tables)
}

async fn table_sql(pool: &SqlitePool, kind: &str, name: &str) -> Result<Option<String>> {
    let sql: Option<Option<String>> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = ?1 AND name = ?2")
            .bind(kind)
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(sql.flatten())
}

/// Columns with key, uniqueness and auto-increment flags.
pub(crate) async fn get_columns(pool: &SqlitePool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(DbDeskError::query(format!("no such table: {}", table)));
    }

    let create_sql = table_sql(pool, "table", table)
        .await?
        .unwrap_or_default()
        .to_ascii_uppercase();
    let has_autoincrement = create_sql.contains("AUTOINCREMENT");

    let unique_columns: Vec<String> = get_indexes(pool, table)
        .await?
        .into_iter()
        .filter(|i| i.unique && !i.primary && i.columns.len() == 1)
        .filter(|i| i.name.starts_with("sqlite_autoindex_"))
        .flat_map(|i| i.columns)
        .collect();

    let pk_count = rows
        .iter()
        .filter(|r| r.try_get::<i64, _>("pk").unwrap_or(0) > 0)
        .count();

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("name")?;
        let data_type: String = row.try_get("type").unwrap_or_default();
        let not_null: i64 = row.try_get("notnull").unwrap_or(0);
        let pk: i64 = row.try_get("pk").unwrap_or(0);
        let default_value: Option<String> = row.try_get("dflt_value").unwrap_or(None);
        let (length, precision, scale) = type_params(&data_type);
        let primary_key = pk > 0;
        let integer_pk = primary_key && pk_count == 1 && data_type.eq_ignore_ascii_case("INTEGER");

        columns.push(ColumnInfo {
            unique: unique_columns.contains(&name),
            name,
            data_type,
            nullable: not_null == 0 && !primary_key,
            primary_key,
            auto_increment: integer_pk && has_autoincrement,
            length,
            precision,
            scale,
            default_value,
            comment: None,
        });
    }
    Ok(columns)
}

/// Primary key columns in key order.
pub(crate) async fn get_primary_key_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT name, pk FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect())
}

/// Indexes including the automatic ones backing constraints.
pub(crate) async fn get_indexes(pool: &SqlitePool, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(r#"SELECT name, "unique", origin FROM pragma_index_list(?1)"#)
        .bind(table)
        .fetch_all(pool)
        .await?;

    let mut indexes = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("name")?;
        let unique: i64 = row.try_get("unique").unwrap_or(0);
        let origin: String = row.try_get("origin").unwrap_or_default();
        let columns: Vec<String> = sqlx::query_scalar::<_, Option<String>>(
            "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
        )
        .bind(&name)
        .fetch_all(pool)
        .await?
        .into_iter()
        .flatten()
        .collect();
        indexes.push(IndexInfo {
            name,
            columns,
            unique: unique != 0,
            primary: origin == "pk",
            index_type: None,
        });
    }
    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}

/// Original CREATE INDEX text of the table's explicit indexes, by name.
///
/// Automatic indexes backing UNIQUE and PRIMARY KEY constraints have no text.
pub(crate) async fn index_sql(pool: &SqlitePool, table: &str) -> Result<BTreeMap<String, String>> {
    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut indexes = BTreeMap::new();
    for row in &rows {
        indexes.insert(row.try_get("name")?, row.try_get("sql")?);
    }
    Ok(indexes)
}

/// Stable display name for an unnamed SQLite foreign key.
pub(crate) fn foreign_key_name(table: &str, columns: &[String], referenced_table: &str) -> String {
    format!("fk_{}_{}_{}", table, columns.join("_"), referenced_table)
}

/// Foreign keys grouped by constraint.
pub(crate) async fn get_foreign_keys(pool: &SqlitePool, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    let rows = sqlx::query(
        r#"SELECT id, seq, "table", "from", "to", on_update, on_delete
           FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<i64, ForeignKeyInfo> = BTreeMap::new();
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let entry = grouped.entry(id).or_insert_with(|| ForeignKeyInfo {
            referenced_table: row.try_get("table").unwrap_or_default(),
            on_update: row.try_get::<Option<String>, _>("on_update").unwrap_or(None),
            on_delete: row.try_get::<Option<String>, _>("on_delete").unwrap_or(None),
            ..Default::default()
        });
        entry.columns.push(row.try_get("from").unwrap_or_default());
        // "to" is NULL when the reference targets the parent's primary key
        if let Ok(Some(to)) = row.try_get::<Option<String>, _>("to") {
            entry.referenced_columns.push(to);
        }
    }

    let mut foreign_keys: Vec<ForeignKeyInfo> = grouped.into_values().collect();
    for fk in &mut foreign_keys {
        if fk.referenced_columns.is_empty() {
            fk.referenced_columns = get_primary_key_columns(pool, &fk.referenced_table).await?;
        }
        fk.name = foreign_key_name(table, &fk.columns, &fk.referenced_table);
    }
    Ok(foreign_keys)
}

/// CREATE TABLE text followed by the table's explicit indexes and triggers.
pub(crate) async fn get_table_ddl(pool: &SqlitePool, table: &str) -> Result<String> {
    let create = table_sql(pool, "table", table)
        .await?
        .ok_or_else(|| DbDeskError::query(format!("no such table: {}", table)))?;
    let extras: Vec<Option<String>> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master WHERE type IN ('index', 'trigger') AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY type, name",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut ddl = format!("{};", create);
    for sql in extras.into_iter().flatten() {
        ddl.push_str("\n\n");
        ddl.push_str(&sql);
        ddl.push(';');
    }
    Ok(ddl)
}

/// CREATE VIEW text.
pub(crate) async fn get_view_ddl(pool: &SqlitePool, view: &str) -> Result<String> {
    table_sql(pool, "view", view)
        .await?
        .map(|sql| format!("{};", sql))
        .ok_or_else(|| DbDeskError::query(format!("no such view: {}", view)))
}

/// Parses `BEFORE|AFTER|INSTEAD OF` and the event from trigger SQL.
pub(crate) fn trigger_timing(sql: &str) -> (String, String) {
    TRIGGER_TIMING
        .as_ref()
        .and_then(|re| re.captures(sql))
        .map_or_else(
            || ("BEFORE".to_string(), String::new()),
            |caps| {
                let timing = caps
                    .get(1)
                    .map_or("", |m| m.as_str())
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_ascii_uppercase();
                let event = caps.get(2).map_or("", |m| m.as_str()).to_ascii_uppercase();
                (timing, event)
            },
        )
}

/// Triggers, optionally limited to one table.
pub(crate) async fn get_triggers(pool: &SqlitePool, table: Option<&str>) -> Result<Vec<TriggerInfo>> {
    let rows = sqlx::query(
        "SELECT name, tbl_name, sql FROM sqlite_master WHERE type = 'trigger' AND (?1 IS NULL OR tbl_name = ?1) ORDER BY name",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut triggers = Vec::with_capacity(rows.len());
    for row in &rows {
        let sql: Option<String> = row.try_get("sql").unwrap_or(None);
        let (timing, event) = trigger_timing(sql.as_deref().unwrap_or_default());
        triggers.push(TriggerInfo {
            name: row.try_get("name")?,
            table: row.try_get("tbl_name")?,
            timing,
            event,
            definition: sql,
        });
    }
    Ok(triggers)
}

/// SQL of every trigger attached to a table.
pub(crate) async fn trigger_sql(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let sql: Vec<Option<String>> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    Ok(sql.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_params() {
        assert_eq!(type_params("VARCHAR(255)"), (Some(255), None, None));
        assert_eq!(type_params("DECIMAL(10, 2)"), (None, Some(10), Some(2)));
        assert_eq!(type_params("NUMERIC(8)"), (None, Some(8), None));
        assert_eq!(type_params("INTEGER"), (None, None, None));
    }

    #[test]
    fn test_trigger_timing() {
        assert_eq!(
            trigger_timing("CREATE TRIGGER t AFTER insert ON x BEGIN SELECT 1; END"),
            ("AFTER".to_string(), "INSERT".to_string())
        );
        assert_eq!(
            trigger_timing("CREATE TRIGGER t INSTEAD  OF UPDATE ON v BEGIN SELECT 1; END"),
            ("INSTEAD OF".to_string(), "UPDATE".to_string())
        );
    }

    #[test]
    fn test_foreign_key_name() {
        assert_eq!(
            foreign_key_name("orders", &["user_id".to_string()], "users"),
            "fk_orders_user_id_users"
        );
    }
}
