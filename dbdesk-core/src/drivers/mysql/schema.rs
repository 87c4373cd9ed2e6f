//! MySQL schema introspection through `INFORMATION_SCHEMA`.
//!
//! Text columns are cast to CHAR because MySQL 8.0+ reports several
//! information schema columns as VARBINARY.

use super::values::text_at;
use crate::error::{DbDeskError, Result};
use crate::models::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
use sqlx::{MySqlPool, Row};
use std::collections::BTreeMap;

fn as_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Schemas visible to the login.
pub(crate) async fn get_databases(pool: &MySqlPool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT CAST(SCHEMA_NAME AS CHAR) FROM INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Tables and views of the selected database.
pub(crate) async fn get_tables(pool: &MySqlPool) -> Result<Vec<TableInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(TABLE_NAME AS CHAR) AS TABLE_NAME,
            CAST(TABLE_TYPE AS CHAR) AS TABLE_TYPE,
            CAST(TABLE_ROWS AS SIGNED) AS TABLE_ROWS,
            CAST(DATA_LENGTH + INDEX_LENGTH AS SIGNED) AS SIZE_BYTES,
            CAST(TABLE_COMMENT AS CHAR) AS TABLE_COMMENT
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("TABLE_NAME")?;
        let kind: String = row.try_get("TABLE_TYPE").unwrap_or_default();
        if kind == "VIEW" {
            tables.push(TableInfo::view(name));
            continue;
        }
        let mut table = TableInfo::table(name);
        table.row_count = row
            .try_get::<Option<i64>, _>("TABLE_ROWS")
            .ok()
            .flatten()
            .and_then(|n| u64::try_from(n).ok());
        table.size_bytes = row
            .try_get::<Option<i64>, _>("SIZE_BYTES")
            .ok()
            .flatten()
            .and_then(|n| u64::try_from(n).ok());
        table.comment = non_empty(row.try_get("TABLE_COMMENT").ok());
        tables.push(table);
    }
    Ok(tables)
}

/// Columns in ordinal order.
pub(crate) async fn get_columns(pool: &MySqlPool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
            CAST(COLUMN_TYPE AS CHAR) AS COLUMN_TYPE,
            CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS CHAR_LENGTH,
            CAST(NUMERIC_PRECISION AS SIGNED) AS NUM_PRECISION,
            CAST(NUMERIC_SCALE AS SIGNED) AS NUM_SCALE,
            CAST(IS_NULLABLE AS CHAR) AS IS_NULLABLE,
            CAST(COLUMN_DEFAULT AS CHAR) AS COLUMN_DEFAULT,
            CAST(COLUMN_COMMENT AS CHAR) AS COLUMN_COMMENT,
            CAST(EXTRA AS CHAR) AS EXTRA,
            CAST(COLUMN_KEY AS CHAR) AS COLUMN_KEY
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(DbDeskError::query(format!("Table '{}' doesn't exist", table)));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let key: String = row.try_get("COLUMN_KEY").unwrap_or_default();
        let extra: String = row.try_get("EXTRA").unwrap_or_default();
        let nullable: String = row.try_get("IS_NULLABLE").unwrap_or_default();
        columns.push(ColumnInfo {
            name: row.try_get("COLUMN_NAME")?,
            data_type: row.try_get("COLUMN_TYPE").unwrap_or_default(),
            nullable: nullable.eq_ignore_ascii_case("YES"),
            primary_key: key == "PRI",
            auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
            unique: key == "UNI",
            length: as_u32(row.try_get("CHAR_LENGTH").ok().flatten()),
            precision: as_u32(row.try_get("NUM_PRECISION").ok().flatten()),
            scale: as_u32(row.try_get("NUM_SCALE").ok().flatten()),
            default_value: row.try_get("COLUMN_DEFAULT").ok().flatten(),
            comment: non_empty(row.try_get("COLUMN_COMMENT").ok()),
        });
    }
    Ok(columns)
}

/// Primary key columns in key order.
pub(crate) async fn get_primary_key_columns(pool: &MySqlPool, table: &str) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT CAST(COLUMN_NAME AS CHAR)
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Indexes with their columns in key order.
pub(crate) async fn get_indexes(pool: &MySqlPool, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(INDEX_NAME AS CHAR) AS INDEX_NAME,
            CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
            CAST(NON_UNIQUE AS SIGNED) AS NON_UNIQUE,
            CAST(INDEX_TYPE AS CHAR) AS INDEX_TYPE
        FROM INFORMATION_SCHEMA.STATISTICS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, IndexInfo> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("INDEX_NAME")?;
        let non_unique: i64 = row.try_get("NON_UNIQUE").unwrap_or(1);
        let entry = grouped.entry(name.clone()).or_insert_with(|| IndexInfo {
            primary: name == "PRIMARY",
            unique: non_unique == 0,
            index_type: row.try_get("INDEX_TYPE").ok(),
            name,
            columns: Vec::new(),
        });
        // Functional key parts have no column name
        if let Ok(Some(column)) = row.try_get::<Option<String>, _>("COLUMN_NAME") {
            entry.columns.push(column);
        }
    }
    Ok(grouped.into_values().collect())
}

/// Foreign keys with their referential actions.
pub(crate) async fn get_foreign_keys(pool: &MySqlPool, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(kcu.CONSTRAINT_NAME AS CHAR) AS CONSTRAINT_NAME,
            CAST(kcu.COLUMN_NAME AS CHAR) AS COLUMN_NAME,
            CAST(kcu.REFERENCED_TABLE_NAME AS CHAR) AS REFERENCED_TABLE_NAME,
            CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR) AS REFERENCED_COLUMN_NAME,
            CAST(rc.UPDATE_RULE AS CHAR) AS UPDATE_RULE,
            CAST(rc.DELETE_RULE AS CHAR) AS DELETE_RULE
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
        JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
            ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
            AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
        WHERE kcu.TABLE_SCHEMA = DATABASE()
        AND kcu.TABLE_NAME = ?
        AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, ForeignKeyInfo> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("CONSTRAINT_NAME")?;
        let entry = grouped.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
            name,
            referenced_table: row.try_get("REFERENCED_TABLE_NAME").unwrap_or_default(),
            on_update: row.try_get("UPDATE_RULE").ok(),
            on_delete: row.try_get("DELETE_RULE").ok(),
            ..Default::default()
        });
        entry
            .columns
            .push(row.try_get("COLUMN_NAME").unwrap_or_default());
        entry
            .referenced_columns
            .push(row.try_get("REFERENCED_COLUMN_NAME").unwrap_or_default());
    }
    Ok(grouped.into_values().collect())
}

/// `SHOW CREATE TABLE` output.
pub(crate) async fn get_table_ddl(pool: &MySqlPool, table: &str) -> Result<String> {
    let row = sqlx::query(&format!("SHOW CREATE TABLE {}", crate::sql::Dialect::MySql.quote_ident(table)))
        .fetch_one(pool)
        .await?;
    text_at(&row, 1)
        .map(|ddl| format!("{};", ddl))
        .ok_or_else(|| DbDeskError::query(format!("No DDL returned for {}", table)))
}

/// `SHOW CREATE VIEW` output.
pub(crate) async fn get_view_ddl(pool: &MySqlPool, view: &str) -> Result<String> {
    let row = sqlx::query(&format!("SHOW CREATE VIEW {}", crate::sql::Dialect::MySql.quote_ident(view)))
        .fetch_one(pool)
        .await?;
    text_at(&row, 1)
        .map(|ddl| format!("{};", ddl))
        .ok_or_else(|| DbDeskError::query(format!("No definition returned for {}", view)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers() {
        assert_eq!(as_u32(Some(255)), Some(255));
        assert_eq!(as_u32(Some(-1)), None);
        assert_eq!(as_u32(Some(i64::MAX)), None);
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }
}
