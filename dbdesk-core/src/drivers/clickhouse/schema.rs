//! ClickHouse introspection through `system.*` tables.

use super::client::{HttpClient, text, unsigned};
use crate::error::{DbDeskError, Result};
use crate::models::{ColumnInfo, IndexInfo, PartitionInfo, TableInfo, UserInfo};
use crate::sql::Dialect;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const DIALECT: Dialect = Dialect::ClickHouse;

static DECIMAL_PARAMS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Decimal\((\d+),\s*(\d+)\)").ok());
static FIXED_STRING_LENGTH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"FixedString\((\d+)\)").ok());

fn literal(value: &str) -> String {
    DIALECT.string_literal(value)
}

/// Length, precision and scale encoded in a ClickHouse type name.
pub(crate) fn type_params(data_type: &str) -> (Option<u32>, Option<u32>, Option<u32>) {
    let length = FIXED_STRING_LENGTH
        .as_ref()
        .and_then(|re| re.captures(data_type))
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    let (precision, scale) = DECIMAL_PARAMS
        .as_ref()
        .and_then(|re| re.captures(data_type))
        .map_or((None, None), |c| {
            (
                c.get(1).and_then(|m| m.as_str().parse().ok()),
                c.get(2).and_then(|m| m.as_str().parse().ok()),
            )
        });
    (length, precision, scale)
}

/// Splits a key expression such as `(a, b)` or `a, toDate(b)` into parts.
///
/// Commas inside function calls do not split.
pub(crate) fn key_columns(expression: &str) -> Vec<String> {
    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != "tuple()")
        .collect()
}

pub(crate) async fn get_databases(client: &HttpClient) -> Result<Vec<String>> {
    let rows = client
        .rows("SELECT name FROM system.databases WHERE name NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema') ORDER BY name")
        .await?;
    Ok(rows.iter().filter_map(|r| text(r, "name")).collect())
}

pub(crate) async fn get_tables(client: &HttpClient) -> Result<Vec<TableInfo>> {
    let rows = client
        .rows(
            "SELECT name, engine, total_rows, total_bytes, comment FROM system.tables WHERE database = currentDatabase() AND NOT is_temporary ORDER BY name",
        )
        .await?;
    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(name) = text(row, "name") else {
            continue;
        };
        let engine = text(row, "engine").unwrap_or_default();
        if engine.ends_with("View") {
            tables.push(TableInfo::view(name));
            continue;
        }
        let mut table = TableInfo::table(name);
        table.row_count = unsigned(row, "total_rows");
        table.size_bytes = unsigned(row, "total_bytes");
        table.comment = text(row, "comment").filter(|c| !c.is_empty());
        tables.push(table);
    }
    Ok(tables)
}

pub(crate) async fn get_columns(client: &HttpClient, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = client
        .rows(&format!(
            "SELECT name, type, default_kind, default_expression, comment, is_in_primary_key FROM system.columns WHERE database = currentDatabase() AND table = {} ORDER BY position",
            literal(table)
        ))
        .await?;
    if rows.is_empty() {
        return Err(DbDeskError::query(format!("Table {} doesn't exist", table)));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let data_type = text(row, "type").unwrap_or_default();
        let (length, precision, scale) = type_params(&data_type);
        let default_value = match text(row, "default_kind").as_deref() {
            Some("DEFAULT") => text(row, "default_expression"),
            _ => None,
        };
        columns.push(ColumnInfo {
            name: text(row, "name").unwrap_or_default(),
            nullable: data_type.starts_with("Nullable("),
            primary_key: unsigned(row, "is_in_primary_key").unwrap_or(0) == 1,
            data_type,
            auto_increment: false,
            unique: false,
            length,
            precision,
            scale,
            default_value,
            comment: text(row, "comment").filter(|c| !c.is_empty()),
        });
    }
    Ok(columns)
}

/// Primary key parts in key order, read from the table's key expression.
pub(crate) async fn get_primary_key_columns(client: &HttpClient, table: &str) -> Result<Vec<String>> {
    let rows = client
        .rows(&format!(
            "SELECT primary_key FROM system.tables WHERE database = currentDatabase() AND name = {}",
            literal(table)
        ))
        .await?;
    Ok(rows
        .first()
        .and_then(|r| text(r, "primary_key"))
        .map(|expr| key_columns(&expr))
        .unwrap_or_default())
}

/// Data-skipping indices plus a synthetic `PRIMARY` entry for the key.
pub(crate) async fn get_indexes(client: &HttpClient, table: &str) -> Result<Vec<IndexInfo>> {
    let mut indexes = Vec::new();
    let primary_key = get_primary_key_columns(client, table).await?;
    if !primary_key.is_empty() {
        indexes.push(IndexInfo {
            name: "PRIMARY".to_string(),
            columns: primary_key,
            unique: false,
            primary: true,
            index_type: Some("primary".to_string()),
        });
    }

    let rows = client
        .rows(&format!(
            "SELECT name, expr, type FROM system.data_skipping_indices WHERE database = currentDatabase() AND table = {} ORDER BY name",
            literal(table)
        ))
        .await?;
    for row in &rows {
        indexes.push(IndexInfo {
            name: text(row, "name").unwrap_or_default(),
            columns: text(row, "expr").map(|e| key_columns(&e)).unwrap_or_default(),
            unique: false,
            primary: false,
            index_type: text(row, "type"),
        });
    }
    Ok(indexes)
}

/// `SHOW CREATE TABLE`; also answers for views.
pub(crate) async fn show_create(client: &HttpClient, name: &str) -> Result<String> {
    let rows = client
        .rows(&format!("SHOW CREATE TABLE {}", DIALECT.quote_ident(name)))
        .await?;
    rows.first()
        .and_then(|r| text(r, "statement"))
        .ok_or_else(|| DbDeskError::query(format!("No definition returned for {}", name)))
}

pub(crate) async fn get_users(client: &HttpClient) -> Result<Vec<UserInfo>> {
    let users = client.rows("SELECT name FROM system.users ORDER BY name").await?;
    let grants = client
        .rows("SELECT user_name, granted_role_name FROM system.role_grants WHERE user_name IS NOT NULL")
        .await?;

    let mut roles: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for grant in &grants {
        if let (Some(user), Some(role)) = (text(grant, "user_name"), text(grant, "granted_role_name")) {
            roles.entry(user).or_default().push(role);
        }
    }
    Ok(users
        .iter()
        .filter_map(|r| text(r, "name"))
        .map(|name| UserInfo {
            roles: roles.remove(&name).unwrap_or_default(),
            name,
            host: None,
        })
        .collect())
}

/// Active parts grouped by partition.
pub(crate) async fn get_partitions(client: &HttpClient, table: &str) -> Result<Vec<PartitionInfo>> {
    let key_rows = client
        .rows(&format!(
            "SELECT partition_key FROM system.tables WHERE database = currentDatabase() AND name = {}",
            literal(table)
        ))
        .await?;
    let method = key_rows
        .first()
        .and_then(|r| text(r, "partition_key"))
        .filter(|k| !k.is_empty());

    let rows = client
        .rows(&format!(
            "SELECT partition, sum(rows) AS rows, count() AS parts FROM system.parts WHERE database = currentDatabase() AND table = {} AND active GROUP BY partition ORDER BY partition",
            literal(table)
        ))
        .await?;
    Ok(rows
        .iter()
        .map(|row| PartitionInfo {
            name: text(row, "partition").unwrap_or_default(),
            method: method.clone(),
            description: unsigned(row, "parts").map(|n| format!("{} active parts", n)),
            row_count: unsigned(row, "rows"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_params() {
        assert_eq!(type_params("Decimal(18, 4)"), (None, Some(18), Some(4)));
        assert_eq!(type_params("Nullable(FixedString(16))"), (Some(16), None, None));
        assert_eq!(type_params("UInt64"), (None, None, None));
    }

    #[test]
    fn test_key_columns() {
        assert_eq!(key_columns("id"), vec!["id"]);
        assert_eq!(key_columns("(tenant, id)"), vec!["tenant", "id"]);
        assert_eq!(
            key_columns("tenant, toDate(ts), cityHash64(a, b)"),
            vec!["tenant", "toDate(ts)", "cityHash64(a, b)"]
        );
        assert!(key_columns("tuple()").is_empty());
        assert!(key_columns("").is_empty());
    }
}
