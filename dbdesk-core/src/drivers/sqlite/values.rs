//! SQLite row decoding and parameter binding.

use crate::models::{QueryColumn, Row};
use base64::Engine;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds a JSON value using the matching SQLite storage class.
pub(crate) fn bind_json<'q>(query: SqliteQuery<'q>, value: &JsonValue) -> SqliteQuery<'q> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        JsonValue::String(s) => query.bind(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
    }
}

/// Result columns with their declared types.
pub(crate) fn columns_of<C: Column>(columns: &[C]) -> Vec<QueryColumn> {
    columns
        .iter()
        .map(|c| QueryColumn::new(c.name(), c.type_info().name()))
        .collect()
}

/// Converts a row to a name→value map.
pub(crate) fn row_to_json(row: &SqliteRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_column_value(row, index));
    }
    map
}

/// Extracts a column value as JSON.
///
/// SQLite is dynamically typed, so the storage class of each value decides
/// the decoding; BLOBs become `base64:` strings.
fn extract_column_value(row: &SqliteRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(JsonValue::Null, |bytes| {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            JsonValue::String(format!("base64:{}", encoded))
        });
    }

    JsonValue::Null
}
