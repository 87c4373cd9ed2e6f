//! MySQL row decoding and parameter binding.
//!
//! Values are decoded by the column's reported type name. A typed decode
//! that fails falls through to a generic string/number/bytes chain so an
//! unexpected wire type degrades to text instead of erroring.

use crate::models::{QueryColumn, Row};
use base64::Engine;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, MySql, Row as _, TypeInfo};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// Binds a JSON value as the closest MySQL parameter type.
pub(crate) fn bind_json<'q>(query: MySqlQuery<'q>, value: &JsonValue) -> MySqlQuery<'q> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64())
            }
        }
        JsonValue::String(s) => query.bind(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
    }
}

/// Result columns with their MySQL type names.
pub(crate) fn columns_of<C: Column>(columns: &[C]) -> Vec<QueryColumn> {
    columns
        .iter()
        .map(|c| QueryColumn::new(c.name(), c.type_info().name()))
        .collect()
}

/// Converts a row to a name→value map.
pub(crate) fn row_to_json(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = typed_value(row, index, type_name).unwrap_or_else(|| generic_value(row, index));
        map.insert(column.name().to_string(), value);
    }
    map
}

fn number<T: Into<serde_json::Number>>(value: Option<T>) -> JsonValue {
    value.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()))
}

fn text(value: Option<String>) -> JsonValue {
    value.map_or(JsonValue::Null, JsonValue::String)
}

fn bytes(value: Option<Vec<u8>>) -> JsonValue {
    value.map_or(JsonValue::Null, |b| match String::from_utf8(b) {
        Ok(s) => JsonValue::String(s),
        Err(e) => JsonValue::String(format!(
            "base64:{}",
            base64::engine::general_purpose::STANDARD.encode(e.into_bytes())
        )),
    })
}

/// Decodes by type name; `None` when the typed decode does not apply.
fn typed_value(row: &MySqlRow, index: usize, type_name: &str) -> Option<JsonValue> {
    match type_name {
        "NULL" => Some(JsonValue::Null),
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .map(|v| v.map_or(JsonValue::Null, JsonValue::Bool)),
        name if name.ends_with("UNSIGNED") => {
            row.try_get::<Option<u64>, _>(index).ok().map(number)
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get::<Option<i64>, _>(index).ok().map(number)
        }
        "FLOAT" | "DOUBLE" => row.try_get::<Option<f64>, _>(index).ok().map(|v| {
            v.and_then(serde_json::Number::from_f64)
                .map_or(JsonValue::Null, JsonValue::Number)
        }),
        // Exact decimals are kept as strings
        "DECIMAL" => row
            .try_get::<Option<BigDecimal>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.to_string()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.format("%Y-%m-%d").to_string()))),
        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.format("%Y-%m-%d %H:%M:%S%.f").to_string()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.to_rfc3339()))),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .map(|v| text(v.map(|t| t.format("%H:%M:%S%.f").to_string()))),
        "JSON" => row
            .try_get::<Option<JsonValue>, _>(index)
            .ok()
            .map(|v| v.unwrap_or(JsonValue::Null)),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "GEOMETRY"
        | "BIT" => row.try_get::<Option<Vec<u8>>, _>(index).ok().map(bytes),
        _ => None,
    }
}

fn generic_value(row: &MySqlRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return text(v);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return number(v);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return bytes(v);
    }
    JsonValue::Null
}

/// Reads a text column that MySQL may report as VARBINARY.
pub(crate) fn text_at(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<Option<String>, _>(index)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(index)
                .ok()
                .flatten()
                .map(|b| String::from_utf8_lossy(&b).into_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_prefer_utf8() {
        assert_eq!(bytes(Some(b"hello".to_vec())), json!("hello"));
        assert_eq!(bytes(Some(vec![0xff, 0x00])), json!("base64:/wA="));
        assert_eq!(bytes(None), JsonValue::Null);
    }

    #[test]
    fn test_number_helper() {
        assert_eq!(number(Some(7_i64)), json!(7));
        assert_eq!(number(Some(u64::MAX)), json!(u64::MAX));
        assert_eq!(number::<i64>(None), JsonValue::Null);
    }
}
