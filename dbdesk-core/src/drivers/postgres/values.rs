//! PostgreSQL row decoding, parameter binding and the OID type table.
//!
//! Parameterless statements run over the simple query protocol and return
//! text-format values; prepared statements return binary values. Every
//! typed decode below accepts both formats.

use crate::models::{QueryColumn, Row};
use base64::Engine;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney};
use sqlx::postgres::{PgArguments, PgColumn, PgRow, PgTypeInfo};
use sqlx::types::{BigDecimal, Json};
use sqlx::{Column, Postgres, Row as _, TypeInfo};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Display name for a type OID.
pub(crate) fn type_name_for_oid(oid: u32) -> Option<&'static str> {
    let name = match oid {
        16 => "boolean",
        17 => "bytea",
        18 => "char",
        19 => "name",
        20 => "bigint",
        21 => "smallint",
        23 => "integer",
        24 => "regproc",
        25 => "text",
        26 => "oid",
        114 => "json",
        142 => "xml",
        600 => "point",
        650 => "cidr",
        700 => "real",
        701 => "double precision",
        774 => "macaddr8",
        790 => "money",
        829 => "macaddr",
        869 => "inet",
        1000 => "boolean[]",
        1001 => "bytea[]",
        1005 => "smallint[]",
        1007 => "integer[]",
        1009 => "text[]",
        1015 => "character varying[]",
        1016 => "bigint[]",
        1021 => "real[]",
        1022 => "double precision[]",
        1042 => "character",
        1043 => "character varying",
        1082 => "date",
        1083 => "time",
        1114 => "timestamp",
        1115 => "timestamp[]",
        1182 => "date[]",
        1184 => "timestamptz",
        1185 => "timestamptz[]",
        1186 => "interval",
        1231 => "numeric[]",
        1266 => "timetz",
        1560 => "bit",
        1562 => "varbit",
        1700 => "numeric",
        2249 => "record",
        2278 => "void",
        2950 => "uuid",
        2951 => "uuid[]",
        3614 => "tsvector",
        3802 => "jsonb",
        3807 => "jsonb[]",
        3904 => "int4range",
        3906 => "numrange",
        3908 => "tsrange",
        3910 => "tstzrange",
        3912 => "daterange",
        3926 => "int8range",
        _ => return None,
    };
    Some(name)
}

fn display_type(info: &PgTypeInfo) -> String {
    info.oid()
        .and_then(|Oid(oid)| type_name_for_oid(oid))
        .map_or_else(|| info.name().to_ascii_lowercase(), str::to_string)
}

/// Result columns with display type names.
pub(crate) fn columns_of(columns: &[PgColumn]) -> Vec<QueryColumn> {
    columns
        .iter()
        .map(|c| QueryColumn::new(c.name(), display_type(c.type_info())))
        .collect()
}

/// Binds a caller-supplied JSON value by its JSON type.
pub(crate) fn bind_json<'q>(query: PgQuery<'q>, value: &JsonValue) -> PgQuery<'q> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        JsonValue::String(s) => query.bind(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => query.bind(Json(value.clone())),
    }
}

/// Binds a value produced by the statement builders.
///
/// Those bind everything as text and cast in SQL, so strings stay strings
/// and anything else is rendered first.
pub(crate) fn bind_text<'q>(query: PgQuery<'q>, value: &JsonValue) -> PgQuery<'q> {
    query.bind(crate::sql::value_as_text(value))
}

/// Converts a row to a name→value map.
pub(crate) fn row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = typed_value(row, index, column.type_info().name())
            .unwrap_or_else(|| generic_value(row, index));
        map.insert(column.name().to_string(), value);
    }
    map
}

fn number<T: Into<serde_json::Number>>(value: Option<T>) -> JsonValue {
    value.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()))
}

fn float(value: Option<f64>) -> JsonValue {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(JsonValue::Null, JsonValue::Number)
}

fn text(value: Option<String>) -> JsonValue {
    value.map_or(JsonValue::Null, JsonValue::String)
}

fn bytes(value: Option<Vec<u8>>) -> JsonValue {
    value.map_or(JsonValue::Null, |b| {
        JsonValue::String(format!(
            "base64:{}",
            base64::engine::general_purpose::STANDARD.encode(b)
        ))
    })
}

fn list<T>(value: Option<Vec<T>>, convert: impl Fn(T) -> JsonValue) -> JsonValue {
    value.map_or(JsonValue::Null, |items| {
        JsonValue::Array(items.into_iter().map(convert).collect())
    })
}

/// Renders an interval the way `psql` does for the common cases.
pub(crate) fn interval_text(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        parts.push(format!("{} year{}", years, if years.abs() == 1 { "" } else { "s" }));
    }
    if months != 0 {
        parts.push(format!("{} mon{}", months, if months.abs() == 1 { "" } else { "s" }));
    }
    if interval.days != 0 {
        parts.push(format!(
            "{} day{}",
            interval.days,
            if interval.days.abs() == 1 { "" } else { "s" }
        ));
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let seconds = micros / 1_000_000;
        let fraction = micros % 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        );
        if fraction != 0 {
            clock.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Decodes by sqlx type name; `None` when the typed decode does not apply.
fn typed_value(row: &PgRow, index: usize, type_name: &str) -> Option<JsonValue> {
    match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .map(|v| v.map_or(JsonValue::Null, JsonValue::Bool)),
        "INT2" => row.try_get::<Option<i16>, _>(index).ok().map(number),
        "INT4" => row.try_get::<Option<i32>, _>(index).ok().map(number),
        "INT8" => row.try_get::<Option<i64>, _>(index).ok().map(number),
        "OID" => row
            .try_get::<Option<Oid>, _>(index)
            .ok()
            .map(|v| number(v.map(|Oid(o)| o))),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .map(|v| float(v.map(f64::from))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).ok().map(float),
        // Exact decimals are kept as strings
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.to_string()))),
        "MONEY" => row
            .try_get::<Option<PgMoney>, _>(index)
            .ok()
            .map(|v| text(v.map(|m| m.to_bigdecimal(2).to_string()))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            row.try_get::<Option<String>, _>(index).ok().map(text)
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .ok()
            .map(|v| text(v.map(|u| u.to_string()))),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(index)
            .ok()
            .map(|v| v.unwrap_or(JsonValue::Null)),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.format("%Y-%m-%d").to_string()))),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .map(|v| text(v.map(|t| t.format("%H:%M:%S%.f").to_string()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.format("%Y-%m-%d %H:%M:%S%.f").to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .map(|v| text(v.map(|d| d.to_rfc3339()))),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(index)
            .ok()
            .map(|v| text(v.as_ref().map(interval_text))),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index).ok().map(bytes),
        "BOOL[]" => row
            .try_get::<Option<Vec<bool>>, _>(index)
            .ok()
            .map(|v| list(v, JsonValue::Bool)),
        "INT2[]" => row
            .try_get::<Option<Vec<i16>>, _>(index)
            .ok()
            .map(|v| list(v, JsonValue::from)),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(index)
            .ok()
            .map(|v| list(v, JsonValue::from)),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)
            .ok()
            .map(|v| list(v, JsonValue::from)),
        "FLOAT8[]" => row
            .try_get::<Option<Vec<f64>>, _>(index)
            .ok()
            .map(|v| list(v, |f| float(Some(f)))),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => row
            .try_get::<Option<Vec<String>>, _>(index)
            .ok()
            .map(|v| list(v, JsonValue::String)),
        "UUID[]" => row
            .try_get::<Option<Vec<uuid::Uuid>>, _>(index)
            .ok()
            .map(|v| list(v, |u| JsonValue::String(u.to_string()))),
        _ => None,
    }
}

/// Fallback for types without a typed decode (enums, ranges, network types).
///
/// Text-format values decode as their text; binary values that are not
/// UTF-8 are base64 encoded.
fn generic_value(row: &PgRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(index) {
        return text(v);
    }
    row.try_get_unchecked::<Option<Vec<u8>>, _>(index)
        .map_or(JsonValue::Null, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oid_table() {
        assert_eq!(type_name_for_oid(23), Some("integer"));
        assert_eq!(type_name_for_oid(1043), Some("character varying"));
        assert_eq!(type_name_for_oid(3802), Some("jsonb"));
        assert_eq!(type_name_for_oid(1007), Some("integer[]"));
        assert_eq!(type_name_for_oid(99_999), None);
    }

    #[test]
    fn test_interval_text() {
        let interval = PgInterval {
            months: 14,
            days: 3,
            microseconds: 3_723_500_000,
        };
        assert_eq!(interval_text(&interval), "1 year 2 mons 3 days 01:02:03.5");
        let zero = PgInterval {
            months: 0,
            days: 0,
            microseconds: 0,
        };
        assert_eq!(interval_text(&zero), "00:00:00");
        let negative = PgInterval {
            months: 0,
            days: -1,
            microseconds: -90_000_000,
        };
        assert_eq!(interval_text(&negative), "-1 day -00:01:30");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(bytes(Some(vec![0xde, 0xad])), json!("base64:3q0="));
        assert_eq!(float(Some(f64::NAN)), JsonValue::Null);
        assert_eq!(list(Some(vec![1_i32, 2]), JsonValue::from), json!([1, 2]));
        assert_eq!(list::<i32>(None, JsonValue::from), JsonValue::Null);
    }
}
