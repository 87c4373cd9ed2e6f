//! BSON to plain JSON conversion and filter value coercion.
//!
//! Result rows never carry BSON wrapper types: identifiers become hex
//! strings, dates ISO-8601 strings, and binary data a placeholder with its
//! byte count. Inbound values are read as extended JSON so `{"$oid": ...}`
//! and `{"$date": ...}` round-trip.

use crate::error::{DbDeskError, Result};
use crate::models::Row;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, DateTime, Document};
use serde_json::{Number, Value};

/// Largest integer JSON consumers hold without losing precision.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Converts a BSON value to a JSON-safe value.
pub(crate) fn to_plain(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => Value::String(s.clone()),
        Bson::JavaScriptCodeWithScope(code) => Value::String(code.code.clone()),
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) if n.unsigned_abs() <= MAX_SAFE_INTEGER => Value::from(*n),
        Bson::Int64(n) => Value::String(n.to_string()),
        Bson::Double(f) => Number::from_f64(*f).map_or_else(|| Value::String(f.to_string()), Value::Number),
        Bson::Decimal128(_) => Value::String(decimal_text(value)),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(iso_date(*dt)),
        Bson::Timestamp(ts) => Value::String(format!("Timestamp({}, {})", ts.time, ts.increment)),
        Bson::Binary(binary) => Value::String(format!("<Binary: {} bytes>", binary.bytes.len())),
        Bson::RegularExpression(re) => Value::String(format!("/{}/{}", re.pattern, re.options)),
        Bson::Array(items) => Value::Array(items.iter().map(to_plain).collect()),
        Bson::Document(doc) => Value::Object(document_to_row(doc)),
        Bson::MinKey | Bson::MaxKey | Bson::DbPointer(_) => Value::String("Unknown".to_string()),
    }
}

/// Converts a document to a result row.
pub(crate) fn document_to_row(doc: &Document) -> Row {
    doc.iter()
        .map(|(key, value)| (key.clone(), to_plain(value)))
        .collect()
}

fn iso_date(dt: DateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}

fn decimal_text(value: &Bson) -> String {
    match value.clone().into_relaxed_extjson() {
        Value::Object(map) => map
            .get("$numberDecimal")
            .and_then(Value::as_str)
            .map_or_else(|| "Unknown".to_string(), str::to_string),
        other => other.to_string(),
    }
}

/// Parses a JSON value as extended JSON.
///
/// # Errors
/// Returns a query error for malformed `$`-prefixed wrappers.
pub(crate) fn from_extended_json(value: Value) -> Result<Bson> {
    Bson::try_from(value).map_err(|e| DbDeskError::query(format!("Invalid extended JSON: {}", e)))
}

/// Parses a JSON object as a document.
///
/// # Errors
/// Returns a query error when the value is not an object or holds malformed
/// extended JSON.
pub(crate) fn document_from_json(value: Value) -> Result<Document> {
    match from_extended_json(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(DbDeskError::query(format!(
            "Expected a document, got {}",
            other.into_relaxed_extjson()
        ))),
    }
}

/// Relaxed extended JSON text of a document, for shell-style statements.
pub(crate) fn shell_json(doc: &Document) -> String {
    Bson::Document(doc.clone()).into_relaxed_extjson().to_string()
}

fn plain_to_bson(value: &Value) -> Bson {
    Bson::try_from(value.clone()).unwrap_or_else(|_| Bson::String(value.to_string()))
}

/// Whether a string has the shape of an ObjectId.
pub(crate) fn looks_like_object_id(text: &str) -> bool {
    text.len() == 24 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_number(text: &str) -> Option<Bson> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Bson::Double)
}

/// Converts a caller-supplied value to BSON for the named field.
///
/// `field_type` is the type inferred from sampled documents. Strings are
/// converted to ObjectId, number, date or boolean only when the sample says
/// the field holds that type. Fields missing from the sample (`None`) fall
/// back to shape-based guessing: 24 hex digits become an ObjectId and
/// numeric strings a number.
pub(crate) fn coerce(value: &Value, field_type: Option<&str>) -> Bson {
    let text = match value {
        Value::String(text) => text,
        Value::Array(items) => {
            return Bson::Array(items.iter().map(|v| coerce(v, field_type)).collect());
        }
        other => return plain_to_bson(other),
    };
    let keep = || Bson::String(text.clone());

    match field_type {
        Some("ObjectId") => ObjectId::parse_str(text).map_or_else(|_| keep(), Bson::ObjectId),
        Some("Int32" | "Int64" | "Double" | "Decimal128") => parse_number(text).unwrap_or_else(keep),
        Some("Date") => DateTime::parse_rfc3339_str(text).map_or_else(|_| keep(), Bson::DateTime),
        Some("Boolean") => match text.as_str() {
            "true" => Bson::Boolean(true),
            "false" => Bson::Boolean(false),
            _ => keep(),
        },
        Some(_) => keep(),
        None if looks_like_object_id(text) => {
            ObjectId::parse_str(text).map_or_else(|_| keep(), Bson::ObjectId)
        }
        None => parse_number(text).unwrap_or_else(keep),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::spec::BinarySubtype;
    use mongodb::bson::{Binary, Timestamp, doc};
    use serde_json::json;

    #[test]
    fn test_wrapper_types_become_plain_values() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        let doc = doc! {
            "_id": oid,
            "at": DateTime::from_millis(0),
            "blob": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] },
            "big": 9_007_199_254_740_993_i64,
            "small": 42_i64,
            "ts": Timestamp { time: 10, increment: 2 },
            "nested": { "tags": ["a", 1] },
            "nothing": Bson::Null,
            "min": Bson::MinKey,
        };
        let row = document_to_row(&doc);
        assert_eq!(row["_id"], json!("507f1f77bcf86cd799439011"));
        assert_eq!(row["at"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(row["blob"], json!("<Binary: 3 bytes>"));
        assert_eq!(row["big"], json!("9007199254740993"));
        assert_eq!(row["small"], json!(42));
        assert_eq!(row["ts"], json!("Timestamp(10, 2)"));
        assert_eq!(row["nested"], json!({"tags": ["a", 1]}));
        assert_eq!(row["nothing"], Value::Null);
        assert_eq!(row["min"], json!("Unknown"));
    }

    #[test]
    fn test_extended_json_input() {
        let doc = document_from_json(json!({
            "_id": {"$oid": "507f1f77bcf86cd799439011"},
            "n": {"$numberLong": "5"}
        }))
        .unwrap();
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(doc.get("n"), Some(&Bson::Int64(5)));
        assert!(document_from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_coercion_follows_sampled_type() {
        let hex = json!("507f1f77bcf86cd799439011");
        assert!(matches!(coerce(&hex, Some("ObjectId")), Bson::ObjectId(_)));
        assert!(matches!(coerce(&hex, Some("String")), Bson::String(_)));
        assert_eq!(coerce(&json!("42"), Some("Int32")), Bson::Int32(42));
        assert_eq!(coerce(&json!("42"), Some("String")), Bson::String("42".to_string()));
        assert_eq!(coerce(&json!("1.5"), Some("Double")), Bson::Double(1.5));
        assert_eq!(coerce(&json!("true"), Some("Boolean")), Bson::Boolean(true));
        assert!(matches!(
            coerce(&json!("2024-01-02T03:04:05Z"), Some("Date")),
            Bson::DateTime(_)
        ));
    }

    #[test]
    fn test_coercion_guesses_only_for_unsampled_fields() {
        assert!(matches!(
            coerce(&json!("507f1f77bcf86cd799439011"), None),
            Bson::ObjectId(_)
        ));
        assert_eq!(coerce(&json!("7"), None), Bson::Int32(7));
        assert_eq!(coerce(&json!("abc"), None), Bson::String("abc".to_string()));
        assert_eq!(coerce(&json!(7), Some("String")), Bson::Int32(7));
        assert_eq!(
            coerce(&json!(["1", "2"]), Some("Int64")),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)])
        );
    }
}
