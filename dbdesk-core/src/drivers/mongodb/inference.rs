//! Schema inference from sampled documents.
//!
//! Collections have no declared schema, so columns are derived from the
//! most recent documents:
//! - every top-level field seen in the sample becomes a column, in order of
//!   first appearance, with `_id` always first
//! - a field missing from or null in some documents is nullable and its
//!   comment records how many documents carried a value
//! - a field whose only values are null has type `Null`; one with several
//!   observed types is `Mixed`
//! - numbers are classified by value: whole numbers are `Int32` whatever
//!   their BSON width, numbers with a fractional part are `Double`

use crate::error::Result;
use crate::models::{ColumnInfo, QueryColumn};
use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::{Bson, Document, doc};
use std::collections::HashMap;

/// Documents read when inferring a collection's columns.
pub(crate) const SAMPLE_SIZE: i64 = 100;

/// Display name of a BSON value's type.
pub(crate) fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::ObjectId(_) => "ObjectId",
        Bson::DateTime(_) => "Date",
        Bson::Binary(_) => "Binary",
        Bson::Boolean(_) => "Boolean",
        Bson::Int32(_) => "Int32",
        Bson::Int64(_) => "Int64",
        Bson::Double(_) => "Double",
        Bson::Decimal128(_) => "Decimal128",
        Bson::Timestamp(_) => "Timestamp",
        Bson::String(_) | Bson::Symbol(_) => "String",
        Bson::Array(_) => "Array",
        Bson::Document(_) => "Object",
        Bson::RegularExpression(_) => "RegExp",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "Code",
        Bson::Null | Bson::Undefined => "Null",
        Bson::MinKey | Bson::MaxKey | Bson::DbPointer(_) => "Unknown",
    }
}

/// Column type of a sampled value.
pub(crate) fn inferred_type(value: &Bson) -> &'static str {
    match value {
        Bson::Int32(_) | Bson::Int64(_) => "Int32",
        Bson::Double(d) if d.is_finite() && d.fract() == 0.0 => "Int32",
        other => type_name(other),
    }
}

/// Statistics about one field.
#[derive(Debug, Clone)]
struct FieldStats {
    name: String,
    /// Distinct non-null types, in order of first appearance
    types: Vec<&'static str>,
    /// Documents holding a non-null value
    present: u32,
}

/// Accumulates field statistics over a set of documents.
#[derive(Debug, Default)]
pub(crate) struct SchemaInferrer {
    fields: Vec<FieldStats>,
    positions: HashMap<String, usize>,
    document_count: u32,
}

impl SchemaInferrer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records the top-level fields of one document.
    pub(crate) fn analyze_document(&mut self, doc: &Document) {
        self.document_count = self.document_count.saturating_add(1);
        for (key, value) in doc {
            let index = match self.positions.get(key) {
                Some(index) => *index,
                None => {
                    self.fields.push(FieldStats {
                        name: key.clone(),
                        types: Vec::new(),
                        present: 0,
                    });
                    self.positions.insert(key.clone(), self.fields.len() - 1);
                    self.fields.len() - 1
                }
            };
            let Some(stats) = self.fields.get_mut(index) else {
                continue;
            };
            if matches!(value, Bson::Null | Bson::Undefined) {
                continue;
            }
            stats.present = stats.present.saturating_add(1);
            let name = inferred_type(value);
            if !stats.types.contains(&name) {
                stats.types.push(name);
            }
        }
    }

    /// Columns in display order.
    pub(crate) fn finalize(self) -> Vec<ColumnInfo> {
        let total = self.document_count;
        let mut columns: Vec<ColumnInfo> = self
            .fields
            .into_iter()
            .map(|field| {
                let is_id = field.name == "_id";
                let nullable = !is_id && field.present < total;
                let data_type = match field.types.as_slice() {
                    [] => "Null".to_string(),
                    [single] => (*single).to_string(),
                    _ => "Mixed".to_string(),
                };

                let mut notes = Vec::new();
                if field.types.len() > 1 {
                    notes.push(format!("Mixed: {}", field.types.join(", ")));
                }
                if nullable {
                    notes.push(format!("{}/{} docs", field.present, total));
                }

                ColumnInfo {
                    name: field.name,
                    data_type,
                    nullable,
                    primary_key: is_id,
                    auto_increment: is_id,
                    unique: is_id,
                    comment: (!notes.is_empty()).then(|| notes.join("; ")),
                    ..Default::default()
                }
            })
            .collect();

        if let Some(index) = columns.iter().position(|c| c.name == "_id") {
            let id = columns.remove(index);
            columns.insert(0, id);
        } else if columns.is_empty() {
            columns.push(id_column());
        }
        columns
    }
}

fn id_column() -> ColumnInfo {
    ColumnInfo {
        name: "_id".to_string(),
        data_type: "ObjectId".to_string(),
        primary_key: true,
        auto_increment: true,
        unique: true,
        ..Default::default()
    }
}

/// Infers columns from a set of documents.
pub(crate) fn infer_columns(documents: &[Document]) -> Vec<ColumnInfo> {
    let mut inferrer = SchemaInferrer::new();
    for doc in documents {
        inferrer.analyze_document(doc);
    }
    inferrer.finalize()
}

/// Result-set columns for a list of documents.
pub(crate) fn query_columns(documents: &[Document]) -> Vec<QueryColumn> {
    if documents.is_empty() {
        return Vec::new();
    }
    infer_columns(documents)
        .into_iter()
        .map(|c| QueryColumn {
            name: c.name,
            data_type: c.data_type,
            primary_key: c.primary_key,
        })
        .collect()
}

/// Field name to inferred type, for value coercion.
pub(crate) fn field_types(columns: &[ColumnInfo]) -> HashMap<String, String> {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.data_type.clone()))
        .collect()
}

/// Reads the most recent documents of a collection.
///
/// ObjectIds embed their creation time, so descending `_id` order returns
/// the newest documents first.
///
/// # Errors
/// Returns an error if the find or the cursor fails.
pub(crate) async fn sample_documents(collection: &Collection<Document>) -> Result<Vec<Document>> {
    let cursor = collection
        .find(doc! {})
        .sort(doc! { "_id": -1 })
        .limit(SAMPLE_SIZE)
        .await?;
    Ok(cursor.try_collect().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn test_mixed_types_are_reported() {
        let columns = infer_columns(&[doc! { "v": "x" }, doc! { "v": 1 }]);
        let v = columns.iter().find(|c| c.name == "v").unwrap();
        assert!(v.data_type.contains("Mixed"));
        assert_eq!(v.comment.as_deref(), Some("Mixed: String, Int32"));
        assert!(!v.nullable);
    }

    #[test]
    fn test_null_only_field() {
        let columns = infer_columns(&[doc! { "v": Bson::Null }]);
        let v = columns.iter().find(|c| c.name == "v").unwrap();
        assert_eq!(v.data_type, "Null");
        assert!(v.nullable);
        assert_eq!(v.comment.as_deref(), Some("0/1 docs"));
    }

    #[test]
    fn test_presence_ratio_and_id_first() {
        let id = ObjectId::new();
        let columns = infer_columns(&[
            doc! { "name": "a", "_id": id, "age": 3 },
            doc! { "_id": ObjectId::new(), "name": "b" },
            doc! { "_id": ObjectId::new(), "name": Bson::Null, "age": 4.5 },
        ]);
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["_id", "name", "age"]);
        assert!(columns[0].primary_key);
        assert_eq!(columns[0].data_type, "ObjectId");

        assert!(columns[1].nullable);
        assert_eq!(columns[1].data_type, "String");
        assert_eq!(columns[1].comment.as_deref(), Some("2/3 docs"));

        assert_eq!(columns[2].data_type, "Mixed");
        assert_eq!(columns[2].comment.as_deref(), Some("Mixed: Int32, Double; 2/3 docs"));
    }

    #[test]
    fn test_numbers_are_classified_by_value() {
        let columns = infer_columns(&[
            doc! { "_id": 1, "v": 1.0, "big": 5_000_000_000_i64, "ratio": 0.5 },
            doc! { "_id": 2, "v": 2, "big": 7, "ratio": 2.0 },
            doc! { "_id": 3_i64, "v": 3_i64, "big": f64::NAN, "ratio": 1.25 },
        ]);
        let find = |name: &str| columns.iter().find(|c| c.name == name).unwrap();
        assert_eq!(find("_id").data_type, "Int32");
        assert_eq!(find("v").data_type, "Int32");
        assert_eq!(find("v").comment, None);
        assert_eq!(find("big").comment.as_deref(), Some("Mixed: Int32, Double"));
        assert_eq!(find("ratio").comment.as_deref(), Some("Mixed: Double, Int32"));

        assert_eq!(inferred_type(&Bson::Double(-4.0)), "Int32");
        assert_eq!(inferred_type(&Bson::Double(f64::INFINITY)), "Double");
        assert_eq!(type_name(&Bson::Double(1.0)), "Double");
    }

    #[test]
    fn test_empty_sample_has_id_column() {
        let columns = infer_columns(&[]);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "_id");
        assert!(query_columns(&[]).is_empty());
    }
}
