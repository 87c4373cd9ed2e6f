//! Runs parsed shell commands against a database.

use super::inference;
use super::shell::{Method, ShellCommand};
use super::values::{document_to_row, to_plain};
use crate::error::{DbDeskError, Result};
use crate::models::{QueryColumn, QueryResult, Row};
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{IndexOptions, UpdateModifications};
use mongodb::{Collection, Database, IndexModel};
use serde_json::Value;
use tracing::debug;

/// Documents returned by `find` when no `.limit()` was given.
pub(crate) const FIND_LIMIT: i64 = 1000;

/// What a command produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Documents from a cursor or lookup
    Documents(Vec<Document>),
    /// One summary row describing a write or command
    Summary { row: Row, affected: u64 },
    /// Scalar values under a single column
    Values { column: String, values: Vec<Value> },
}

impl Outcome {
    fn summary(pairs: impl IntoIterator<Item = (&'static str, Value)>, affected: u64) -> Self {
        let row = pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        Self::Summary { row, affected }
    }

    /// Shapes the outcome as a query result.
    pub(crate) fn into_result(self) -> QueryResult {
        match self {
            Self::Documents(docs) => {
                let columns = inference::query_columns(&docs);
                QueryResult::with_rows(columns, docs.iter().map(document_to_row).collect())
            }
            Self::Summary { row, affected } => {
                let columns = row
                    .iter()
                    .map(|(name, value)| QueryColumn::new(name.clone(), json_type(value)))
                    .collect();
                let mut result = QueryResult::with_rows(columns, vec![row]);
                result.affected_rows = affected;
                result
            }
            Self::Values { column, values } => {
                let data_type = values.first().map_or("Null", json_type);
                let rows = values
                    .into_iter()
                    .map(|value| {
                        let mut row = Row::new();
                        row.insert(column.clone(), value);
                        row
                    })
                    .collect();
                QueryResult::with_rows(vec![QueryColumn::new(column, data_type)], rows)
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_f64() => "Double",
        Value::Number(_) => "Int64",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn document_arg(args: &[Bson], index: usize) -> Result<Document> {
    match args.get(index) {
        None | Some(Bson::Null) => Ok(Document::new()),
        Some(Bson::Document(doc)) => Ok(doc.clone()),
        Some(other) => Err(DbDeskError::query(format!(
            "Argument {} must be a document, got {}",
            index + 1,
            inference::type_name(other)
        ))),
    }
}

fn optional_document_arg(args: &[Bson], index: usize) -> Result<Option<Document>> {
    match args.get(index) {
        None | Some(Bson::Null) => Ok(None),
        Some(_) => document_arg(args, index).map(Some),
    }
}

fn required_document_arg(args: &[Bson], index: usize, what: &str) -> Result<Document> {
    match args.get(index) {
        Some(Bson::Document(doc)) => Ok(doc.clone()),
        _ => Err(DbDeskError::query(format!("{} requires a document", what))),
    }
}

fn documents_arg(value: Option<&Bson>, what: &str) -> Result<Vec<Document>> {
    let Some(Bson::Array(items)) = value else {
        return Err(DbDeskError::query(format!("{} requires an array of documents", what)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc.clone()),
            _ => Err(DbDeskError::query(format!("{} requires an array of documents", what))),
        })
        .collect()
}

fn string_arg<'a>(args: &'a [Bson], index: usize, what: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(Bson::String(s)) => Ok(s),
        _ => Err(DbDeskError::query(format!("{} requires a string argument", what))),
    }
}

fn count(value: u64) -> Value {
    Value::from(value)
}

/// Runs a parsed command.
///
/// # Errors
/// Returns an error if arguments have the wrong shape or the server rejects
/// the command.
pub(crate) async fn run(db: &Database, command: ShellCommand) -> Result<Outcome> {
    let ShellCommand {
        collection,
        method,
        args,
        modifiers,
    } = command;
    debug!("MongoDB command {:?} on {:?}", method, collection);

    let Some(name) = collection else {
        return match method {
            Method::GetCollectionNames => {
                let mut names = db.list_collection_names().await?;
                names.sort();
                Ok(Outcome::Values {
                    column: "name".to_string(),
                    values: names.into_iter().map(Value::String).collect(),
                })
            }
            Method::Stats => {
                let stats = db.run_command(doc! { "dbStats": 1 }).await?;
                Ok(Outcome::Documents(vec![stats]))
            }
            other => Err(DbDeskError::query(format!(
                "{:?} requires a collection",
                other
            ))),
        };
    };
    let coll: Collection<Document> = db.collection(&name);

    match method {
        Method::Find => {
            let mut find = coll
                .find(document_arg(&args, 0)?)
                .limit(modifiers.limit.unwrap_or(FIND_LIMIT));
            if let Some(projection) = optional_document_arg(&args, 1)? {
                find = find.projection(projection);
            }
            if let Some(sort) = modifiers.sort {
                find = find.sort(sort);
            }
            if let Some(skip) = modifiers.skip {
                find = find.skip(skip);
            }
            let docs: Vec<Document> = find.await?.try_collect().await?;
            Ok(Outcome::Documents(docs))
        }
        Method::FindOne => {
            let mut find = coll.find_one(document_arg(&args, 0)?);
            if let Some(projection) = optional_document_arg(&args, 1)? {
                find = find.projection(projection);
            }
            Ok(Outcome::Documents(find.await?.into_iter().collect()))
        }
        Method::Aggregate => {
            let mut pipeline = match args.first() {
                Some(Bson::Array(_)) => documents_arg(args.first(), "aggregate")?,
                _ => (0..args.len())
                    .map(|i| required_document_arg(&args, i, "aggregate"))
                    .collect::<Result<Vec<_>>>()?,
            };
            if let Some(sort) = modifiers.sort {
                pipeline.push(doc! { "$sort": sort });
            }
            if let Some(skip) = modifiers.skip {
                pipeline.push(doc! { "$skip": i64::try_from(skip).unwrap_or(i64::MAX) });
            }
            if let Some(limit) = modifiers.limit {
                pipeline.push(doc! { "$limit": limit });
            }
            let docs: Vec<Document> = coll.aggregate(pipeline).await?.try_collect().await?;
            Ok(Outcome::Documents(docs))
        }
        Method::InsertOne => {
            let doc = required_document_arg(&args, 0, "insertOne")?;
            let result = coll.insert_one(doc).await?;
            Ok(Outcome::summary(
                [("insertedId", to_plain(&result.inserted_id))],
                1,
            ))
        }
        Method::InsertMany => {
            let docs = documents_arg(args.first(), "insertMany")?;
            let result = coll.insert_many(docs).await?;
            let mut ids: Vec<_> = result.inserted_ids.into_iter().collect();
            ids.sort_by_key(|(index, _)| *index);
            let affected = ids.len() as u64;
            let ids = ids.iter().map(|(_, id)| to_plain(id)).collect();
            Ok(Outcome::summary([("insertedIds", Value::Array(ids))], affected))
        }
        Method::UpdateOne | Method::UpdateMany => {
            let filter = document_arg(&args, 0)?;
            let update = match args.get(1) {
                Some(Bson::Document(doc)) => UpdateModifications::Document(doc.clone()),
                Some(Bson::Array(_)) => {
                    UpdateModifications::Pipeline(documents_arg(args.get(1), "update pipeline")?)
                }
                _ => return Err(DbDeskError::query("update requires an update document")),
            };
            let upsert = optional_document_arg(&args, 2)?
                .and_then(|options| options.get_bool("upsert").ok())
                .unwrap_or(false);
            let result = if method == Method::UpdateOne {
                coll.update_one(filter, update).upsert(upsert).await?
            } else {
                coll.update_many(filter, update).upsert(upsert).await?
            };
            Ok(Outcome::summary(
                [
                    ("matchedCount", count(result.matched_count)),
                    ("modifiedCount", count(result.modified_count)),
                    (
                        "upsertedId",
                        result.upserted_id.as_ref().map_or(Value::Null, to_plain),
                    ),
                ],
                result.modified_count,
            ))
        }
        Method::DeleteOne | Method::DeleteMany => {
            let filter = document_arg(&args, 0)?;
            let result = if method == Method::DeleteOne {
                coll.delete_one(filter).await?
            } else {
                coll.delete_many(filter).await?
            };
            Ok(Outcome::summary(
                [("deletedCount", count(result.deleted_count))],
                result.deleted_count,
            ))
        }
        Method::CountDocuments => {
            let total = coll.count_documents(document_arg(&args, 0)?).await?;
            Ok(Outcome::summary([("count", count(total))], 0))
        }
        Method::Distinct => {
            let field = string_arg(&args, 0, "distinct")?.to_string();
            let values = coll.distinct(&field, document_arg(&args, 1)?).await?;
            Ok(Outcome::Values {
                column: field,
                values: values.iter().map(to_plain).collect(),
            })
        }
        Method::CreateIndex => {
            let keys = required_document_arg(&args, 0, "createIndex")?;
            let index = IndexModel::builder()
                .keys(keys)
                .options(index_options(optional_document_arg(&args, 1)?.as_ref()))
                .build();
            let result = coll.create_index(index).await?;
            Ok(Outcome::summary(
                [("indexName", Value::String(result.index_name))],
                0,
            ))
        }
        Method::DropIndex => {
            let index = args
                .first()
                .cloned()
                .ok_or_else(|| DbDeskError::query("dropIndex requires an index name or key document"))?;
            let reply = db
                .run_command(doc! { "dropIndexes": name.as_str(), "index": index })
                .await?;
            Ok(Outcome::Documents(vec![reply]))
        }
        Method::Drop => {
            coll.drop().await?;
            Ok(Outcome::summary([("dropped", Value::Bool(true))], 0))
        }
        Method::GetCollectionNames | Method::Stats => Err(DbDeskError::query(format!(
            "{:?} is a database method",
            method
        ))),
    }
}

/// Index options from a shell `createIndex` options document.
pub(crate) fn index_options(options: Option<&Document>) -> IndexOptions {
    let mut index_options = IndexOptions::default();
    if let Some(options) = options {
        index_options.name = options.get_str("name").ok().map(str::to_string);
        index_options.unique = options.get_bool("unique").ok();
        index_options.sparse = options.get_bool("sparse").ok();
    }
    index_options
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_shape() {
        let result = Outcome::summary([("deletedCount", json!(3))], 3).into_result();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.affected_rows, 3);
        assert_eq!(result.columns[0].name, "deletedCount");
        assert_eq!(result.columns[0].data_type, "Int64");
    }

    #[test]
    fn test_documents_shape() {
        let result = Outcome::Documents(vec![doc! { "b": 1, "_id": 7 }, doc! { "_id": 8 }])
            .into_result();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns[0].name, "_id");
        assert!(result.columns[0].primary_key);
        assert_eq!(result.rows[1]["_id"], json!(8));

        let empty = Outcome::Documents(Vec::new()).into_result();
        assert!(empty.columns.is_empty());
        assert_eq!(empty.row_count, 0);
    }

    #[test]
    fn test_values_shape() {
        let result = Outcome::Values {
            column: "city".to_string(),
            values: vec![json!("Oslo"), json!("Lima")],
        }
        .into_result();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1]["city"], json!("Lima"));
        assert_eq!(result.columns[0].data_type, "String");
    }

    #[test]
    fn test_argument_shapes() {
        let args = vec![Bson::Document(doc! { "a": 1 }), Bson::Int32(3)];
        assert_eq!(document_arg(&args, 0).unwrap(), doc! { "a": 1 });
        assert_eq!(document_arg(&args, 5).unwrap(), Document::new());
        assert!(document_arg(&args, 1).is_err());
        assert!(string_arg(&args, 0, "distinct").is_err());
        assert!(documents_arg(Some(&Bson::Array(vec![Bson::Int32(1)])), "insertMany").is_err());
    }

    #[test]
    fn test_index_options() {
        let options = index_options(Some(&doc! { "name": "email_1", "unique": true }));
        assert_eq!(options.name.as_deref(), Some("email_1"));
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, None);
    }
}
