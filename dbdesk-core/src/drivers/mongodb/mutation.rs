//! Collection, field, index, document, view and user mutations.
//!
//! Every operation reports the equivalent shell statement in
//! `SchemaOperationResult::sql` so the caller can show what ran.

use super::commands::index_options;
use super::connection::Session;
use super::inference;
use super::schema;
use super::values::{coerce, document_from_json, shell_json};
use crate::error::{DbDeskError, Result};
use crate::models::{
    ColumnDefinition, IndexDefinition, Row, SchemaOperationResult, TableDefinition,
    UserDefinition, ViewDefinition,
};
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::UpdateModifications;
use mongodb::{Collection, IndexModel};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

const MASKED_PASSWORD: &str = "****";

fn collection_ref(name: &str) -> String {
    format!("db.getCollection({})", Value::from(name))
}

fn statement(collection: &str, method: &str, args: &[&Document]) -> String {
    let args = args
        .iter()
        .map(|doc| shell_json(doc))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}.{}({})", collection_ref(collection), method, args)
}

fn pipeline_statement(collection: &str, filter: &Document, pipeline: &[Document]) -> String {
    let stages = Bson::Array(pipeline.iter().cloned().map(Bson::Document).collect());
    format!(
        "{}.updateMany({}, {})",
        collection_ref(collection),
        shell_json(filter),
        stages.into_relaxed_extjson()
    )
}

/// Field types of the collection's sampled documents.
///
/// An empty map is returned when sampling fails, so coercion falls back to
/// shape-based guessing.
async fn sampled_types(coll: &Collection<Document>) -> HashMap<String, String> {
    match inference::sample_documents(coll).await {
        Ok(sample) => inference::field_types(&inference::infer_columns(&sample)),
        Err(e) => {
            debug!("Sampling {} failed: {}", coll.name(), e);
            HashMap::new()
        }
    }
}

fn row_document(row: &Row, types: &HashMap<String, String>) -> Document {
    row.iter()
        .map(|(key, value)| (key.clone(), coerce(value, types.get(key).map(String::as_str))))
        .collect()
}

/// Parses a column default: JSON text when it parses, otherwise the raw text.
fn default_value(column: &ColumnDefinition) -> Bson {
    match column.default_value.as_deref() {
        None => Bson::Null,
        Some(text) => {
            let value = serde_json::from_str::<Value>(text)
                .unwrap_or_else(|_| Value::String(text.to_string()));
            coerce(&value, Some(column.data_type.as_str()))
        }
    }
}

/// `$convert` target for a display type name.
pub(crate) fn convert_target(data_type: &str) -> Option<&'static str> {
    match data_type {
        "String" => Some("string"),
        "Int32" => Some("int"),
        "Int64" => Some("long"),
        "Double" => Some("double"),
        "Decimal128" => Some("decimal"),
        "Boolean" => Some("bool"),
        "Date" => Some("date"),
        "ObjectId" => Some("objectId"),
        _ => None,
    }
}

/// Key document for an index; the index type picks the key direction or kind.
pub(crate) fn index_keys(index: &IndexDefinition) -> Document {
    let kind: Bson = match index.index_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("desc" | "descending" | "-1") => Bson::Int32(-1),
        Some(kind @ ("text" | "2dsphere" | "2d" | "hashed")) => Bson::String(kind.to_string()),
        _ => Bson::Int32(1),
    };
    index
        .columns
        .iter()
        .map(|column| (column.clone(), kind.clone()))
        .collect()
}

fn index_options_document(index: &IndexDefinition) -> Document {
    let mut options = Document::new();
    if !index.name.is_empty() {
        options.insert("name", index.name.as_str());
    }
    if index.unique {
        options.insert("unique", true);
    }
    options
}

async fn create_index_on(
    coll: &Collection<Document>,
    index: &IndexDefinition,
) -> std::result::Result<String, (String, DbDeskError)> {
    let keys = index_keys(index);
    let options = index_options_document(index);
    let sql = statement(coll.name(), "createIndex", &[&keys, &options]);
    let model = IndexModel::builder()
        .keys(keys)
        .options(index_options(Some(&options)))
        .build();
    match coll.create_index(model).await {
        Ok(_) => Ok(sql),
        Err(e) => Err((sql, e.into())),
    }
}

fn joined(statements: &[String]) -> String {
    statements.join(";\n")
}

fn protect_id(field: &str) -> Option<SchemaOperationResult> {
    (field == "_id").then(|| {
        SchemaOperationResult::failed(String::new(), "The _id field cannot be changed")
    })
}

/// Sets the default on every document lacking the field.
pub(crate) async fn add_column(
    session: &Session,
    collection: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    if let Some(rejected) = protect_id(&column.name) {
        return rejected;
    }
    let coll = session.collection(collection);
    let filter = doc! { column.name.as_str(): { "$exists": false } };
    let update = doc! { "$set": { column.name.as_str(): default_value(column) } };
    let mut statements = vec![statement(collection, "updateMany", &[&filter, &update])];

    let modified = match coll.update_many(filter, update).await {
        Ok(result) => result.modified_count,
        Err(e) => return SchemaOperationResult::failed(joined(&statements), e),
    };

    if column.unique {
        let index = IndexDefinition {
            name: format!("{}_1", column.name),
            columns: vec![column.name.clone()],
            unique: true,
            index_type: None,
        };
        match create_index_on(&coll, &index).await {
            Ok(sql) => statements.push(sql),
            Err((sql, e)) => {
                statements.push(sql);
                return SchemaOperationResult::failed(joined(&statements), e);
            }
        }
    }
    SchemaOperationResult::ok_with_rows(joined(&statements), modified)
}

/// Renames the field and converts stored values to the requested type.
///
/// Values that cannot be converted keep their original value.
pub(crate) async fn modify_column(
    session: &Session,
    collection: &str,
    old_name: &str,
    column: &ColumnDefinition,
) -> SchemaOperationResult {
    if let Some(rejected) = protect_id(old_name).or_else(|| protect_id(&column.name)) {
        return rejected;
    }
    let coll = session.collection(collection);
    let mut statements = Vec::new();
    let mut modified = 0;

    if old_name != column.name {
        let filter = doc! { old_name: { "$exists": true } };
        let update = doc! { "$rename": { old_name: column.name.as_str() } };
        statements.push(statement(collection, "updateMany", &[&filter, &update]));
        match coll.update_many(filter, update).await {
            Ok(result) => modified = result.modified_count,
            Err(e) => return SchemaOperationResult::failed(joined(&statements), e),
        }
    }

    if let Some(target) = convert_target(column.data_type.trim()) {
        let field = column.name.as_str();
        let filter = doc! { field: { "$exists": true } };
        let pipeline = vec![doc! {
            "$set": {
                field: {
                    "$convert": {
                        "input": format!("${}", field),
                        "to": target,
                        "onError": format!("${}", field),
                        "onNull": Bson::Null,
                    }
                }
            }
        }];
        statements.push(pipeline_statement(collection, &filter, &pipeline));
        match coll
            .update_many(filter, UpdateModifications::Pipeline(pipeline))
            .await
        {
            Ok(result) => modified = modified.max(result.modified_count),
            Err(e) => return SchemaOperationResult::failed(joined(&statements), e),
        }
    }

    if statements.is_empty() {
        return SchemaOperationResult::ok_with_rows(String::new(), 0);
    }
    SchemaOperationResult::ok_with_rows(joined(&statements), modified)
}

pub(crate) async fn drop_column(
    session: &Session,
    collection: &str,
    field: &str,
) -> SchemaOperationResult {
    if let Some(rejected) = protect_id(field) {
        return rejected;
    }
    let filter = doc! { field: { "$exists": true } };
    let update = doc! { "$unset": { field: "" } };
    let sql = statement(collection, "updateMany", &[&filter, &update]);
    match session.collection(collection).update_many(filter, update).await {
        Ok(result) => SchemaOperationResult::ok_with_rows(sql, result.modified_count),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn rename_column(
    session: &Session,
    collection: &str,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    if let Some(rejected) = protect_id(old_name).or_else(|| protect_id(new_name)) {
        return rejected;
    }
    let filter = doc! { old_name: { "$exists": true } };
    let update = doc! { "$rename": { old_name: new_name } };
    let sql = statement(collection, "updateMany", &[&filter, &update]);
    match session.collection(collection).update_many(filter, update).await {
        Ok(result) => SchemaOperationResult::ok_with_rows(sql, result.modified_count),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn create_index(
    session: &Session,
    collection: &str,
    index: &IndexDefinition,
) -> SchemaOperationResult {
    if index.columns.is_empty() {
        return SchemaOperationResult::failed(String::new(), "An index needs at least one field");
    }
    match create_index_on(&session.collection(collection), index).await {
        Ok(sql) => SchemaOperationResult::ok(sql),
        Err((sql, e)) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn drop_index(
    session: &Session,
    collection: &str,
    name: &str,
) -> SchemaOperationResult {
    let sql = format!("{}.dropIndex({})", collection_ref(collection), Value::from(name));
    if name == "_id_" {
        return SchemaOperationResult::failed(sql, "The _id index cannot be dropped");
    }
    match session.collection(collection).drop_index(name).await {
        Ok(()) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Creates the collection, then one index per unique field and per
/// requested index. Field types are not enforced.
pub(crate) async fn create_table(session: &Session, table: &TableDefinition) -> SchemaOperationResult {
    let db = session.db();
    let mut statements = vec![format!("db.createCollection({})", Value::from(table.name.as_str()))];
    if let Err(e) = db.create_collection(&table.name).await {
        return SchemaOperationResult::failed(joined(&statements), e);
    }

    let coll = session.collection(&table.name);
    let unique_fields = table
        .columns
        .iter()
        .filter(|c| c.unique && c.name != "_id")
        .map(|c| IndexDefinition {
            name: format!("{}_1", c.name),
            columns: vec![c.name.clone()],
            unique: true,
            index_type: None,
        });
    for index in unique_fields.chain(table.indexes.iter().cloned()) {
        match create_index_on(&coll, &index).await {
            Ok(sql) => statements.push(sql),
            Err((sql, e)) => {
                statements.push(sql);
                return SchemaOperationResult::failed(joined(&statements), e);
            }
        }
    }
    info!("Created MongoDB collection {}", table.name);
    SchemaOperationResult::ok(joined(&statements))
}

pub(crate) async fn drop_table(session: &Session, collection: &str) -> SchemaOperationResult {
    let sql = format!("{}.drop()", collection_ref(collection));
    match session.collection(collection).drop().await {
        Ok(()) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn rename_table(
    session: &Session,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    let sql = format!(
        "{}.renameCollection({})",
        collection_ref(old_name),
        Value::from(new_name)
    );
    let command = doc! {
        "renameCollection": format!("{}.{}", session.database, old_name),
        "to": format!("{}.{}", session.database, new_name),
    };
    match session.admin().run_command(command).await {
        Ok(_) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Inserts one document. An empty or null `_id` lets the server assign one.
pub(crate) async fn insert_row(session: &Session, collection: &str, row: &Row) -> SchemaOperationResult {
    let coll = session.collection(collection);
    let types = sampled_types(&coll).await;
    let mut document = row_document(row, &types);
    let empty_id = match document.get("_id") {
        Some(Bson::Null) => true,
        Some(Bson::String(id)) => id.is_empty(),
        _ => false,
    };
    if empty_id {
        document.remove("_id");
    }
    let sql = statement(collection, "insertOne", &[&document]);
    match coll.insert_one(document).await {
        Ok(_) => SchemaOperationResult::ok_with_rows(sql, 1),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

fn key_filter(key: &Row, types: &HashMap<String, String>) -> Result<Document> {
    if key.is_empty() {
        return Err(DbDeskError::query("A row key is required"));
    }
    Ok(row_document(key, types))
}

pub(crate) async fn delete_row(session: &Session, collection: &str, key: &Row) -> SchemaOperationResult {
    let coll = session.collection(collection);
    let types = sampled_types(&coll).await;
    let filter = match key_filter(key, &types) {
        Ok(filter) => filter,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let sql = statement(collection, "deleteOne", &[&filter]);
    match coll.delete_one(filter).await {
        Ok(result) => SchemaOperationResult::ok_with_rows(sql, result.deleted_count),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Applies `changes` with `$set`. `_id` is immutable and never set.
pub(crate) async fn update_row(
    session: &Session,
    collection: &str,
    key: &Row,
    changes: &Row,
) -> SchemaOperationResult {
    let coll = session.collection(collection);
    let types = sampled_types(&coll).await;
    let filter = match key_filter(key, &types) {
        Ok(filter) => filter,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let mut fields = row_document(changes, &types);
    fields.remove("_id");
    if fields.is_empty() {
        return SchemaOperationResult::ok_with_rows(String::new(), 0);
    }
    let update = doc! { "$set": fields };
    let sql = statement(collection, "updateOne", &[&filter, &update]);
    match coll.update_one(filter, update).await {
        Ok(result) => SchemaOperationResult::ok_with_rows(sql, result.modified_count),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Source collection and pipeline of a view definition.
///
/// The definition is JSON: `{"viewOn": "orders", "pipeline": [...]}`.
pub(crate) fn parse_view_definition(definition: &str) -> Result<(String, Vec<Document>)> {
    let value: Value = serde_json::from_str(definition)
        .map_err(|e| DbDeskError::query(format!("Invalid view definition: {}", e)))?;
    let mut object = document_from_json(value)?;
    let source = match object.remove("viewOn") {
        Some(Bson::String(source)) if !source.is_empty() => source,
        _ => return Err(DbDeskError::query("A view definition needs a 'viewOn' collection")),
    };
    let pipeline = match object.remove("pipeline") {
        None => Vec::new(),
        Some(Bson::Array(stages)) => stages
            .into_iter()
            .map(|stage| match stage {
                Bson::Document(stage) => Ok(stage),
                _ => Err(DbDeskError::query("Pipeline stages must be documents")),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(DbDeskError::query("'pipeline' must be an array")),
    };
    Ok((source, pipeline))
}

fn create_view_statement(name: &str, source: &str, pipeline: &[Document]) -> String {
    let stages = Bson::Array(pipeline.iter().cloned().map(Bson::Document).collect());
    format!(
        "db.createView({}, {}, {})",
        Value::from(name),
        Value::from(source),
        stages.into_relaxed_extjson()
    )
}

async fn create_view_raw(
    session: &Session,
    name: &str,
    source: &str,
    pipeline: Vec<Document>,
) -> mongodb::error::Result<()> {
    session
        .db()
        .create_collection(name)
        .view_on(source.to_string())
        .pipeline(pipeline)
        .await
}

pub(crate) async fn create_view(session: &Session, view: &ViewDefinition) -> SchemaOperationResult {
    let (source, pipeline) = match parse_view_definition(&view.definition) {
        Ok(parsed) => parsed,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let sql = create_view_statement(&view.name, &source, &pipeline);

    if view.replace || view.if_not_exists {
        match schema::collection_spec(session, &view.name).await {
            Ok(Some(_)) if view.if_not_exists && !view.replace => {
                return SchemaOperationResult::ok(sql);
            }
            Ok(Some(_)) => {
                if let Err(e) = session.collection(&view.name).drop().await {
                    return SchemaOperationResult::failed(sql, e);
                }
            }
            Ok(None) => {}
            Err(e) => return SchemaOperationResult::failed(sql, e),
        }
    }

    match create_view_raw(session, &view.name, &source, pipeline).await {
        Ok(()) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Views cannot be renamed in place; the view is recreated under the new
/// name and the old one dropped.
pub(crate) async fn rename_view(session: &Session, old_name: &str, new_name: &str) -> SchemaOperationResult {
    let spec = match schema::collection_spec(session, old_name).await {
        Ok(Some(spec)) => spec,
        Ok(None) => {
            return SchemaOperationResult::failed(
                String::new(),
                format!("View '{}' not found", old_name),
            );
        }
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    let Some(source) = spec.options.view_on.clone() else {
        return SchemaOperationResult::failed(String::new(), format!("'{}' is not a view", old_name));
    };
    let pipeline = spec.options.pipeline.clone().unwrap_or_default();
    let mut statements = vec![create_view_statement(new_name, &source, &pipeline)];
    if let Err(e) = create_view_raw(session, new_name, &source, pipeline).await {
        return SchemaOperationResult::failed(joined(&statements), e);
    }
    statements.push(format!("{}.drop()", collection_ref(old_name)));
    match session.collection(old_name).drop().await {
        Ok(()) => SchemaOperationResult::ok(joined(&statements)),
        Err(e) => SchemaOperationResult::failed(joined(&statements), e),
    }
}

/// Role documents for `createUser`; `role@db` names another database.
pub(crate) fn role_documents(roles: &[String], database: &str) -> Vec<Document> {
    roles
        .iter()
        .map(|role| match role.split_once('@') {
            Some((role, db)) => doc! { "role": role, "db": db },
            None => doc! { "role": role.as_str(), "db": database },
        })
        .collect()
}

pub(crate) async fn create_user(session: &Session, user: &UserDefinition) -> SchemaOperationResult {
    let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) else {
        return SchemaOperationResult::failed(String::new(), "A password is required");
    };
    let database = user.host.clone().unwrap_or_else(|| session.database.clone());
    let roles = if user.roles.is_empty() {
        vec!["readWrite".to_string()]
    } else {
        user.roles.clone()
    };
    let roles = role_documents(&roles, &database);
    let display = doc! { "user": user.name.as_str(), "pwd": MASKED_PASSWORD, "roles": roles.clone() };
    let sql = format!("db.getSiblingDB({}).createUser({})", Value::from(database.as_str()), shell_json(&display));

    let command = doc! {
        "createUser": user.name.as_str(),
        "pwd": password.expose(),
        "roles": roles,
    };
    match session.client.database(&database).run_command(command).await {
        Ok(_) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn drop_user(session: &Session, name: &str, database: Option<&str>) -> SchemaOperationResult {
    let database = database.unwrap_or(&session.database);
    let sql = format!(
        "db.getSiblingDB({}).dropUser({})",
        Value::from(database),
        Value::from(name)
    );
    match session
        .client
        .database(database)
        .run_command(doc! { "dropUser": name })
        .await
    {
        Ok(_) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_keys_follow_type() {
        let mut index = IndexDefinition {
            name: "by_name".to_string(),
            columns: vec!["last".to_string(), "first".to_string()],
            unique: true,
            index_type: None,
        };
        assert_eq!(index_keys(&index), doc! { "last": 1, "first": 1 });
        index.index_type = Some("DESC".to_string());
        assert_eq!(index_keys(&index), doc! { "last": -1, "first": -1 });
        index.index_type = Some("text".to_string());
        assert_eq!(index_keys(&index), doc! { "last": "text", "first": "text" });
        assert_eq!(index_options_document(&index), doc! { "name": "by_name", "unique": true });
    }

    #[test]
    fn test_default_values_follow_declared_type() {
        let mut column = ColumnDefinition::new("score", "Int32");
        assert_eq!(default_value(&column), Bson::Null);
        column.default_value = Some("0".to_string());
        assert_eq!(default_value(&column), Bson::Int32(0));
        column.data_type = "String".to_string();
        column.default_value = Some("pending".to_string());
        assert_eq!(default_value(&column), Bson::String("pending".to_string()));
    }

    #[test]
    fn test_convert_targets() {
        assert_eq!(convert_target("Int64"), Some("long"));
        assert_eq!(convert_target("ObjectId"), Some("objectId"));
        assert_eq!(convert_target("Mixed"), None);
    }

    #[test]
    fn test_statements_are_shell_syntax() {
        let filter = doc! { "age": { "$exists": false } };
        let update = doc! { "$set": { "age": Bson::Null } };
        assert_eq!(
            statement("people", "updateMany", &[&filter, &update]),
            r#"db.getCollection("people").updateMany({"age":{"$exists":false}}, {"$set":{"age":null}})"#
        );
        assert_eq!(
            create_view_statement("big_orders", "orders", &[doc! { "$match": { "total": { "$gt": 100 } } }]),
            r#"db.createView("big_orders", "orders", [{"$match":{"total":{"$gt":100}}}])"#
        );
    }

    #[test]
    fn test_view_definition_parsing() {
        let (source, pipeline) = parse_view_definition(
            &json!({ "viewOn": "orders", "pipeline": [{ "$match": { "status": "open" } }] }).to_string(),
        )
        .unwrap();
        assert_eq!(source, "orders");
        assert_eq!(pipeline, vec![doc! { "$match": { "status": "open" } }]);

        let (_, empty) = parse_view_definition(r#"{"viewOn": "orders"}"#).unwrap();
        assert!(empty.is_empty());

        assert!(parse_view_definition("SELECT 1").is_err());
        assert!(parse_view_definition(r#"{"pipeline": []}"#).is_err());
        assert!(parse_view_definition(r#"{"viewOn": "o", "pipeline": [1]}"#).is_err());
    }

    #[test]
    fn test_role_documents() {
        let roles = role_documents(&["read".to_string(), "dbAdmin@reports".to_string()], "app");
        assert_eq!(
            roles,
            vec![
                doc! { "role": "read", "db": "app" },
                doc! { "role": "dbAdmin", "db": "reports" },
            ]
        );
    }

    #[test]
    fn test_row_documents_are_coerced() {
        let mut row = Row::new();
        row.insert("_id".to_string(), json!("507f1f77bcf86cd799439011"));
        row.insert("zip".to_string(), json!("01234"));
        let mut types = HashMap::new();
        types.insert("_id".to_string(), "ObjectId".to_string());
        types.insert("zip".to_string(), "String".to_string());
        let document = row_document(&row, &types);
        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(document.get_str("zip").unwrap(), "01234");
        assert!(key_filter(&Row::new(), &types).is_err());
    }
}
