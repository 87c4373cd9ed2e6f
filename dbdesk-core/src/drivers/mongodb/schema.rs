//! Collection, index, view and user introspection.

use super::connection::Session;
use super::inference;
use super::values::{shell_json, to_plain};
use crate::error::{DbDeskError, Result};
use crate::models::{ColumnInfo, IndexInfo, ServerInfo, TableInfo, UserInfo};
use futures::TryStreamExt;
use mongodb::IndexModel;
use mongodb::bson::{Bson, Document, doc};
use mongodb::results::{CollectionSpecification, CollectionType};
use serde_json::Value;
use tracing::debug;

fn non_negative(value: Option<&Bson>) -> Option<u64> {
    match value? {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(f) if f.is_finite() && *f >= 0.0 => Some(f.round() as u64),
        _ => None,
    }
}

fn is_view(spec: &CollectionSpecification) -> bool {
    matches!(spec.collection_type, CollectionType::View)
}

pub(crate) async fn get_databases(session: &Session) -> Result<Vec<String>> {
    let mut names = session.client.list_database_names().await?;
    names.sort();
    Ok(names)
}

/// Collections and views of the current database.
///
/// Row counts come from collection metadata and sizes from `collStats`; a
/// collection whose statistics cannot be read is still listed.
pub(crate) async fn get_tables(session: &Session) -> Result<Vec<TableInfo>> {
    let db = session.db();
    let specs: Vec<CollectionSpecification> = db.list_collections().await?.try_collect().await?;

    let mut tables = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.name.starts_with("system.") {
            continue;
        }
        if is_view(&spec) {
            tables.push(TableInfo::view(spec.name));
            continue;
        }
        let mut table = TableInfo::table(spec.name.as_str());
        match db
            .collection::<Document>(&spec.name)
            .estimated_document_count()
            .await
        {
            Ok(count) => table.row_count = Some(count),
            Err(e) => debug!("No document count for {}: {}", spec.name, e),
        }
        match db.run_command(doc! { "collStats": spec.name.as_str() }).await {
            Ok(stats) => table.size_bytes = non_negative(stats.get("size")),
            Err(e) => debug!("No collStats for {}: {}", spec.name, e),
        }
        tables.push(table);
    }
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tables)
}

pub(crate) async fn get_columns(session: &Session, collection: &str) -> Result<Vec<ColumnInfo>> {
    let sample = inference::sample_documents(&session.collection(collection)).await?;
    Ok(inference::infer_columns(&sample))
}

/// Index kind named by a key specification, e.g. `text` or `2dsphere`.
pub(crate) fn index_kind(keys: &Document) -> Option<String> {
    keys.values().find_map(|value| match value {
        Bson::String(kind) => Some(kind.clone()),
        _ => None,
    })
}

/// Indexed field names; text indexes list their weighted fields.
fn index_columns(model: &IndexModel) -> Vec<String> {
    let weights = model.options.as_ref().and_then(|o| o.weights.as_ref());
    match weights {
        Some(weights) if model.keys.contains_key("_fts") => weights.keys().cloned().collect(),
        _ => model.keys.keys().cloned().collect(),
    }
}

pub(crate) fn index_info(model: &IndexModel) -> IndexInfo {
    let options = model.options.as_ref();
    let name = options
        .and_then(|o| o.name.clone())
        .unwrap_or_default();
    let primary = name == "_id_";
    IndexInfo {
        unique: primary || options.and_then(|o| o.unique).unwrap_or(false),
        primary,
        columns: index_columns(model),
        index_type: index_kind(&model.keys),
        name,
    }
}

pub(crate) async fn list_index_models(session: &Session, collection: &str) -> Result<Vec<IndexModel>> {
    Ok(session
        .collection(collection)
        .list_indexes()
        .await?
        .try_collect()
        .await?)
}

pub(crate) async fn get_indexes(session: &Session, collection: &str) -> Result<Vec<IndexInfo>> {
    let models = list_index_models(session, collection).await?;
    Ok(models.iter().map(index_info).collect())
}

pub(crate) async fn collection_spec(
    session: &Session,
    name: &str,
) -> Result<Option<CollectionSpecification>> {
    Ok(session
        .db()
        .list_collections()
        .filter(doc! { "name": name })
        .await?
        .try_next()
        .await?)
}

/// Shell statement that recreates an index.
pub(crate) fn create_index_statement(collection: &str, model: &IndexModel) -> String {
    let mut options = Document::new();
    if let Some(index_options) = model.options.as_ref() {
        if let Some(name) = index_options.name.as_deref() {
            options.insert("name", name);
        }
        if index_options.unique == Some(true) {
            options.insert("unique", true);
        }
        if index_options.sparse == Some(true) {
            options.insert("sparse", true);
        }
    }
    format!(
        "db.getCollection({}).createIndex({}, {})",
        Value::from(collection),
        shell_json(&model.keys),
        shell_json(&options)
    )
}

/// `createCollection` plus one `createIndex` per secondary index.
pub(crate) async fn table_ddl(session: &Session, collection: &str) -> Result<String> {
    let spec = collection_spec(session, collection)
        .await?
        .ok_or_else(|| DbDeskError::query(format!("Collection '{}' not found", collection)))?;
    if is_view(&spec) {
        return view_ddl_from_spec(&spec);
    }

    let mut options = Document::new();
    if spec.options.capped == Some(true) {
        options.insert("capped", true);
        if let Some(size) = spec.options.size {
            options.insert("size", i64::try_from(size).unwrap_or(i64::MAX));
        }
        if let Some(max) = spec.options.max {
            options.insert("max", i64::try_from(max).unwrap_or(i64::MAX));
        }
    }
    if let Some(validator) = spec.options.validator.as_ref() {
        options.insert("validator", validator.clone());
    }

    let mut statements = vec![if options.is_empty() {
        format!("db.createCollection({})", Value::from(collection))
    } else {
        format!(
            "db.createCollection({}, {})",
            Value::from(collection),
            shell_json(&options)
        )
    }];
    for model in list_index_models(session, collection).await? {
        let is_id = model
            .options
            .as_ref()
            .and_then(|o| o.name.as_deref())
            .is_some_and(|name| name == "_id_");
        if !is_id {
            statements.push(create_index_statement(collection, &model));
        }
    }
    Ok(statements
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn view_ddl_from_spec(spec: &CollectionSpecification) -> Result<String> {
    let source = spec
        .options
        .view_on
        .as_deref()
        .ok_or_else(|| DbDeskError::query(format!("'{}' is not a view", spec.name)))?;
    let pipeline = spec
        .options
        .pipeline
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(Bson::Document)
        .collect::<Vec<_>>();
    Ok(format!(
        "db.createView({}, {}, {});",
        Value::from(spec.name.as_str()),
        Value::from(source),
        Bson::Array(pipeline).into_relaxed_extjson()
    ))
}

pub(crate) async fn view_ddl(session: &Session, name: &str) -> Result<String> {
    match collection_spec(session, name).await? {
        Some(spec) if is_view(&spec) => view_ddl_from_spec(&spec),
        _ => Err(DbDeskError::query(format!("View '{}' not found", name))),
    }
}

/// Users of every database, with roles rendered as `role@db`.
pub(crate) async fn get_users(session: &Session) -> Result<Vec<UserInfo>> {
    let reply = session
        .admin()
        .run_command(doc! { "usersInfo": { "forAllDBs": true } })
        .await?;
    let users = reply.get_array("users").map(Vec::as_slice).unwrap_or_default();

    let mut infos: Vec<UserInfo> = users
        .iter()
        .filter_map(Bson::as_document)
        .map(|user| UserInfo {
            name: user.get_str("user").unwrap_or_default().to_string(),
            host: user.get_str("db").ok().map(str::to_string),
            roles: user
                .get_array("roles")
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(Bson::as_document)
                .map(|role| {
                    format!(
                        "{}@{}",
                        role.get_str("role").unwrap_or_default(),
                        role.get_str("db").unwrap_or_default()
                    )
                })
                .collect(),
        })
        .collect();
    infos.sort_by(|a, b| (&a.host, &a.name).cmp(&(&b.host, &b.name)));
    Ok(infos)
}

pub(crate) async fn server_info(session: &Session) -> Result<ServerInfo> {
    let build = session.admin().run_command(doc! { "buildInfo": 1 }).await?;
    let mut details = serde_json::Map::new();
    details.insert("database".to_string(), Value::String(session.database.clone()));
    for key in ["gitVersion", "maxBsonObjectSize", "storageEngines"] {
        if let Some(value) = build.get(key) {
            details.insert(key.to_string(), to_plain(value));
        }
    }
    if let Ok(hello) = session.admin().run_command(doc! { "hello": 1 }).await {
        if let Ok(set_name) = hello.get_str("setName") {
            details.insert("replicaSet".to_string(), Value::String(set_name.to_string()));
        }
    }
    Ok(ServerInfo {
        version: build.get_str("version").ok().map(str::to_string),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::options::IndexOptions;

    fn model(keys: Document, name: &str, unique: bool) -> IndexModel {
        let mut options = IndexOptions::default();
        options.name = Some(name.to_string());
        options.unique = Some(unique);
        IndexModel::builder().keys(keys).options(options).build()
    }

    #[test]
    fn test_id_index_is_primary() {
        let info = index_info(&model(doc! { "_id": 1 }, "_id_", false));
        assert!(info.primary);
        assert!(info.unique);
        assert_eq!(info.columns, vec!["_id"]);
        assert_eq!(info.index_type, None);
    }

    #[test]
    fn test_compound_and_special_indexes() {
        let info = index_info(&model(doc! { "user": 1, "created": -1 }, "user_created", true));
        assert!(!info.primary);
        assert!(info.unique);
        assert_eq!(info.columns, vec!["user", "created"]);

        let geo = index_info(&model(doc! { "location": "2dsphere" }, "geo", false));
        assert_eq!(geo.index_type.as_deref(), Some("2dsphere"));
    }

    #[test]
    fn test_text_index_lists_weighted_fields() {
        let mut options = IndexOptions::default();
        options.name = Some("body_text".to_string());
        options.weights = Some(doc! { "title": 10, "body": 1 });
        let text = IndexModel::builder()
            .keys(doc! { "_fts": "text", "_ftsx": 1 })
            .options(options)
            .build();
        let info = index_info(&text);
        assert_eq!(info.columns, vec!["title", "body"]);
        assert_eq!(info.index_type.as_deref(), Some("text"));
    }

    #[test]
    fn test_create_index_statement() {
        let statement = create_index_statement(
            "orders",
            &model(doc! { "customer": 1 }, "customer_1", true),
        );
        assert_eq!(
            statement,
            r#"db.getCollection("orders").createIndex({"customer":1}, {"name":"customer_1","unique":true})"#
        );
    }

    #[test]
    fn test_size_statistics() {
        assert_eq!(non_negative(Some(&Bson::Int32(512))), Some(512));
        assert_eq!(non_negative(Some(&Bson::Double(2048.0))), Some(2048));
        assert_eq!(non_negative(Some(&Bson::Int64(-1))), None);
        assert_eq!(non_negative(None), None);
    }
}
