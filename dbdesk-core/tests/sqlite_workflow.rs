//! End-to-end SQLite tests through the public driver contract.
//!
//! This test suite covers:
//! - Connection testing with server metadata and latency
//! - Schema creation, introspection and browsing through `Box<dyn DatabaseDriver>`
//! - Column changes that need the table rebuild
//! - Row and view mutations
//!
//! SQLite tests use temporary files, so no external service is needed.

#![cfg(feature = "sqlite")]

use dbdesk_core::{
    ColumnDefinition, ConnectionConfig, DataOptions, DatabaseDriver, DatabaseType, Filter,
    FilterOperator, ForeignKeyDefinition, IndexDefinition, Row, SortDirection, TableDefinition,
    TableKind, ViewDefinition, create_driver, test_connection,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> ConnectionConfig {
    let path = dir.path().join("workflow.db");
    ConnectionConfig::new(DatabaseType::Sqlite).with_file_path(path.to_string_lossy())
}

async fn connected(config: &ConnectionConfig) -> Box<dyn DatabaseDriver> {
    let mut driver = create_driver(config.database_type).expect("sqlite is compiled in");
    driver.connect(config).await.expect("file database should open");
    driver
}

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

fn table_definition() -> TableDefinition {
    let mut id = ColumnDefinition::new("id", "INTEGER");
    id.primary_key = true;
    id.auto_increment = true;
    id.nullable = false;

    let mut email = ColumnDefinition::new("email", "TEXT");
    email.nullable = false;
    email.unique = true;

    TableDefinition {
        name: "accounts".to_string(),
        columns: vec![id, email, ColumnDefinition::new("score", "INTEGER")],
        indexes: vec![IndexDefinition {
            name: "idx_accounts_score".to_string(),
            columns: vec!["score".to_string()],
            unique: false,
            index_type: None,
        }],
        ..Default::default()
    }
}

async fn seed(driver: &dyn DatabaseDriver) {
    let created = driver.create_table(&table_definition()).await;
    assert!(created.success, "{:?}", created.error);
    for (email, score) in [("a@x.io", 10), ("b@x.io", 20), ("c@x.io", 30), ("d@y.io", 40)] {
        let inserted = driver
            .insert_row("accounts", &row(json!({ "email": email, "score": score })))
            .await;
        assert!(inserted.success, "{:?}", inserted.error);
    }
}

// =============================================================================
// Connection Tests
// =============================================================================

#[tokio::test]
async fn test_connection_test_reports_version() {
    let dir = TempDir::new().unwrap();
    let result = test_connection(&file_config(&dir)).await.unwrap();
    assert!(result.success);
    assert!(result.server_version.is_some());
}

#[tokio::test]
async fn test_connection_test_rejects_missing_path() {
    let config = ConnectionConfig::new(DatabaseType::Sqlite);
    assert!(test_connection(&config).await.is_err());
}

#[tokio::test]
async fn test_disconnect_twice_is_safe() {
    let dir = TempDir::new().unwrap();
    let mut driver = connected(&file_config(&dir)).await;
    assert!(driver.ping().await);
    driver.disconnect().await;
    driver.disconnect().await;
    assert!(!driver.is_connected());
    assert!(!driver.ping().await);
}

// =============================================================================
// Schema and Browsing Tests
// =============================================================================

#[tokio::test]
async fn test_created_schema_is_introspectable() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let tables = driver.get_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "accounts");
    assert_eq!(tables[0].kind, TableKind::Table);

    let columns = driver.get_columns("accounts").await.unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "email", "score"]);
    assert!(columns[0].primary_key);
    assert!(!columns[1].nullable);

    let indexes = driver.get_indexes("accounts").await.unwrap();
    assert!(indexes.iter().any(|i| i.name == "idx_accounts_score"));
    assert_eq!(
        driver.get_primary_key_columns("accounts").await.unwrap(),
        vec!["id"]
    );

    let ddl = driver.get_table_ddl("accounts").await.unwrap();
    assert!(ddl.contains("CREATE TABLE"));
    assert!(ddl.contains("idx_accounts_score"));
}

#[tokio::test]
async fn test_browse_filters_sorts_and_pages() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let options = DataOptions {
        filters: vec![
            Filter::new("email", FilterOperator::Like, Some(json!("%@x.io"))),
            Filter::new("score", FilterOperator::GreaterThan, Some(json!(10))),
        ],
        sort_column: Some("score".to_string()),
        sort_direction: SortDirection::Desc,
        limit: Some(1),
        offset: Some(1),
    };
    let page = driver.get_table_data("accounts", &options).await;
    assert!(page.error.is_none(), "{:?}", page.error);
    assert_eq!(page.row_count, 1);
    assert_eq!(page.rows.len(), page.row_count);
    assert_eq!(page.rows[0]["email"], json!("b@x.io"));
    assert!(page.columns.iter().any(|c| c.name == "id" && c.primary_key));

    let options = DataOptions {
        filters: vec![Filter::new("score", FilterOperator::In, Some(json!([10, 40])))],
        ..Default::default()
    };
    let page = driver.get_table_data("accounts", &options).await;
    assert_eq!(page.row_count, 2);
}

#[tokio::test]
async fn test_execute_batch_with_embedded_semicolons() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let result = driver
        .execute(
            "UPDATE accounts SET email = 'x;y@z.io' WHERE id = 1; -- note; here\n\
             SELECT email FROM accounts WHERE id = 1;",
            &[],
        )
        .await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["email"], json!("x;y@z.io"));

    let failed = driver.execute("SELECT * FROM missing_table", &[]).await;
    assert!(failed.error.is_some());
    assert!(failed.rows.is_empty());
}

#[tokio::test]
async fn test_data_persists_across_connections() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    {
        let mut driver = connected(&config).await;
        seed(driver.as_ref()).await;
        driver.disconnect().await;
    }
    let driver = connected(&config).await;
    let result = driver
        .execute("SELECT COUNT(*) AS n FROM accounts", &[])
        .await;
    assert_eq!(result.rows[0]["n"], json!(4));
}

// =============================================================================
// Mutation Tests
// =============================================================================

#[tokio::test]
async fn test_column_changes_keep_rows_and_indexes() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let mut points = ColumnDefinition::new("points", "REAL");
    points.nullable = false;
    points.default_value = Some("0".to_string());
    let modified = driver.modify_column("accounts", "score", &points).await;
    assert!(modified.success, "{:?}", modified.error);

    let columns = driver.get_columns("accounts").await.unwrap();
    let points = columns.iter().find(|c| c.name == "points").unwrap();
    assert!(!points.nullable);
    assert!(columns.iter().all(|c| c.name != "score"));

    let indexes = driver.get_indexes("accounts").await.unwrap();
    assert!(indexes.iter().any(|i| i.name == "idx_accounts_score"));

    let result = driver
        .execute("SELECT points FROM accounts WHERE email = 'd@y.io'", &[])
        .await;
    assert_eq!(result.rows[0]["points"], json!(40.0));
}

#[tokio::test]
async fn test_foreign_keys_round_trip() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let created = driver
        .execute("CREATE TABLE sessions (id INTEGER PRIMARY KEY, account_id INTEGER)", &[])
        .await;
    assert!(created.error.is_none());

    let fk = ForeignKeyDefinition {
        name: "fk_sessions_account".to_string(),
        columns: vec!["account_id".to_string()],
        referenced_table: "accounts".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_update: None,
        on_delete: Some("CASCADE".to_string()),
    };
    let added = driver.add_foreign_key("sessions", &fk).await;
    assert!(added.success, "{:?}", added.error);

    let keys = driver.get_foreign_keys("sessions").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].referenced_table, "accounts");
    assert_eq!(keys[0].on_delete.as_deref(), Some("CASCADE"));
}

#[tokio::test]
async fn test_rows_and_views() {
    let dir = TempDir::new().unwrap();
    let driver = connected(&file_config(&dir)).await;
    seed(driver.as_ref()).await;

    let updated = driver
        .update_row("accounts", &row(json!({ "id": 2 })), &row(json!({ "score": 25 })))
        .await;
    assert_eq!(updated.affected_rows, Some(1));
    let deleted = driver.delete_row("accounts", &row(json!({ "id": 4 }))).await;
    assert_eq!(deleted.affected_rows, Some(1));

    let view = ViewDefinition {
        name: "top_accounts".to_string(),
        definition: "SELECT email FROM accounts WHERE score >= 20".to_string(),
        replace: false,
        if_not_exists: true,
    };
    let created = driver.create_view(&view).await;
    assert!(created.success, "{:?}", created.error);
    let rows = driver
        .get_table_data("top_accounts", &DataOptions::default())
        .await;
    assert_eq!(rows.row_count, 2);

    assert!(driver.drop_view("top_accounts").await.success);
    assert!(driver.drop_table("accounts").await.success);
    assert!(driver.get_tables().await.unwrap().is_empty());
}
