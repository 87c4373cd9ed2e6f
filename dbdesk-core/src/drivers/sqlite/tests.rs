//! Tests for the SQLite driver against in-memory and file databases.

use super::SqliteDriver;
use crate::config::ConnectionConfig;
use crate::drivers::DatabaseDriver;
use crate::error::DbDeskError;
use crate::models::{
    ColumnDefinition, DataOptions, DatabaseType, Filter, FilterOperator, ForeignKeyDefinition,
    IndexDefinition, Row, SortDirection, TableKind, TriggerDefinition, ViewDefinition,
};
use serde_json::{Value, json};

async fn memory_driver() -> SqliteDriver {
    let mut driver = SqliteDriver::new();
    driver
        .connect(&ConnectionConfig::new(DatabaseType::Sqlite).with_file_path(":memory:"))
        .await
        .expect("in-memory database should open");
    driver
}

async fn seeded_driver() -> SqliteDriver {
    let driver = memory_driver().await;
    let result = driver
        .execute(
            r#"
            CREATE TABLE teams (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE people (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                age INTEGER,
                team_id INTEGER REFERENCES teams(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_people_age ON people (age);
            INSERT INTO teams (id, name) VALUES (1, 'core');
            INSERT INTO people (name, age, team_id) VALUES ('ann', 31, 1), ('bob', 17, 1), ('cy', NULL, NULL);
            "#,
            &[],
        )
        .await;
    assert!(result.error.is_none(), "seed failed: {:?}", result.error);
    driver
}

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

async fn count(driver: &SqliteDriver, table: &str) -> Value {
    let result = driver
        .execute(&format!("SELECT COUNT(*) AS n FROM \"{}\"", table), &[])
        .await;
    assert!(result.error.is_none(), "{:?}", result.error);
    result.rows[0]["n"].clone()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_and_disconnect() {
    let mut driver = SqliteDriver::new();
    assert!(!driver.is_connected());
    driver.disconnect().await;
    assert!(!driver.is_connected());

    driver
        .connect(&ConnectionConfig::new(DatabaseType::Sqlite).with_file_path(":memory:"))
        .await
        .unwrap();
    assert!(driver.is_connected());
    assert!(driver.ping().await);
    assert!(!driver.cancel_query().await);

    driver.disconnect().await;
    assert!(!driver.is_connected());
    assert!(!driver.ping().await);
}

#[tokio::test]
async fn test_connect_without_path_fails() {
    let mut driver = SqliteDriver::new();
    let result = driver
        .connect(&ConnectionConfig::new(DatabaseType::Sqlite))
        .await;
    assert!(matches!(result, Err(DbDeskError::Configuration { .. })));
    assert!(!driver.is_connected());
}

#[tokio::test]
async fn test_file_database_persists_between_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let config = ConnectionConfig::new(DatabaseType::Sqlite)
        .with_file_path(path.to_string_lossy().to_string());

    let mut driver = SqliteDriver::new();
    driver.connect(&config).await.unwrap();
    let created = driver
        .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", &[])
        .await;
    assert!(created.error.is_none());
    driver.disconnect().await;

    driver.connect(&config).await.unwrap();
    let tables = driver.get_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "notes");
    driver.disconnect().await;
}

#[tokio::test]
async fn test_server_info_reports_version() {
    let driver = memory_driver().await;
    let info = driver.server_info().await.unwrap();
    assert!(info.version.unwrap_or_default().starts_with('3'));
}

// =============================================================================
// Execute
// =============================================================================

#[tokio::test]
async fn test_execute_multi_statement_keeps_last_result_set() {
    let driver = seeded_driver().await;
    let result = driver
        .execute(
            "INSERT INTO teams (id, name) VALUES (2, 'web'); SELECT name FROM teams ORDER BY id",
            &[],
        )
        .await;
    assert!(result.error.is_none());
    assert_eq!(result.affected_rows, 1);
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows.len(), result.row_count);
    assert_eq!(result.columns[0].name, "name");
    assert_eq!(result.rows[1]["name"], json!("web"));
}

#[tokio::test]
async fn test_execute_keeps_semicolons_inside_literals() {
    let driver = memory_driver().await;
    let result = driver.execute("SELECT 'a;b' AS v; SELECT 1 AS one", &[]).await;
    assert!(result.error.is_none());
    assert_eq!(result.rows[0]["one"], json!(1));

    let result = driver.execute("SELECT 'a;b' AS v", &[]).await;
    assert_eq!(result.rows[0]["v"], json!("a;b"));
}

#[tokio::test]
async fn test_execute_binds_params() {
    let driver = seeded_driver().await;
    let result = driver
        .execute("SELECT name FROM people WHERE age > ?", &[json!(18)])
        .await;
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("ann"));
}

#[tokio::test]
async fn test_execute_error_has_empty_rows() {
    let driver = memory_driver().await;
    let result = driver.execute("SELECT * FROM missing", &[]).await;
    assert!(result.error.unwrap_or_default().contains("no such table"));
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
}

#[tokio::test]
async fn test_blob_values_are_base64() {
    let driver = memory_driver().await;
    let result = driver.execute("SELECT X'68656C6C6F' AS b", &[]).await;
    assert_eq!(result.rows[0]["b"], json!("base64:aGVsbG8="));
}

// =============================================================================
// Introspection
// =============================================================================

#[tokio::test]
async fn test_tables_and_columns() {
    let driver = seeded_driver().await;
    let tables = driver.get_tables().await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["people", "teams"]);
    assert_eq!(tables[0].row_count, Some(3));

    let columns = driver.get_columns("people").await.unwrap();
    assert_eq!(columns.len(), 4);
    assert!(columns[0].primary_key);
    assert!(columns[0].auto_increment);
    assert!(!columns[0].nullable);
    assert!(columns[1].nullable);

    assert_eq!(
        driver.get_primary_key_columns("people").await.unwrap(),
        vec!["id".to_string()]
    );
    assert!(driver.get_columns("ghost").await.is_err());
}

#[tokio::test]
async fn test_indexes_and_foreign_keys() {
    let driver = seeded_driver().await;
    let indexes = driver.get_indexes("people").await.unwrap();
    assert!(
        indexes
            .iter()
            .any(|i| i.name == "idx_people_age" && i.columns == vec!["age".to_string()])
    );

    let foreign_keys = driver.get_foreign_keys("people").await.unwrap();
    assert_eq!(foreign_keys.len(), 1);
    assert_eq!(foreign_keys[0].name, "fk_people_team_id_teams");
    assert_eq!(foreign_keys[0].referenced_table, "teams");
    assert_eq!(foreign_keys[0].referenced_columns, vec!["id".to_string()]);
    assert_eq!(foreign_keys[0].on_delete.as_deref(), Some("CASCADE"));
}

#[tokio::test]
async fn test_table_ddl_includes_indexes() {
    let driver = seeded_driver().await;
    let ddl = driver.get_table_ddl("people").await.unwrap();
    assert!(ddl.starts_with("CREATE TABLE people"));
    assert!(ddl.contains("CREATE INDEX idx_people_age ON people (age);"));
}

#[tokio::test]
async fn test_unsupported_capabilities() {
    let driver = memory_driver().await;
    assert!(matches!(
        driver.get_routines().await,
        Err(DbDeskError::UnsupportedFeature { .. })
    ));
    let users = driver.get_users().await.unwrap_err().to_string();
    assert_eq!(users, "User management is not supported for SQLite");
}

// =============================================================================
// Data Browsing
// =============================================================================

#[tokio::test]
async fn test_table_data_filters_and_flags_primary_key() {
    let driver = seeded_driver().await;
    let options = DataOptions {
        filters: vec![Filter::new(
            "age",
            FilterOperator::GreaterThan,
            Some(json!(18)),
        )],
        ..Default::default()
    };
    let result = driver.get_table_data("people", &options).await;
    assert!(result.error.is_none());
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("ann"));
    let id = result.columns.iter().find(|c| c.name == "id").unwrap();
    assert!(id.primary_key);
    let name = result.columns.iter().find(|c| c.name == "name").unwrap();
    assert!(!name.primary_key);
}

#[tokio::test]
async fn test_table_data_sorts_and_pages() {
    let driver = seeded_driver().await;
    let options = DataOptions {
        sort_column: Some("name".to_string()),
        sort_direction: SortDirection::Desc,
        limit: Some(1),
        offset: Some(1),
        ..Default::default()
    };
    let result = driver.get_table_data("people", &options).await;
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("bob"));

    let options = DataOptions {
        filters: vec![Filter::new("age", FilterOperator::IsNull, None)],
        ..Default::default()
    };
    let result = driver.get_table_data("people", &options).await;
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["name"], json!("cy"));
}

// =============================================================================
// Column Mutations
// =============================================================================

#[tokio::test]
async fn test_add_plain_column_in_place() {
    let driver = seeded_driver().await;
    let result = driver
        .add_column("people", &ColumnDefinition::new("email", "TEXT"))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.sql.starts_with("ALTER TABLE \"people\" ADD COLUMN"));
    assert_eq!(driver.get_columns("people").await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_add_unique_column_rebuilds_table() {
    let driver = seeded_driver().await;
    let mut column = ColumnDefinition::new("badge", "TEXT");
    column.unique = true;
    let result = driver.add_column("people", &column).await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.sql.contains("people__dbdesk_rebuild"));

    assert_eq!(count(&driver, "people").await, json!(3));
    let indexes = driver.get_indexes("people").await.unwrap();
    assert!(indexes.iter().any(|i| i.name == "idx_people_age"));
    assert_eq!(driver.get_foreign_keys("people").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_modify_column_renames_and_retypes() {
    let driver = seeded_driver().await;
    let mut column = ColumnDefinition::new("full_name", "VARCHAR");
    column.length = Some(80);
    let result = driver.modify_column("people", "name", &column).await;
    assert!(result.success, "{:?}", result.error);

    let columns = driver.get_columns("people").await.unwrap();
    assert_eq!(columns[1].name, "full_name");
    assert_eq!(columns[1].data_type, "VARCHAR(80)");
    assert_eq!(columns[1].length, Some(80));
    assert!(columns[0].auto_increment);

    let result = driver
        .execute("SELECT full_name FROM people WHERE id = 1", &[])
        .await;
    assert_eq!(result.rows[0]["full_name"], json!("ann"));
}

#[tokio::test]
async fn test_failed_rebuild_leaves_table_intact() {
    let driver = seeded_driver().await;
    // 'cy' has no age, so copying into a NOT NULL column fails mid-rebuild
    let mut column = ColumnDefinition::new("age", "INTEGER");
    column.nullable = false;
    let result = driver.modify_column("people", "age", &column).await;
    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("NOT NULL constraint failed")
    );

    assert_eq!(count(&driver, "people").await, json!(3));
    let columns = driver.get_columns("people").await.unwrap();
    assert!(columns.iter().any(|c| c.name == "age" && c.nullable));
    let tables = driver.get_tables().await.unwrap();
    assert!(tables.iter().all(|t| !t.name.contains("dbdesk_rebuild")));

    let pragma = driver.execute("PRAGMA foreign_keys", &[]).await;
    assert_eq!(pragma.rows[0]["foreign_keys"], json!(1));
}

#[tokio::test]
async fn test_drop_indexed_column_falls_back_to_rebuild() {
    let driver = seeded_driver().await;
    let result = driver.drop_column("people", "age").await;
    assert!(result.success, "{:?}", result.error);

    let columns = driver.get_columns("people").await.unwrap();
    assert!(columns.iter().all(|c| c.name != "age"));
    let indexes = driver.get_indexes("people").await.unwrap();
    assert!(indexes.iter().all(|i| i.name != "idx_people_age"));
    assert_eq!(count(&driver, "people").await, json!(3));
}

#[tokio::test]
async fn test_drop_missing_column_reports_error() {
    let driver = seeded_driver().await;
    let result = driver.drop_column("people", "ghost").await;
    assert!(!result.success);
    assert!(result.error.unwrap_or_default().contains("no such column"));
}

#[tokio::test]
async fn test_rename_column_in_place() {
    let driver = seeded_driver().await;
    let result = driver.rename_column("people", "age", "years").await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.sql.starts_with("ALTER TABLE"));
    let indexes = driver.get_indexes("people").await.unwrap();
    let age_index = indexes.iter().find(|i| i.name == "idx_people_age").unwrap();
    assert_eq!(age_index.columns, vec!["years".to_string()]);
}

async fn constrained_driver() -> SqliteDriver {
    let driver = memory_driver().await;
    let result = driver
        .execute(
            r#"
            CREATE TABLE t (
                id INTEGER PRIMARY KEY,
                a TEXT,
                b TEXT,
                c TEXT,
                deleted TEXT,
                UNIQUE (a, b)
            );
            CREATE UNIQUE INDEX idx_live ON t (c) WHERE deleted IS NULL;
            CREATE INDEX idx_recent ON t (b COLLATE NOCASE, c DESC);
            CREATE INDEX idx_lower_a ON t (lower(a));
            INSERT INTO t (a, b, c) VALUES ('x', 'y', 'k1');
            "#,
            &[],
        )
        .await;
    assert!(result.error.is_none(), "seed failed: {:?}", result.error);
    driver
}

async fn index_text(driver: &SqliteDriver) -> Vec<Row> {
    let result = driver
        .execute(
            "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND tbl_name = 't' AND sql IS NOT NULL ORDER BY name",
            &[],
        )
        .await;
    assert!(result.error.is_none(), "{:?}", result.error);
    result.rows
}

#[tokio::test]
async fn test_rebuild_keeps_unique_constraints_and_index_text() {
    let driver = constrained_driver().await;
    let before = index_text(&driver).await;
    assert_eq!(before.len(), 3);

    let result = driver
        .modify_column("t", "c", &ColumnDefinition::new("c", "VARCHAR(10)"))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(index_text(&driver).await, before);

    let ddl = driver.get_table_ddl("t").await.unwrap();
    assert!(ddl.contains("UNIQUE (\"a\", \"b\")"));
    assert!(ddl.contains("WHERE deleted IS NULL"));
    assert!(ddl.contains("c DESC"));

    let duplicate_pair = driver
        .execute("INSERT INTO t (a, b, c) VALUES ('x', 'y', 'k2')", &[])
        .await;
    assert!(duplicate_pair.error.unwrap_or_default().contains("UNIQUE constraint failed"));

    let live_duplicate = driver
        .execute("INSERT INTO t (a, b, c) VALUES ('p', 'q', 'k1')", &[])
        .await;
    assert!(live_duplicate.error.is_some());

    let archived_duplicate = driver
        .execute(
            "INSERT INTO t (a, b, c, deleted) VALUES ('p', 'q', 'k1', '2024-01-01')",
            &[],
        )
        .await;
    assert!(archived_duplicate.error.is_none(), "{:?}", archived_duplicate.error);
    assert_eq!(count(&driver, "t").await, json!(2));
}

#[tokio::test]
async fn test_rebuild_rename_follows_into_constraints_and_expressions() {
    let driver = constrained_driver().await;
    let result = driver
        .modify_column("t", "a", &ColumnDefinition::new("alpha", "TEXT"))
        .await;
    assert!(result.success, "{:?}", result.error);

    let indexes = index_text(&driver).await;
    let lower = indexes.iter().find(|r| r["name"] == json!("idx_lower_a")).unwrap();
    assert_eq!(lower["sql"], json!("CREATE INDEX idx_lower_a ON t (lower(\"alpha\"))"));

    let duplicate_pair = driver
        .execute("INSERT INTO t (alpha, b, c) VALUES ('x', 'y', 'k9')", &[])
        .await;
    assert!(duplicate_pair.error.unwrap_or_default().contains("UNIQUE constraint failed"));
}

#[tokio::test]
async fn test_rebuild_drops_constraints_on_dropped_column() {
    let driver = constrained_driver().await;
    let result = driver.drop_column("t", "deleted").await;
    assert!(result.success, "{:?}", result.error);

    let names: Vec<Value> = index_text(&driver)
        .await
        .iter()
        .map(|r| r["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("idx_lower_a"), json!("idx_recent")]);
    assert_eq!(count(&driver, "t").await, json!(1));
}

// =============================================================================
// Foreign Keys and Indexes
// =============================================================================

#[tokio::test]
async fn test_drop_and_add_foreign_key_rebuild() {
    let driver = seeded_driver().await;
    let result = driver
        .drop_foreign_key("people", "fk_people_team_id_teams")
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(driver.get_foreign_keys("people").await.unwrap().is_empty());
    assert_eq!(count(&driver, "people").await, json!(3));

    let foreign_key = ForeignKeyDefinition {
        name: String::new(),
        columns: vec!["team_id".to_string()],
        referenced_table: "teams".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_update: None,
        on_delete: Some("set null".to_string()),
    };
    let result = driver.add_foreign_key("people", &foreign_key).await;
    assert!(result.success, "{:?}", result.error);
    let foreign_keys = driver.get_foreign_keys("people").await.unwrap();
    assert_eq!(foreign_keys.len(), 1);
    assert_eq!(foreign_keys[0].on_delete.as_deref(), Some("SET NULL"));
}

#[tokio::test]
async fn test_create_and_drop_index() {
    let driver = seeded_driver().await;
    let index = IndexDefinition {
        name: "idx_people_name".to_string(),
        columns: vec!["name".to_string()],
        unique: true,
        index_type: None,
    };
    let result = driver.create_index("people", &index).await;
    assert!(result.success);
    let indexes = driver.get_indexes("people").await.unwrap();
    assert!(indexes.iter().any(|i| i.name == "idx_people_name" && i.unique));

    let result = driver.drop_index("people", "idx_people_name").await;
    assert!(result.success);
    let indexes = driver.get_indexes("people").await.unwrap();
    assert!(indexes.iter().all(|i| i.name != "idx_people_name"));
}

// =============================================================================
// Tables, Rows, Views, Triggers
// =============================================================================

#[tokio::test]
async fn test_create_rename_and_drop_table() {
    let driver = memory_driver().await;
    let mut id = ColumnDefinition::new("id", "INTEGER");
    id.primary_key = true;
    id.auto_increment = true;
    id.nullable = false;
    let table = crate::models::TableDefinition {
        name: "tags".to_string(),
        columns: vec![id, ColumnDefinition::new("label", "TEXT")],
        indexes: vec![IndexDefinition {
            name: "idx_tags_label".to_string(),
            columns: vec!["label".to_string()],
            unique: false,
            index_type: None,
        }],
        ..Default::default()
    };
    let result = driver.create_table(&table).await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.sql.contains("CREATE INDEX \"idx_tags_label\""));

    assert!(driver.rename_table("tags", "labels").await.success);
    let tables = driver.get_tables().await.unwrap();
    assert_eq!(tables[0].name, "labels");

    assert!(driver.drop_table("labels").await.success);
    assert!(driver.get_tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_row_mutations() {
    let driver = seeded_driver().await;
    let inserted = driver
        .insert_row("people", &row(json!({"age": 40, "name": "dee"})))
        .await;
    assert!(inserted.success);
    assert_eq!(inserted.affected_rows, Some(1));

    let updated = driver
        .update_row("people", &row(json!({"id": 1})), &row(json!({"age": 32})))
        .await;
    assert_eq!(updated.affected_rows, Some(1));
    let result = driver.execute("SELECT age FROM people WHERE id = 1", &[]).await;
    assert_eq!(result.rows[0]["age"], json!(32));

    let deleted = driver.delete_row("people", &row(json!({"id": 2}))).await;
    assert_eq!(deleted.affected_rows, Some(1));
    assert_eq!(count(&driver, "people").await, json!(3));

    let refused = driver.delete_row("people", &Row::new()).await;
    assert!(!refused.success);
}

#[tokio::test]
async fn test_view_lifecycle() {
    let driver = seeded_driver().await;
    let view = ViewDefinition {
        name: "adults".to_string(),
        definition: "SELECT name FROM people WHERE age > 18".to_string(),
        replace: false,
        if_not_exists: false,
    };
    assert!(driver.create_view(&view).await.success);
    let ddl = driver.get_view_ddl("adults").await.unwrap();
    assert!(ddl.contains("SELECT name FROM people WHERE age > 18"));

    let renamed = driver.rename_view("adults", "grown_ups").await;
    assert!(renamed.success, "{:?}", renamed.error);
    let tables = driver.get_tables().await.unwrap();
    let view = tables.iter().find(|t| t.name == "grown_ups").unwrap();
    assert_eq!(view.kind, TableKind::View);
    assert!(tables.iter().all(|t| t.name != "adults"));

    let result = driver.execute("SELECT * FROM grown_ups", &[]).await;
    assert_eq!(result.row_count, 1);

    assert!(driver.drop_view("grown_ups").await.success);
    assert!(driver.get_view_ddl("grown_ups").await.is_err());
}

#[tokio::test]
async fn test_triggers_survive_rebuild() {
    let driver = seeded_driver().await;
    let trigger = TriggerDefinition {
        name: "touch_team".to_string(),
        table: "people".to_string(),
        timing: "AFTER".to_string(),
        event: "INSERT".to_string(),
        body: "UPDATE teams SET name = name WHERE id = NEW.team_id".to_string(),
    };
    assert!(driver.create_trigger(&trigger).await.success);

    let triggers = driver.get_triggers(Some("people")).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].timing, "AFTER");
    assert_eq!(triggers[0].event, "INSERT");

    assert!(driver.drop_column("people", "age").await.success);
    assert_eq!(driver.get_triggers(Some("people")).await.unwrap().len(), 1);

    assert!(driver.drop_trigger("touch_team", "people").await.success);
    assert!(driver.get_triggers(None).await.unwrap().is_empty());
}
