//! DDL statement builders.
//!
//! These are pure string builders so every dialect's syntax can be checked
//! without a server. Drivers add engine-specific clauses on top.

use super::Dialect;
use crate::models::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, TableDefinition, ViewDefinition,
};

fn postgres_serial_type(data_type: &str) -> Option<&'static str> {
    match data_type.trim().to_ascii_lowercase().as_str() {
        "smallint" | "int2" | "smallserial" => Some("SMALLSERIAL"),
        "int" | "integer" | "int4" | "serial" => Some("SERIAL"),
        "bigint" | "int8" | "bigserial" => Some("BIGSERIAL"),
        _ => None,
    }
}

/// Renders a column definition in the dialect's syntax.
///
/// Default expressions are emitted verbatim. PostgreSQL auto-increment
/// columns become SERIAL types; SQLite auto-increment is handled by
/// [`create_table`] since it is only legal on an INTEGER PRIMARY KEY.
pub fn column_definition(dialect: Dialect, column: &ColumnDefinition) -> String {
    let name = dialect.quote_ident(&column.name);
    let mut parts = Vec::new();

    match dialect {
        Dialect::ClickHouse => {
            let ty = column.full_type();
            if column.nullable && !ty.starts_with("Nullable(") {
                parts.push(format!("{} Nullable({})", name, ty));
            } else {
                parts.push(format!("{} {}", name, ty));
            }
            if let Some(default) = column.default_value.as_deref().filter(|d| !d.is_empty()) {
                parts.push(format!("DEFAULT {}", default));
            }
            if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                parts.push(format!("COMMENT {}", dialect.string_literal(comment)));
            }
            return parts.join(" ");
        }
        Dialect::Postgres if column.auto_increment => {
            let ty = postgres_serial_type(&column.data_type).unwrap_or("SERIAL");
            parts.push(format!("{} {}", name, ty));
        }
        _ => parts.push(format!("{} {}", name, column.full_type())),
    }

    if !column.nullable {
        parts.push("NOT NULL".to_string());
    } else if dialect == Dialect::MySql {
        parts.push("NULL".to_string());
    }
    if let Some(default) = column.default_value.as_deref().filter(|d| !d.is_empty()) {
        parts.push(format!("DEFAULT {}", default));
    }
    if dialect == Dialect::MySql && column.auto_increment {
        parts.push("AUTO_INCREMENT".to_string());
    }
    if column.unique && !column.primary_key {
        parts.push("UNIQUE".to_string());
    }
    if dialect == Dialect::MySql {
        if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("COMMENT {}", dialect.string_literal(comment)));
        }
    }
    parts.join(" ")
}

fn quoted_list(dialect: Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders `[CONSTRAINT name] FOREIGN KEY (...) REFERENCES t (...) [ON ...]`.
///
/// ON DELETE / ON UPDATE are omitted when unset.
pub fn foreign_key_clause(dialect: Dialect, fk: &ForeignKeyDefinition) -> String {
    let mut sql = String::new();
    if !fk.name.is_empty() {
        sql.push_str(&format!("CONSTRAINT {} ", dialect.quote_ident(&fk.name)));
    }
    sql.push_str(&format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quoted_list(dialect, &fk.columns),
        dialect.quote_table(&fk.referenced_table),
        quoted_list(dialect, &fk.referenced_columns)
    ));
    if let Some(action) = fk.on_delete.as_deref().filter(|a| !a.is_empty()) {
        sql.push_str(&format!(" ON DELETE {}", action.to_ascii_uppercase()));
    }
    if let Some(action) = fk.on_update.as_deref().filter(|a| !a.is_empty()) {
        sql.push_str(&format!(" ON UPDATE {}", action.to_ascii_uppercase()));
    }
    sql
}

/// Renders `CREATE [UNIQUE] INDEX` for the SQL dialects.
///
/// MySQL index kinds (FULLTEXT, SPATIAL) replace UNIQUE; BTREE/HASH become a
/// `USING` clause. PostgreSQL kinds become `USING <method>`.
pub fn create_index(dialect: Dialect, table: &str, index: &IndexDefinition) -> String {
    let kind = index
        .index_type
        .as_deref()
        .map(str::to_ascii_uppercase)
        .filter(|k| !k.is_empty());
    let columns = quoted_list(dialect, &index.columns);
    let name = dialect.quote_ident(&index.name);
    let table = dialect.quote_table(table);

    match dialect {
        Dialect::MySql => {
            let prefix = match kind.as_deref() {
                Some("FULLTEXT") => "FULLTEXT ",
                Some("SPATIAL") => "SPATIAL ",
                _ if index.unique => "UNIQUE ",
                _ => "",
            };
            let using = match kind.as_deref() {
                Some(k @ ("BTREE" | "HASH")) => format!(" USING {}", k),
                _ => String::new(),
            };
            format!("CREATE {}INDEX {} ON {} ({}){}", prefix, name, table, columns, using)
        }
        Dialect::Postgres => {
            let unique = if index.unique { "UNIQUE " } else { "" };
            let using = match kind.as_deref() {
                Some(k) if k != "BTREE" => format!(" USING {}", k.to_ascii_lowercase()),
                _ => String::new(),
            };
            format!("CREATE {}INDEX {} ON {}{} ({})", unique, name, table, using, columns)
        }
        Dialect::Sqlite | Dialect::ClickHouse => {
            let unique = if index.unique { "UNIQUE " } else { "" };
            format!("CREATE {}INDEX {} ON {} ({})", unique, name, table, columns)
        }
    }
}

/// Renders `CREATE [OR REPLACE] VIEW [IF NOT EXISTS]`.
///
/// SQLite has no OR REPLACE. MySQL and PostgreSQL have no IF NOT EXISTS
/// for views, so the flag is ignored there.
pub fn create_view(dialect: Dialect, view: &ViewDefinition) -> String {
    let name = dialect.quote_table(&view.name);
    let definition = view.definition.trim().trim_end_matches(';');
    let modifier = match dialect {
        Dialect::Sqlite => "",
        _ if view.replace => "OR REPLACE ",
        _ => "",
    };
    let if_not_exists = match dialect {
        Dialect::Sqlite if view.if_not_exists => "IF NOT EXISTS ",
        Dialect::ClickHouse if view.if_not_exists && !view.replace => "IF NOT EXISTS ",
        _ => "",
    };
    format!(
        "CREATE {}VIEW {}{} AS {}",
        modifier, if_not_exists, name, definition
    )
}

/// Renders `CREATE TABLE` for SQLite, MySQL and PostgreSQL.
///
/// A single auto-increment INTEGER primary key on SQLite is declared inline
/// as `PRIMARY KEY AUTOINCREMENT`; otherwise the key is a table constraint.
pub fn create_table(dialect: Dialect, table: &TableDefinition) -> String {
    let pk: Vec<&str> = table.primary_key_columns();
    let inline_sqlite_pk = dialect == Dialect::Sqlite
        && pk.len() == 1
        && table
            .columns
            .iter()
            .any(|c| c.primary_key && c.auto_increment);

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            if inline_sqlite_pk && c.primary_key {
                format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                    dialect.quote_ident(&c.name)
                )
            } else {
                column_definition(dialect, c)
            }
        })
        .collect();

    if !pk.is_empty() && !inline_sqlite_pk {
        let names: Vec<String> = pk.iter().map(|s| (*s).to_string()).collect();
        parts.push(format!("PRIMARY KEY ({})", quoted_list(dialect, &names)));
    }
    for columns in table.unique_constraints.iter().filter(|c| !c.is_empty()) {
        parts.push(format!("UNIQUE ({})", quoted_list(dialect, columns)));
    }
    for fk in &table.foreign_keys {
        parts.push(foreign_key_clause(dialect, fk));
    }

    let mut sql = format!(
        "CREATE TABLE {} (\n  {}\n)",
        dialect.quote_table(&table.name),
        parts.join(",\n  ")
    );
    if dialect == Dialect::MySql {
        if let Some(engine) = table.engine.as_deref().filter(|e| !e.is_empty()) {
            sql.push_str(&format!(" ENGINE={}", engine));
        }
        if let Some(charset) = table.charset.as_deref().filter(|c| !c.is_empty()) {
            sql.push_str(&format!(" DEFAULT CHARSET={}", charset));
        }
        if let Some(collation) = table.collation.as_deref().filter(|c| !c.is_empty()) {
            sql.push_str(&format!(" COLLATE={}", collation));
        }
        if let Some(comment) = table.comment.as_deref().filter(|c| !c.is_empty()) {
            sql.push_str(&format!(" COMMENT={}", dialect.string_literal(comment)));
        }
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk() -> ForeignKeyDefinition {
        ForeignKeyDefinition {
            name: "fk_orders_user".to_string(),
            columns: vec!["user_id".to_string()],
            referenced_table: "users".to_string(),
            referenced_columns: vec!["id".to_string()],
            on_update: None,
            on_delete: Some("cascade".to_string()),
        }
    }

    #[test]
    fn test_column_definition_mysql() {
        let mut column = ColumnDefinition::new("name", "VARCHAR");
        column.length = Some(100);
        column.nullable = false;
        column.default_value = Some("''".to_string());
        column.comment = Some("display name".to_string());
        assert_eq!(
            column_definition(Dialect::MySql, &column),
            "`name` VARCHAR(100) NOT NULL DEFAULT '' COMMENT 'display name'"
        );
    }

    #[test]
    fn test_column_definition_postgres_serial() {
        let mut column = ColumnDefinition::new("id", "bigint");
        column.auto_increment = true;
        column.nullable = false;
        assert_eq!(
            column_definition(Dialect::Postgres, &column),
            "\"id\" BIGSERIAL NOT NULL"
        );
    }

    #[test]
    fn test_column_definition_clickhouse_nullable() {
        let column = ColumnDefinition::new("note", "String");
        assert_eq!(
            column_definition(Dialect::ClickHouse, &column),
            "`note` Nullable(String)"
        );
        let mut column = ColumnDefinition::new("ts", "DateTime");
        column.nullable = false;
        column.default_value = Some("now()".to_string());
        assert_eq!(
            column_definition(Dialect::ClickHouse, &column),
            "`ts` DateTime DEFAULT now()"
        );
    }

    #[test]
    fn test_foreign_key_omits_unset_actions() {
        assert_eq!(
            foreign_key_clause(Dialect::Sqlite, &fk()),
            "CONSTRAINT \"fk_orders_user\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_create_index_kinds() {
        let index = IndexDefinition {
            name: "ft_body".to_string(),
            columns: vec!["body".to_string()],
            unique: false,
            index_type: Some("fulltext".to_string()),
        };
        assert_eq!(
            create_index(Dialect::MySql, "posts", &index),
            "CREATE FULLTEXT INDEX `ft_body` ON `posts` (`body`)"
        );
        let index = IndexDefinition {
            name: "gin_tags".to_string(),
            columns: vec!["tags".to_string()],
            unique: false,
            index_type: Some("GIN".to_string()),
        };
        assert_eq!(
            create_index(Dialect::Postgres, "public.posts", &index),
            "CREATE INDEX \"gin_tags\" ON \"public\".\"posts\" USING gin (\"tags\")"
        );
    }

    #[test]
    fn test_create_view_modifiers() {
        let view = ViewDefinition {
            name: "active_users".to_string(),
            definition: "SELECT * FROM users WHERE active = 1;".to_string(),
            replace: true,
            if_not_exists: false,
        };
        assert_eq!(
            create_view(Dialect::MySql, &view),
            "CREATE OR REPLACE VIEW `active_users` AS SELECT * FROM users WHERE active = 1"
        );
        let view = ViewDefinition {
            if_not_exists: true,
            replace: false,
            ..view
        };
        assert_eq!(
            create_view(Dialect::Sqlite, &view),
            "CREATE VIEW IF NOT EXISTS \"active_users\" AS SELECT * FROM users WHERE active = 1"
        );
        assert_eq!(
            create_view(Dialect::Postgres, &view),
            "CREATE VIEW \"active_users\" AS SELECT * FROM users WHERE active = 1"
        );
    }

    #[test]
    fn test_create_table_sqlite_autoincrement() {
        let mut id = ColumnDefinition::new("id", "INTEGER");
        id.primary_key = true;
        id.auto_increment = true;
        id.nullable = false;
        let mut name = ColumnDefinition::new("name", "TEXT");
        name.nullable = false;
        let table = TableDefinition {
            name: "users".to_string(),
            columns: vec![id, name],
            ..Default::default()
        };
        assert_eq!(
            create_table(Dialect::Sqlite, &table),
            "CREATE TABLE \"users\" (\n  \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \"name\" TEXT NOT NULL\n)"
        );
    }

    #[test]
    fn test_create_table_mysql_options() {
        let mut id = ColumnDefinition::new("id", "INT");
        id.primary_key = true;
        id.nullable = false;
        id.auto_increment = true;
        let table = TableDefinition {
            name: "orders".to_string(),
            columns: vec![id, ColumnDefinition::new("user_id", "INT")],
            foreign_keys: vec![fk()],
            engine: Some("InnoDB".to_string()),
            charset: Some("utf8mb4".to_string()),
            ..Default::default()
        };
        let sql = create_table(Dialect::MySql, &table);
        assert!(sql.contains("`id` INT NOT NULL AUTO_INCREMENT"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
        assert!(sql.contains("REFERENCES `users` (`id`) ON DELETE CASCADE"));
        assert!(sql.ends_with(") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"));
    }

    #[test]
    fn test_create_table_composite_unique() {
        let table = TableDefinition {
            name: "memberships".to_string(),
            columns: vec![
                ColumnDefinition::new("team_id", "INTEGER"),
                ColumnDefinition::new("user_id", "INTEGER"),
            ],
            unique_constraints: vec![vec!["team_id".to_string(), "user_id".to_string()], Vec::new()],
            ..Default::default()
        };
        assert_eq!(
            create_table(Dialect::Sqlite, &table),
            "CREATE TABLE \"memberships\" (\n  \"team_id\" INTEGER,\n  \"user_id\" INTEGER,\n  UNIQUE (\"team_id\", \"user_id\")\n)"
        );
    }
}
