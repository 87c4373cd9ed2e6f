//! PostgreSQL schema introspection through `pg_catalog`.
//!
//! Table arguments are `table` (resolved in `public`) or `schema.table`.
//! Relations are looked up with `to_regclass` on the quoted name, so a
//! missing relation yields no rows instead of a cast error.

use crate::error::{DbDeskError, Result};
use crate::models::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableInfo};
use crate::sql::Dialect;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};

const DIALECT: Dialect = Dialect::Postgres;

/// Default schema for unqualified names.
pub(crate) const DEFAULT_SCHEMA: &str = "public";

/// Splits `schema.table`, defaulting to `public`.
pub(crate) fn split_name(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or((DEFAULT_SCHEMA, name))
}

/// Name as shown to callers: bare in `public`, qualified elsewhere.
pub(crate) fn display_name(schema: &str, table: &str) -> String {
    if schema == DEFAULT_SCHEMA {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}

/// The quoted, fully-qualified relation name passed to `to_regclass`.
pub(crate) fn regclass_name(name: &str) -> String {
    let (schema, table) = split_name(name);
    format!("{}.{}", DIALECT.quote_ident(schema), DIALECT.quote_ident(table))
}

fn missing_relation(name: &str) -> DbDeskError {
    DbDeskError::query(format!("relation \"{}\" does not exist", name))
}

/// Maps a `pg_constraint` action code to its SQL keyword.
pub(crate) fn referential_action(code: &str) -> Option<String> {
    let action = match code {
        "a" => "NO ACTION",
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => return None,
    };
    Some(action.to_string())
}

pub(crate) async fn get_databases(pool: &PgPool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT datname::text FROM pg_database WHERE NOT datistemplate AND datallowconn ORDER BY datname",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub(crate) async fn get_tables(pool: &PgPool) -> Result<Vec<TableInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            n.nspname::text AS schema_name,
            c.relname::text AS table_name,
            c.relkind::text AS kind,
            c.reltuples::bigint AS estimated_rows,
            pg_total_relation_size(c.oid) AS size_bytes,
            obj_description(c.oid, 'pg_class') AS table_comment
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
        AND NOT c.relispartition
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND n.nspname NOT LIKE 'pg_toast%'
        AND n.nspname NOT LIKE 'pg_temp%'
        ORDER BY n.nspname <> 'public', n.nspname, c.relname
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let schema: String = row.try_get("schema_name")?;
        let name: String = row.try_get("table_name")?;
        let kind: String = row.try_get("kind").unwrap_or_default();
        let name = display_name(&schema, &name);
        if kind == "v" || kind == "m" {
            tables.push(TableInfo::view(name));
            continue;
        }
        let mut table = TableInfo::table(name);
        // reltuples is -1 until the table is first analyzed
        table.row_count = row
            .try_get::<Option<i64>, _>("estimated_rows")
            .ok()
            .flatten()
            .and_then(|n| u64::try_from(n).ok());
        table.size_bytes = row
            .try_get::<Option<i64>, _>("size_bytes")
            .ok()
            .flatten()
            .and_then(|n| u64::try_from(n).ok());
        table.comment = row.try_get("table_comment").ok().flatten();
        tables.push(table);
    }
    Ok(tables)
}

fn as_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

pub(crate) async fn get_columns(pool: &PgPool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            a.attname::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS is_nullable,
            pg_get_expr(d.adbin, d.adrelid) AS column_default,
            a.attidentity::text AS identity,
            col_description(a.attrelid, a.attnum) AS column_comment,
            CASE WHEN a.atttypid IN (1042, 1043) AND a.atttypmod > 0
                THEN a.atttypmod - 4 END AS char_length,
            CASE WHEN a.atttypid = 1700 AND a.atttypmod > 0
                THEN ((a.atttypmod - 4) >> 16) & 65535 END AS num_precision,
            CASE WHEN a.atttypid = 1700 AND a.atttypmod > 0
                THEN (a.atttypmod - 4) & 65535 END AS num_scale,
            EXISTS (
                SELECT 1 FROM pg_index i
                WHERE i.indrelid = a.attrelid AND i.indisprimary AND a.attnum = ANY(i.indkey)
            ) AS is_primary_key,
            EXISTS (
                SELECT 1 FROM pg_index i
                WHERE i.indrelid = a.attrelid AND i.indisunique AND NOT i.indisprimary
                AND i.indnatts = 1 AND i.indkey[0] = a.attnum
            ) AS is_unique
        FROM pg_attribute a
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(missing_relation(table));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let default_value: Option<String> = row.try_get("column_default").ok().flatten();
        let identity: String = row.try_get("identity").unwrap_or_default();
        let auto_increment = !identity.is_empty()
            || default_value
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("));
        columns.push(ColumnInfo {
            name: row.try_get("column_name")?,
            data_type: row.try_get("data_type").unwrap_or_default(),
            nullable: row.try_get("is_nullable").unwrap_or(true),
            primary_key: row.try_get("is_primary_key").unwrap_or(false),
            auto_increment,
            unique: row.try_get("is_unique").unwrap_or(false),
            length: as_u32(row.try_get("char_length").ok().flatten()),
            precision: as_u32(row.try_get("num_precision").ok().flatten()),
            scale: as_u32(row.try_get("num_scale").ok().flatten()),
            default_value,
            comment: row.try_get("column_comment").ok().flatten(),
        });
    }
    Ok(columns)
}

/// Declared type of each column, used to cast text parameters.
pub(crate) async fn column_types(pool: &PgPool, table: &str) -> Result<HashMap<String, String>> {
    let rows = sqlx::query(
        r#"
        SELECT a.attname::text AS column_name, format_type(a.atttypid, a.atttypmod) AS data_type
        FROM pg_attribute a
        WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;
    let mut types = HashMap::with_capacity(rows.len());
    for row in &rows {
        types.insert(row.try_get("column_name")?, row.try_get("data_type")?);
    }
    Ok(types)
}

pub(crate) async fn get_primary_key_columns(pool: &PgPool, table: &str) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT a.attname::text
        FROM pg_index i
        JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
        WHERE i.indrelid = to_regclass($1) AND i.indisprimary
        ORDER BY array_position(i.indkey::int2[], a.attnum)
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub(crate) async fn get_indexes(pool: &PgPool, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            i.relname::text AS index_name,
            am.amname::text AS index_type,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            a.attname::text AS column_name
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_am am ON am.oid = i.relam
        JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = ANY(ix.indkey)
        WHERE ix.indrelid = to_regclass($1)
        ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, IndexInfo> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("index_name")?;
        let entry = grouped.entry(name.clone()).or_insert_with(|| IndexInfo {
            name,
            columns: Vec::new(),
            unique: row.try_get("is_unique").unwrap_or(false),
            primary: row.try_get("is_primary").unwrap_or(false),
            index_type: row.try_get("index_type").ok(),
        });
        entry.columns.push(row.try_get("column_name")?);
    }
    Ok(grouped.into_values().collect())
}

pub(crate) async fn get_foreign_keys(pool: &PgPool, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            con.conname::text AS constraint_name,
            a.attname::text AS column_name,
            fn.nspname::text AS referenced_schema,
            fc.relname::text AS referenced_table,
            fa.attname::text AS referenced_column,
            con.confupdtype::text AS update_action,
            con.confdeltype::text AS delete_action
        FROM pg_constraint con
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_class fc ON fc.oid = con.confrelid
        JOIN pg_namespace fn ON fn.oid = fc.relnamespace
        JOIN pg_attribute fa ON fa.attrelid = con.confrelid AND fa.attnum = k.fattnum
        WHERE con.contype = 'f' AND con.conrelid = to_regclass($1)
        ORDER BY con.conname, k.ord
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, ForeignKeyInfo> = BTreeMap::new();
    for row in &rows {
        let name: String = row.try_get("constraint_name")?;
        let referenced_schema: String = row.try_get("referenced_schema")?;
        let referenced_table: String = row.try_get("referenced_table")?;
        let update_action: String = row.try_get("update_action").unwrap_or_default();
        let delete_action: String = row.try_get("delete_action").unwrap_or_default();
        let entry = grouped.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
            name,
            columns: Vec::new(),
            referenced_table: display_name(&referenced_schema, &referenced_table),
            referenced_columns: Vec::new(),
            on_update: referential_action(&update_action),
            on_delete: referential_action(&delete_action),
        });
        entry.columns.push(row.try_get("column_name")?);
        entry.referenced_columns.push(row.try_get("referenced_column")?);
    }
    Ok(grouped.into_values().collect())
}

/// Renders `CREATE TABLE` plus trailing index statements from catalog parts.
pub(crate) fn render_table_ddl(
    table: &str,
    columns: &[ColumnInfo],
    constraints: &[(String, String)],
    index_definitions: &[String],
) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut line = format!("{} {}", DIALECT.quote_ident(&c.name), c.data_type);
            if !c.nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = c.default_value.as_deref() {
                line.push_str(&format!(" DEFAULT {}", default));
            }
            line
        })
        .collect();
    lines.extend(
        constraints
            .iter()
            .map(|(name, definition)| format!("CONSTRAINT {} {}", DIALECT.quote_ident(name), definition)),
    );

    let mut ddl = format!(
        "CREATE TABLE {} (\n  {}\n);",
        DIALECT.quote_table(table),
        lines.join(",\n  ")
    );
    for definition in index_definitions {
        ddl.push_str(&format!("\n{};", definition));
    }
    ddl
}

pub(crate) async fn get_table_ddl(pool: &PgPool, table: &str) -> Result<String> {
    let columns = get_columns(pool, table).await?;
    let regclass = regclass_name(table);

    let constraint_rows = sqlx::query(
        r#"
        SELECT conname::text AS name, pg_get_constraintdef(oid) AS definition
        FROM pg_constraint
        WHERE conrelid = to_regclass($1) AND contype IN ('p', 'u', 'f', 'c', 'x')
        ORDER BY contype <> 'p', contype <> 'u', contype <> 'f', conname
        "#,
    )
    .bind(&regclass)
    .fetch_all(pool)
    .await?;
    let mut constraints = Vec::with_capacity(constraint_rows.len());
    for row in &constraint_rows {
        constraints.push((row.try_get("name")?, row.try_get("definition")?));
    }

    // Indexes that back a constraint are already covered above
    let index_definitions: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT pg_get_indexdef(i.indexrelid)
        FROM pg_index i
        JOIN pg_class ic ON ic.oid = i.indexrelid
        WHERE i.indrelid = to_regclass($1)
        AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = i.indexrelid)
        ORDER BY ic.relname
        "#,
    )
    .bind(&regclass)
    .fetch_all(pool)
    .await?;

    Ok(render_table_ddl(table, &columns, &constraints, &index_definitions))
}

pub(crate) async fn get_view_ddl(pool: &PgPool, view: &str) -> Result<String> {
    let definition: Option<String> =
        sqlx::query_scalar("SELECT pg_get_viewdef(to_regclass($1), true)")
            .bind(regclass_name(view))
            .fetch_one(pool)
            .await?;
    let definition = definition.ok_or_else(|| missing_relation(view))?;
    Ok(format!(
        "CREATE OR REPLACE VIEW {} AS\n{}",
        DIALECT.quote_table(view),
        definition.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_helpers() {
        assert_eq!(split_name("orders"), ("public", "orders"));
        assert_eq!(split_name("sales.orders"), ("sales", "orders"));
        assert_eq!(display_name("public", "orders"), "orders");
        assert_eq!(display_name("sales", "orders"), "sales.orders");
        assert_eq!(regclass_name("orders"), "\"public\".\"orders\"");
        assert_eq!(regclass_name("Sales.Order\"s"), "\"Sales\".\"Order\"\"s\"");
    }

    #[test]
    fn test_referential_action_codes() {
        assert_eq!(referential_action("c").as_deref(), Some("CASCADE"));
        assert_eq!(referential_action("a").as_deref(), Some("NO ACTION"));
        assert_eq!(referential_action("n").as_deref(), Some("SET NULL"));
        assert_eq!(referential_action(" "), None);
    }

    #[test]
    fn test_render_table_ddl() {
        let columns = vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                nullable: false,
                default_value: Some("nextval('orders_id_seq'::regclass)".to_string()),
                ..Default::default()
            },
            ColumnInfo {
                name: "note".to_string(),
                data_type: "character varying(200)".to_string(),
                nullable: true,
                ..Default::default()
            },
        ];
        let constraints = vec![("orders_pkey".to_string(), "PRIMARY KEY (id)".to_string())];
        let indexes = vec!["CREATE INDEX idx_note ON sales.orders USING btree (note)".to_string()];
        assert_eq!(
            render_table_ddl("sales.orders", &columns, &constraints, &indexes),
            "CREATE TABLE \"sales\".\"orders\" (\n  \"id\" integer NOT NULL DEFAULT nextval('orders_id_seq'::regclass),\n  \"note\" character varying(200),\n  CONSTRAINT \"orders_pkey\" PRIMARY KEY (id)\n);\nCREATE INDEX idx_note ON sales.orders USING btree (note);"
        );
    }
}
