//! PostgreSQL routines, triggers, roles, sequences and partitions.

use super::mutation::run_ddl;
use super::schema::{display_name, regclass_name, split_name};
use crate::error::{DbDeskError, Result};
use crate::models::{
    PartitionInfo, RoutineInfo, RoutineKind, SchemaOperationResult, SequenceInfo,
    TriggerDefinition, TriggerInfo, UserDefinition, UserInfo,
};
use crate::sql::{Dialect, leading_keyword};
use sqlx::{PgPool, Row};

const DIALECT: Dialect = Dialect::Postgres;

const TRIGGER_TYPE_ROW: i32 = 1 << 0;
const TRIGGER_TYPE_BEFORE: i32 = 1 << 1;
const TRIGGER_TYPE_INSERT: i32 = 1 << 2;
const TRIGGER_TYPE_DELETE: i32 = 1 << 3;
const TRIGGER_TYPE_UPDATE: i32 = 1 << 4;
const TRIGGER_TYPE_TRUNCATE: i32 = 1 << 5;
const TRIGGER_TYPE_INSTEAD: i32 = 1 << 6;

/// Decodes `pg_trigger.tgtype` into timing and `OR`-joined events.
pub(crate) fn decode_trigger_type(tgtype: i32) -> (String, String) {
    let timing = if tgtype & TRIGGER_TYPE_INSTEAD != 0 {
        "INSTEAD OF"
    } else if tgtype & TRIGGER_TYPE_BEFORE != 0 {
        "BEFORE"
    } else {
        "AFTER"
    };

    let events: Vec<&str> = [
        (TRIGGER_TYPE_INSERT, "INSERT"),
        (TRIGGER_TYPE_UPDATE, "UPDATE"),
        (TRIGGER_TYPE_DELETE, "DELETE"),
        (TRIGGER_TYPE_TRUNCATE, "TRUNCATE"),
    ]
    .iter()
    .filter(|(flag, _)| tgtype & flag != 0)
    .map(|(_, name)| *name)
    .collect();

    (timing.to_string(), events.join(" OR "))
}

fn prokind(kind: RoutineKind) -> &'static str {
    match kind {
        RoutineKind::Function => "f",
        RoutineKind::Procedure => "p",
    }
}

pub(crate) async fn get_routines(pool: &PgPool) -> Result<Vec<RoutineInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            p.proname::text AS routine_name,
            p.prokind::text AS kind,
            n.nspname::text AS schema_name,
            CASE WHEN p.prokind = 'f' THEN pg_get_function_result(p.oid) END AS return_type,
            pg_get_function_identity_arguments(p.oid) AS arguments
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE p.prokind IN ('f', 'p')
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND NOT EXISTS (
            SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e'
        )
        ORDER BY n.nspname, p.proname
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut routines = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.try_get("kind").unwrap_or_default();
        routines.push(RoutineInfo {
            name: row.try_get("routine_name")?,
            kind: if kind == "p" {
                RoutineKind::Procedure
            } else {
                RoutineKind::Function
            },
            schema: row.try_get("schema_name").ok(),
            return_type: row.try_get("return_type").ok().flatten(),
            arguments: row
                .try_get::<Option<String>, _>("arguments")
                .ok()
                .flatten()
                .filter(|a| !a.is_empty()),
        });
    }
    Ok(routines)
}

/// `pg_get_functiondef` of the first overload matching name and kind.
pub(crate) async fn get_routine_definition(
    pool: &PgPool,
    name: &str,
    kind: RoutineKind,
) -> Result<String> {
    let (schema, routine) = split_name(name);
    let definition: Option<String> = sqlx::query_scalar(
        r#"
        SELECT pg_get_functiondef(p.oid)
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind = $3
        ORDER BY p.oid
        LIMIT 1
        "#,
    )
    .bind(schema)
    .bind(routine)
    .bind(prokind(kind))
    .fetch_optional(pool)
    .await?;
    definition.ok_or_else(|| {
        DbDeskError::query(format!(
            "{} {} does not exist",
            kind.as_sql().to_ascii_lowercase(),
            name
        ))
    })
}

pub(crate) async fn drop_routine(pool: &PgPool, name: &str, kind: RoutineKind) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![format!("DROP {} IF EXISTS {}", kind.as_sql(), DIALECT.quote_table(name))],
    )
    .await
}

pub(crate) async fn get_triggers(pool: &PgPool, table: Option<&str>) -> Result<Vec<TriggerInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            t.tgname::text AS trigger_name,
            n.nspname::text AS schema_name,
            c.relname::text AS table_name,
            t.tgtype::int4 AS trigger_type,
            pg_get_triggerdef(t.oid, true) AS definition
        FROM pg_trigger t
        JOIN pg_class c ON c.oid = t.tgrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE NOT t.tgisinternal
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND ($1::text IS NULL OR t.tgrelid = to_regclass($1))
        ORDER BY n.nspname, c.relname, t.tgname
        "#,
    )
    .bind(table.map(regclass_name))
    .fetch_all(pool)
    .await?;

    let mut triggers = Vec::with_capacity(rows.len());
    for row in &rows {
        let schema: String = row.try_get("schema_name")?;
        let table_name: String = row.try_get("table_name")?;
        let (timing, event) = decode_trigger_type(row.try_get("trigger_type").unwrap_or(0));
        triggers.push(TriggerInfo {
            name: row.try_get("trigger_name")?,
            table: display_name(&schema, &table_name),
            timing,
            event,
            definition: row.try_get("definition").ok().flatten(),
        });
    }
    Ok(triggers)
}

/// Statements creating a trigger.
///
/// A body starting with `EXECUTE` names an existing trigger function and is
/// used as is. Any other body becomes a PL/pgSQL function named
/// `<trigger>_fn` that returns the affected row.
pub(crate) fn create_trigger_statements(trigger: &TriggerDefinition) -> Vec<String> {
    let body = trigger.body.trim().trim_end_matches(';').trim();
    let head = format!(
        "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW",
        DIALECT.quote_ident(&trigger.name),
        trigger.timing.to_ascii_uppercase(),
        trigger.event.to_ascii_uppercase(),
        DIALECT.quote_table(&trigger.table)
    );
    if leading_keyword(body) == "EXECUTE" {
        return vec![format!("{} {}", head, body)];
    }

    let (schema, _) = split_name(&trigger.table);
    let function = format!(
        "{}.{}",
        DIALECT.quote_ident(schema),
        DIALECT.quote_ident(&format!("{}_fn", trigger.name))
    );
    let block = if leading_keyword(body) == "BEGIN" || leading_keyword(body) == "DECLARE" {
        format!("{};", body)
    } else {
        format!("BEGIN\n  {};\n  RETURN COALESCE(NEW, OLD);\nEND;", body)
    };
    vec![
        format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS trigger LANGUAGE plpgsql AS $trigger$\n{}\n$trigger$",
            function, block
        ),
        format!("{} EXECUTE FUNCTION {}()", head, function),
    ]
}

pub(crate) async fn create_trigger(pool: &PgPool, trigger: &TriggerDefinition) -> SchemaOperationResult {
    run_ddl(pool, create_trigger_statements(trigger)).await
}

pub(crate) async fn drop_trigger(pool: &PgPool, name: &str, table: &str) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![format!(
            "DROP TRIGGER IF EXISTS {} ON {}",
            DIALECT.quote_ident(name),
            DIALECT.quote_table(table)
        )],
    )
    .await
}

pub(crate) async fn get_users(pool: &PgPool) -> Result<Vec<UserInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            r.rolname::text AS role_name,
            COALESCE(
                array_agg(g.rolname::text ORDER BY g.rolname) FILTER (WHERE g.rolname IS NOT NULL),
                ARRAY[]::text[]
            ) AS member_of
        FROM pg_roles r
        LEFT JOIN pg_auth_members m ON m.member = r.oid
        LEFT JOIN pg_roles g ON g.oid = m.roleid
        WHERE r.rolname NOT LIKE 'pg\_%'
        GROUP BY r.rolname
        ORDER BY r.rolname
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in &rows {
        users.push(UserInfo {
            name: row.try_get("role_name")?,
            host: None,
            roles: row.try_get("member_of").unwrap_or_default(),
        });
    }
    Ok(users)
}

/// `CREATE ROLE ... LOGIN [PASSWORD]` followed by one `GRANT` per role.
pub(crate) fn create_user_statements(user: &UserDefinition) -> Vec<String> {
    let role = DIALECT.quote_ident(&user.name);
    let mut create = format!("CREATE ROLE {} WITH LOGIN", role);
    if let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) {
        create.push_str(&format!(" PASSWORD {}", DIALECT.string_literal(password.expose())));
    }
    let mut statements = vec![create];
    statements.extend(
        user.roles
            .iter()
            .map(|granted| format!("GRANT {} TO {}", DIALECT.quote_ident(granted), role)),
    );
    statements
}

pub(crate) async fn create_user(pool: &PgPool, user: &UserDefinition) -> SchemaOperationResult {
    let mut result = run_ddl(pool, create_user_statements(user)).await;
    if let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) {
        result.sql = result
            .sql
            .replace(&DIALECT.string_literal(password.expose()), "'****'");
    }
    result
}

pub(crate) async fn drop_user(pool: &PgPool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP ROLE IF EXISTS {}", DIALECT.quote_ident(name))]).await
}

pub(crate) async fn get_sequences(pool: &PgPool) -> Result<Vec<SequenceInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            sequence_schema::text AS sequence_schema,
            sequence_name::text AS sequence_name,
            data_type::text AS data_type,
            start_value::text AS start_value,
            increment::text AS increment
        FROM information_schema.sequences
        WHERE sequence_schema NOT IN ('pg_catalog', 'information_schema')
        ORDER BY sequence_schema, sequence_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut sequences = Vec::with_capacity(rows.len());
    for row in &rows {
        sequences.push(SequenceInfo {
            name: row.try_get("sequence_name")?,
            schema: row.try_get("sequence_schema")?,
            data_type: row.try_get("data_type").unwrap_or_default(),
            start_value: row.try_get("start_value").unwrap_or_default(),
            increment: row.try_get("increment").unwrap_or_default(),
        });
    }
    Ok(sequences)
}

fn partition_method(code: &str) -> Option<String> {
    let method = match code {
        "r" => "RANGE",
        "l" => "LIST",
        "h" => "HASH",
        _ => return None,
    };
    Some(method.to_string())
}

pub(crate) async fn get_partitions(pool: &PgPool, table: &str) -> Result<Vec<PartitionInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            cn.nspname::text AS schema_name,
            child.relname::text AS partition_name,
            pt.partstrat::text AS method,
            pg_get_expr(child.relpartbound, child.oid) AS bound,
            child.reltuples::bigint AS estimated_rows
        FROM pg_inherits i
        JOIN pg_class child ON child.oid = i.inhrelid
        JOIN pg_namespace cn ON cn.oid = child.relnamespace
        JOIN pg_partitioned_table pt ON pt.partrelid = i.inhparent
        WHERE i.inhparent = to_regclass($1)
        ORDER BY child.relname
        "#,
    )
    .bind(regclass_name(table))
    .fetch_all(pool)
    .await?;

    let mut partitions = Vec::with_capacity(rows.len());
    for row in &rows {
        let schema: String = row.try_get("schema_name")?;
        let name: String = row.try_get("partition_name")?;
        let method: String = row.try_get("method").unwrap_or_default();
        partitions.push(PartitionInfo {
            name: display_name(&schema, &name),
            method: partition_method(&method),
            description: row.try_get("bound").ok().flatten(),
            row_count: row
                .try_get::<Option<i64>, _>("estimated_rows")
                .ok()
                .flatten()
                .and_then(|n| u64::try_from(n).ok()),
        });
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    #[test]
    fn test_decode_trigger_type() {
        // ROW | BEFORE | INSERT | UPDATE
        assert_eq!(
            decode_trigger_type(1 | 2 | 4 | 16),
            ("BEFORE".to_string(), "INSERT OR UPDATE".to_string())
        );
        assert_eq!(
            decode_trigger_type(1 | 8),
            ("AFTER".to_string(), "DELETE".to_string())
        );
        assert_eq!(
            decode_trigger_type(1 | 64 | 4),
            ("INSTEAD OF".to_string(), "INSERT".to_string())
        );
        assert_eq!(decode_trigger_type(32).1, "TRUNCATE");
    }

    #[test]
    fn test_trigger_with_existing_function() {
        let trigger = TriggerDefinition {
            name: "audit".to_string(),
            table: "orders".to_string(),
            timing: "after".to_string(),
            event: "insert".to_string(),
            body: "EXECUTE FUNCTION log_change();".to_string(),
        };
        assert_eq!(
            create_trigger_statements(&trigger),
            vec!["CREATE TRIGGER \"audit\" AFTER INSERT ON \"orders\" FOR EACH ROW EXECUTE FUNCTION log_change()"]
        );
    }

    #[test]
    fn test_trigger_body_becomes_function() {
        let trigger = TriggerDefinition {
            name: "touch".to_string(),
            table: "sales.orders".to_string(),
            timing: "BEFORE".to_string(),
            event: "UPDATE".to_string(),
            body: "NEW.updated_at := now()".to_string(),
        };
        let statements = create_trigger_statements(&trigger);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with(
            "CREATE OR REPLACE FUNCTION \"sales\".\"touch_fn\"() RETURNS trigger LANGUAGE plpgsql"
        ));
        assert!(statements[0].contains("NEW.updated_at := now();\n  RETURN COALESCE(NEW, OLD);"));
        assert_eq!(
            statements[1],
            "CREATE TRIGGER \"touch\" BEFORE UPDATE ON \"sales\".\"orders\" FOR EACH ROW EXECUTE FUNCTION \"sales\".\"touch_fn\"()"
        );
    }

    #[test]
    fn test_create_user_statements() {
        let user = UserDefinition {
            name: "report".to_string(),
            password: Some(Secret::new("it's")),
            host: None,
            roles: vec!["readonly".to_string()],
        };
        assert_eq!(
            create_user_statements(&user),
            vec![
                "CREATE ROLE \"report\" WITH LOGIN PASSWORD 'it''s'".to_string(),
                "GRANT \"readonly\" TO \"report\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_partition_method_codes() {
        assert_eq!(partition_method("r").as_deref(), Some("RANGE"));
        assert_eq!(partition_method("h").as_deref(), Some("HASH"));
        assert_eq!(partition_method("x"), None);
    }
}
