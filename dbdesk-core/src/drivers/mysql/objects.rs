//! MySQL server objects beyond tables: routines, triggers, users, events,
//! character sets, collations and partitions.

use super::mutation::run_ddl;
use super::values::text_at;
use crate::error::{DbDeskError, Result};
use crate::models::{
    EventInfo, PartitionInfo, RoutineInfo, RoutineKind, SchemaOperationResult, TriggerDefinition,
    TriggerInfo, UserDefinition, UserInfo,
};
use crate::sql::{Dialect, leading_keyword};
use sqlx::{MySqlPool, Row};

const DIALECT: Dialect = Dialect::MySql;

/// Host used when a user definition names none.
const ANY_HOST: &str = "%";

pub(crate) async fn get_routines(pool: &MySqlPool) -> Result<Vec<RoutineInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(ROUTINE_NAME AS CHAR) AS ROUTINE_NAME,
            CAST(ROUTINE_TYPE AS CHAR) AS ROUTINE_TYPE,
            CAST(ROUTINE_SCHEMA AS CHAR) AS ROUTINE_SCHEMA,
            CAST(DTD_IDENTIFIER AS CHAR) AS RETURN_TYPE
        FROM INFORMATION_SCHEMA.ROUTINES
        WHERE ROUTINE_SCHEMA = DATABASE()
        ORDER BY ROUTINE_TYPE, ROUTINE_NAME
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut routines = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.try_get("ROUTINE_TYPE").unwrap_or_default();
        routines.push(RoutineInfo {
            name: row.try_get("ROUTINE_NAME")?,
            kind: if kind.eq_ignore_ascii_case("FUNCTION") {
                RoutineKind::Function
            } else {
                RoutineKind::Procedure
            },
            schema: row.try_get("ROUTINE_SCHEMA").ok(),
            return_type: row.try_get("RETURN_TYPE").ok().flatten(),
            arguments: None,
        });
    }
    Ok(routines)
}

/// `SHOW CREATE PROCEDURE|FUNCTION`; the statement is in the third column.
pub(crate) async fn get_routine_definition(
    pool: &MySqlPool,
    name: &str,
    kind: RoutineKind,
) -> Result<String> {
    let sql = format!("SHOW CREATE {} {}", kind.as_sql(), DIALECT.quote_ident(name));
    let row = sqlx::query(&sql).fetch_one(pool).await?;
    text_at(&row, 2).ok_or_else(|| {
        DbDeskError::query(format!(
            "No definition visible for {} {}; the SHOW_ROUTINE privilege may be missing",
            kind.as_sql().to_ascii_lowercase(),
            name
        ))
    })
}

pub(crate) async fn drop_routine(
    pool: &MySqlPool,
    name: &str,
    kind: RoutineKind,
) -> SchemaOperationResult {
    run_ddl(
        pool,
        vec![format!("DROP {} IF EXISTS {}", kind.as_sql(), DIALECT.quote_ident(name))],
    )
    .await
}

pub(crate) async fn get_triggers(pool: &MySqlPool, table: Option<&str>) -> Result<Vec<TriggerInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(TRIGGER_NAME AS CHAR) AS TRIGGER_NAME,
            CAST(EVENT_OBJECT_TABLE AS CHAR) AS EVENT_OBJECT_TABLE,
            CAST(ACTION_TIMING AS CHAR) AS ACTION_TIMING,
            CAST(EVENT_MANIPULATION AS CHAR) AS EVENT_MANIPULATION,
            CAST(ACTION_STATEMENT AS CHAR) AS ACTION_STATEMENT
        FROM INFORMATION_SCHEMA.TRIGGERS
        WHERE TRIGGER_SCHEMA = DATABASE() AND (? IS NULL OR EVENT_OBJECT_TABLE = ?)
        ORDER BY EVENT_OBJECT_TABLE, TRIGGER_NAME
        "#,
    )
    .bind(table)
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut triggers = Vec::with_capacity(rows.len());
    for row in &rows {
        triggers.push(TriggerInfo {
            name: row.try_get("TRIGGER_NAME")?,
            table: row.try_get("EVENT_OBJECT_TABLE")?,
            timing: row.try_get("ACTION_TIMING").unwrap_or_default(),
            event: row.try_get("EVENT_MANIPULATION").unwrap_or_default(),
            definition: row.try_get("ACTION_STATEMENT").ok(),
        });
    }
    Ok(triggers)
}

/// Renders `CREATE TRIGGER`, wrapping a bare body in `BEGIN ... END`.
pub(crate) fn create_trigger_sql(trigger: &TriggerDefinition) -> String {
    let body = trigger.body.trim().trim_end_matches(';');
    let body = if leading_keyword(body) == "BEGIN" {
        body.to_string()
    } else {
        format!("BEGIN {}; END", body)
    };
    format!(
        "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW {}",
        DIALECT.quote_ident(&trigger.name),
        trigger.timing.to_ascii_uppercase(),
        trigger.event.to_ascii_uppercase(),
        DIALECT.quote_ident(&trigger.table),
        body
    )
}

pub(crate) async fn create_trigger(
    pool: &MySqlPool,
    trigger: &TriggerDefinition,
) -> SchemaOperationResult {
    run_ddl(pool, vec![create_trigger_sql(trigger)]).await
}

pub(crate) async fn drop_trigger(pool: &MySqlPool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP TRIGGER IF EXISTS {}", DIALECT.quote_ident(name))]).await
}

/// `'name'@'host'` account literal.
fn account(name: &str, host: Option<&str>) -> String {
    format!(
        "{}@{}",
        DIALECT.string_literal(name),
        DIALECT.string_literal(host.filter(|h| !h.is_empty()).unwrap_or(ANY_HOST))
    )
}

pub(crate) async fn get_users(pool: &MySqlPool) -> Result<Vec<UserInfo>> {
    let rows = sqlx::query(
        "SELECT CAST(User AS CHAR) AS USER_NAME, CAST(Host AS CHAR) AS HOST_NAME FROM mysql.user ORDER BY User, Host",
    )
    .fetch_all(pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in &rows {
        users.push(UserInfo {
            name: row.try_get("USER_NAME")?,
            host: row.try_get("HOST_NAME").ok(),
            roles: Vec::new(),
        });
    }
    Ok(users)
}

/// `CREATE USER` followed by one `GRANT` per role.
pub(crate) fn create_user_statements(user: &UserDefinition) -> Vec<String> {
    let account = account(&user.name, user.host.as_deref());
    let mut create = format!("CREATE USER {}", account);
    if let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) {
        create.push_str(&format!(" IDENTIFIED BY {}", DIALECT.string_literal(password.expose())));
    }
    let mut statements = vec![create];
    statements.extend(
        user.roles
            .iter()
            .filter(|r| !r.is_empty())
            .map(|role| format!("GRANT {} TO {}", DIALECT.quote_ident(role), account)),
    );
    statements
}

pub(crate) async fn create_user(pool: &MySqlPool, user: &UserDefinition) -> SchemaOperationResult {
    if user.name.is_empty() {
        return SchemaOperationResult::failed(String::new(), DbDeskError::query("A user name is required"));
    }
    let mut result = run_ddl(pool, create_user_statements(user)).await;
    // Keep the password out of the echoed statement
    if let Some(password) = user.password.as_ref().filter(|p| !p.is_empty()) {
        let literal = DIALECT.string_literal(password.expose());
        result.sql = result.sql.replace(&literal, "'****'");
    }
    result
}

pub(crate) async fn drop_user(pool: &MySqlPool, name: &str, host: Option<&str>) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP USER {}", account(name, host))]).await
}

/// Human-readable schedule of an event.
fn schedule(event_type: &str, execute_at: Option<String>, value: Option<String>, field: Option<String>) -> Option<String> {
    if event_type.eq_ignore_ascii_case("ONE TIME") {
        execute_at.map(|at| format!("AT {}", at))
    } else {
        match (value, field) {
            (Some(value), Some(field)) => Some(format!("EVERY {} {}", value, field)),
            _ => None,
        }
    }
}

pub(crate) async fn get_events(pool: &MySqlPool) -> Result<Vec<EventInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(EVENT_NAME AS CHAR) AS EVENT_NAME,
            CAST(EVENT_TYPE AS CHAR) AS EVENT_TYPE,
            CAST(EXECUTE_AT AS CHAR) AS EXECUTE_AT,
            CAST(INTERVAL_VALUE AS CHAR) AS INTERVAL_VALUE,
            CAST(INTERVAL_FIELD AS CHAR) AS INTERVAL_FIELD,
            CAST(STATUS AS CHAR) AS STATUS
        FROM INFORMATION_SCHEMA.EVENTS
        WHERE EVENT_SCHEMA = DATABASE()
        ORDER BY EVENT_NAME
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in &rows {
        let event_type: String = row.try_get("EVENT_TYPE").unwrap_or_default();
        events.push(EventInfo {
            name: row.try_get("EVENT_NAME")?,
            schedule: schedule(
                &event_type,
                row.try_get("EXECUTE_AT").ok().flatten(),
                row.try_get("INTERVAL_VALUE").ok().flatten(),
                row.try_get("INTERVAL_FIELD").ok().flatten(),
            ),
            status: row.try_get("STATUS").unwrap_or_default(),
            event_type,
        });
    }
    Ok(events)
}

pub(crate) async fn drop_event(pool: &MySqlPool, name: &str) -> SchemaOperationResult {
    run_ddl(pool, vec![format!("DROP EVENT IF EXISTS {}", DIALECT.quote_ident(name))]).await
}

pub(crate) async fn get_charsets(pool: &MySqlPool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT CAST(CHARACTER_SET_NAME AS CHAR) FROM INFORMATION_SCHEMA.CHARACTER_SETS ORDER BY CHARACTER_SET_NAME",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub(crate) async fn get_collations(pool: &MySqlPool, charset: Option<&str>) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT CAST(COLLATION_NAME AS CHAR)
        FROM INFORMATION_SCHEMA.COLLATIONS
        WHERE (? IS NULL OR CHARACTER_SET_NAME = ?)
        ORDER BY COLLATION_NAME
        "#,
    )
    .bind(charset)
    .bind(charset)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub(crate) async fn get_partitions(pool: &MySqlPool, table: &str) -> Result<Vec<PartitionInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(PARTITION_NAME AS CHAR) AS PARTITION_NAME,
            CAST(PARTITION_METHOD AS CHAR) AS PARTITION_METHOD,
            CAST(PARTITION_DESCRIPTION AS CHAR) AS PARTITION_DESCRIPTION,
            CAST(TABLE_ROWS AS SIGNED) AS TABLE_ROWS
        FROM INFORMATION_SCHEMA.PARTITIONS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND PARTITION_NAME IS NOT NULL
        ORDER BY PARTITION_ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut partitions = Vec::with_capacity(rows.len());
    for row in &rows {
        partitions.push(PartitionInfo {
            name: row.try_get("PARTITION_NAME")?,
            method: row.try_get("PARTITION_METHOD").ok().flatten(),
            description: row.try_get("PARTITION_DESCRIPTION").ok().flatten(),
            row_count: row
                .try_get::<Option<i64>, _>("TABLE_ROWS")
                .ok()
                .flatten()
                .and_then(|n| u64::try_from(n).ok()),
        });
    }
    Ok(partitions)
}
