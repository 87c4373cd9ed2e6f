//! Key writes for row mutations and pattern-wide drops.

use super::command::{json_text, render};
use super::keys;
use crate::error::{DbDeskError, Result};
use crate::models::{Row, SchemaOperationResult};
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use tracing::debug;

/// Keys deleted per `DEL` when dropping a pattern.
const DELETE_BATCH: usize = 500;

/// One command as argument strings, rendered for display and sent as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Command(pub(crate) Vec<String>);

impl Command {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    fn to_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::Cmd::new();
        for arg in &self.0 {
            cmd.arg(arg);
        }
        cmd
    }
}

fn rendered(commands: &[Command]) -> String {
    commands
        .iter()
        .map(|c| render(&c.0))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs commands atomically in one `MULTI`/`EXEC` round trip.
async fn run_atomic(conn: &mut MultiplexedConnection, commands: &[Command]) -> Result<()> {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in commands {
        pipe.add_command(command.to_cmd()).ignore();
    }
    let _: redis::Value = pipe.query_async(conn).await?;
    Ok(())
}

/// Elements of a collection value: a JSON array, JSON text of one, or a
/// single scalar.
fn elements(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            _ => vec![value.clone()],
        },
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn object(value: &Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// `(score, member)` pairs from `[{member, score}]` or `{member: score}`.
fn scored_members(value: &Value) -> Result<Vec<(String, String)>> {
    let invalid = || DbDeskError::query("A sorted set value needs members with numeric scores");
    let score_text = |score: &Value| match score {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if s.parse::<f64>().is_ok() => Ok(s.clone()),
        _ => Err(invalid()),
    };
    if let Some(map) = object(value) {
        return map
            .iter()
            .map(|(member, score)| Ok((score_text(score)?, member.clone())))
            .collect();
    }
    elements(value)
        .iter()
        .map(|item| match item {
            Value::Object(entry) => {
                let member = entry.get("member").map(json_text).ok_or_else(invalid)?;
                let score = entry.get("score").ok_or_else(invalid)?;
                Ok((score_text(score)?, member))
            }
            _ => Err(invalid()),
        })
        .collect()
}

/// Commands that write `value` to a fresh key of the given type.
///
/// # Errors
/// Returns a query error for an unknown type or an unusable value.
pub(crate) fn write_commands(key: &str, key_type: &str, value: &Value) -> Result<Vec<Command>> {
    let command = match key_type {
        "string" => Command::new(["SET", key, json_text(value).as_str()]),
        "list" | "set" => {
            let items = elements(value);
            if items.is_empty() {
                return Err(DbDeskError::query(format!("A {} needs at least one element", key_type)));
            }
            let verb = if key_type == "list" { "RPUSH" } else { "SADD" };
            let mut args = vec![verb.to_string(), key.to_string()];
            args.extend(items.iter().map(json_text));
            Command(args)
        }
        "zset" => {
            let members = scored_members(value)?;
            if members.is_empty() {
                return Err(DbDeskError::query("A zset needs at least one member"));
            }
            let mut args = vec!["ZADD".to_string(), key.to_string()];
            for (score, member) in members {
                args.push(score);
                args.push(member);
            }
            Command(args)
        }
        "hash" => {
            let fields = object(value)
                .filter(|map| !map.is_empty())
                .ok_or_else(|| DbDeskError::query("A hash value must be a non-empty object"))?;
            let mut args = vec!["HSET".to_string(), key.to_string()];
            for (field, value) in &fields {
                args.push(field.clone());
                args.push(json_text(value));
            }
            Command(args)
        }
        other => {
            return Err(DbDeskError::query(format!("Unsupported key type '{}'", other)));
        }
    };
    Ok(vec![command])
}

/// TTL seconds from a row field; absent, null or non-positive means none.
fn ttl_seconds(value: Option<&Value>) -> Option<i64> {
    let ttl = match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (ttl > 0).then_some(ttl)
}

fn key_of(row: &Row) -> Option<String> {
    row.get("key").map(json_text).filter(|k| !k.is_empty())
}

async fn exists(conn: &mut MultiplexedConnection, key: &str) -> Result<bool> {
    let count: i64 = redis::cmd("EXISTS").arg(key).query_async(conn).await?;
    Ok(count > 0)
}

/// Creates a key from a `{key, type, value, ttl}` row.
///
/// A bare-key table supplies the key when the row has none. Existing keys
/// are never overwritten.
pub(crate) async fn insert_row(conn: &mut MultiplexedConnection, table: &str, row: &Row) -> SchemaOperationResult {
    let key = match key_of(row) {
        Some(key) => key,
        None if !keys::is_pattern(table) => table.to_string(),
        None => return SchemaOperationResult::failed(String::new(), "A key is required"),
    };
    let key_type = row
        .get("type")
        .map(json_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "string".to_string())
        .to_ascii_lowercase();
    let value = row.get("value").cloned().unwrap_or(Value::Null);

    let mut commands = match write_commands(&key, &key_type, &value) {
        Ok(commands) => commands,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    if let Some(ttl) = ttl_seconds(row.get("ttl")) {
        commands.push(Command::new(["EXPIRE".to_string(), key.clone(), ttl.to_string()]));
    }
    let sql = rendered(&commands);

    match exists(conn, &key).await {
        Ok(true) => {
            return SchemaOperationResult::failed(sql, format!("Key '{}' already exists", key));
        }
        Ok(false) => {}
        Err(e) => return SchemaOperationResult::failed(sql, e),
    }
    match run_atomic(conn, &commands).await {
        Ok(()) => SchemaOperationResult::ok_with_rows(sql, 1),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Commands applying `changes` to an existing key.
///
/// `current_type` is the key's type and `pttl` its remaining lifetime in
/// milliseconds (negative for none). Rewriting a collection deletes and
/// recreates the key, so its expiry is restored unless `ttl` changes too.
pub(crate) fn update_commands(
    key: &str,
    current_type: &str,
    pttl: i64,
    changes: &Row,
) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    let key_type = changes
        .get("type")
        .map(json_text)
        .filter(|t| !t.is_empty())
        .map_or_else(|| current_type.to_string(), |t| t.to_ascii_lowercase());
    let ttl_change = changes.contains_key("ttl");

    if let Some(value) = changes.get("value") {
        if key_type == "string" && current_type == "string" {
            commands.push(Command::new(["SET", key, json_text(value).as_str(), "KEEPTTL"]));
        } else {
            commands.push(Command::new(["DEL", key]));
            commands.extend(write_commands(key, &key_type, value)?);
            if !ttl_change && pttl > 0 {
                commands.push(Command::new(["PEXPIRE".to_string(), key.to_string(), pttl.to_string()]));
            }
        }
    } else if key_type != current_type {
        return Err(DbDeskError::query("Changing the type requires a new value"));
    }

    if ttl_change {
        match ttl_seconds(changes.get("ttl")) {
            Some(ttl) => commands.push(Command::new(["EXPIRE".to_string(), key.to_string(), ttl.to_string()])),
            None => commands.push(Command::new(["PERSIST", key])),
        }
    }

    if let Some(new_key) = key_of(changes).filter(|k| k != key) {
        commands.push(Command::new(["RENAME".to_string(), key.to_string(), new_key]));
    }
    Ok(commands)
}

/// Type and remaining lifetime in milliseconds of a key.
async fn key_state(conn: &mut MultiplexedConnection, key: &str) -> Result<(String, i64)> {
    let key_type: String = redis::cmd("TYPE").arg(key).query_async(conn).await?;
    let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(conn).await?;
    Ok((key_type, pttl))
}

pub(crate) async fn update_row(
    conn: &mut MultiplexedConnection,
    table: &str,
    key_row: &Row,
    changes: &Row,
) -> SchemaOperationResult {
    let Some(key) = key_of(key_row).or_else(|| (!keys::is_pattern(table)).then(|| table.to_string())) else {
        return SchemaOperationResult::failed(String::new(), "A key is required");
    };
    let (current_type, pttl) = match key_state(conn, &key).await {
        Ok((key_type, _)) if key_type == "none" => {
            return SchemaOperationResult::failed(String::new(), format!("Key '{}' not found", key));
        }
        Ok(state) => state,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };

    let commands = match update_commands(&key, &current_type, pttl, changes) {
        Ok(commands) => commands,
        Err(e) => return SchemaOperationResult::failed(String::new(), e),
    };
    if commands.is_empty() {
        return SchemaOperationResult::ok_with_rows(String::new(), 0);
    }
    let sql = rendered(&commands);
    debug!("Redis update of {}: {}", key, sql);
    match run_atomic(conn, &commands).await {
        Ok(()) => SchemaOperationResult::ok_with_rows(sql, 1),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

pub(crate) async fn delete_row(conn: &mut MultiplexedConnection, table: &str, key_row: &Row) -> SchemaOperationResult {
    let Some(key) = key_of(key_row).or_else(|| (!keys::is_pattern(table)).then(|| table.to_string())) else {
        return SchemaOperationResult::failed(String::new(), "A key is required");
    };
    let sql = render(&["DEL".to_string(), key.clone()]);
    let deleted: redis::RedisResult<u64> = redis::cmd("DEL").arg(&key).query_async(conn).await;
    match deleted {
        Ok(count) => SchemaOperationResult::ok_with_rows(sql, count),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

/// Deletes every key matching the pattern, or the single key.
pub(crate) async fn drop_table(conn: &mut MultiplexedConnection, table: &str) -> SchemaOperationResult {
    let targets = if keys::is_pattern(table) {
        match keys::scan_keys(conn, table, None).await {
            Ok(targets) => targets,
            Err(e) => return SchemaOperationResult::failed(format!("SCAN 0 MATCH {}", table), e),
        }
    } else {
        vec![table.to_string()]
    };

    let mut deleted = 0;
    let mut statements = Vec::new();
    for batch in targets.chunks(DELETE_BATCH) {
        let mut args = vec!["DEL".to_string()];
        args.extend(batch.iter().cloned());
        statements.push(render(&args));
        let count: redis::RedisResult<u64> = Command(args).to_cmd().query_async(conn).await;
        match count {
            Ok(count) => deleted += count,
            Err(e) => return SchemaOperationResult::failed(statements.join("\n"), e),
        }
    }
    SchemaOperationResult::ok_with_rows(statements.join("\n"), deleted)
}

pub(crate) async fn rename_table(
    conn: &mut MultiplexedConnection,
    old_name: &str,
    new_name: &str,
) -> SchemaOperationResult {
    if keys::is_pattern(old_name) || keys::is_pattern(new_name) {
        return SchemaOperationResult::failed(String::new(), "Only single keys can be renamed");
    }
    let command = Command::new(["RENAME", old_name, new_name]);
    let sql = render(&command.0);
    let reply: redis::RedisResult<redis::Value> = command.to_cmd().query_async(conn).await;
    match reply {
        Ok(_) => SchemaOperationResult::ok(sql),
        Err(e) => SchemaOperationResult::failed(sql, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn lines(commands: &[Command]) -> Vec<String> {
        commands.iter().map(|c| render(&c.0)).collect()
    }

    #[test]
    fn test_write_commands_by_type() {
        let string = write_commands("greeting", "string", &json!("hello world")).unwrap();
        assert_eq!(lines(&string), vec![r#"SET greeting "hello world""#]);

        let list = write_commands("queue", "list", &json!(["a", "b"])).unwrap();
        assert_eq!(lines(&list), vec!["RPUSH queue a b"]);

        let set = write_commands("tags", "set", &json!(r#"["x", 1]"#)).unwrap();
        assert_eq!(lines(&set), vec!["SADD tags x 1"]);

        let zset = write_commands("board", "zset", &json!({ "alice": 12, "bob": "7.5" })).unwrap();
        assert_eq!(lines(&zset), vec!["ZADD board 12 alice 7.5 bob"]);

        let zset = write_commands("board", "zset", &json!([{ "member": "carol", "score": 3 }])).unwrap();
        assert_eq!(lines(&zset), vec!["ZADD board 3 carol"]);

        let hash = write_commands("user:1", "hash", &json!({ "age": 36, "name": "Ada" })).unwrap();
        assert_eq!(lines(&hash), vec!["HSET user:1 age 36 name Ada"]);
    }

    #[test]
    fn test_write_command_errors() {
        assert!(write_commands("k", "list", &json!([])).is_err());
        assert!(write_commands("k", "hash", &json!("plain")).is_err());
        assert!(write_commands("k", "zset", &json!({ "m": "high" })).is_err());
        assert_eq!(
            write_commands("k", "stream", &json!("x")).unwrap_err().to_string(),
            "Unsupported key type 'stream'"
        );
    }

    #[test]
    fn test_ttl_parsing() {
        assert_eq!(ttl_seconds(Some(&json!(60))), Some(60));
        assert_eq!(ttl_seconds(Some(&json!("30"))), Some(30));
        assert_eq!(ttl_seconds(Some(&json!(-1))), None);
        assert_eq!(ttl_seconds(Some(&Value::Null)), None);
        assert_eq!(ttl_seconds(None), None);
    }

    #[test]
    fn test_string_update_keeps_ttl() {
        let commands = update_commands("k", "string", 5000, &row(json!({ "value": "v2" }))).unwrap();
        assert_eq!(lines(&commands), vec!["SET k v2 KEEPTTL"]);
    }

    #[test]
    fn test_collection_update_restores_expiry() {
        let commands = update_commands("q", "list", 9000, &row(json!({ "value": ["x"] }))).unwrap();
        assert_eq!(lines(&commands), vec!["DEL q", "RPUSH q x", "PEXPIRE q 9000"]);

        let commands =
            update_commands("q", "list", 9000, &row(json!({ "value": ["x"], "ttl": null }))).unwrap();
        assert_eq!(lines(&commands), vec!["DEL q", "RPUSH q x", "PERSIST q"]);
    }

    #[test]
    fn test_ttl_and_key_changes() {
        let commands =
            update_commands("k", "hash", -1, &row(json!({ "ttl": 120, "key": "k2" }))).unwrap();
        assert_eq!(lines(&commands), vec!["EXPIRE k 120", "RENAME k k2"]);

        let commands = update_commands("k", "hash", -1, &row(json!({ "key": "k" }))).unwrap();
        assert!(commands.is_empty());

        assert!(update_commands("k", "hash", -1, &row(json!({ "type": "set" }))).is_err());
    }
}
