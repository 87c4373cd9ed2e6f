//! Raw command lines: tokenizing and reply shaping.

use crate::error::{DbDeskError, Result};
use crate::models::{QueryColumn, QueryResult, Row};
use serde_json::Value;

/// Commands whose array replies alternate field and value.
const PAIRED_COMMANDS: &[&str] = &["HGETALL", "CONFIG"];

/// Splits a command line into arguments.
///
/// Single and double quotes group words. Inside double quotes `\"`, `\\`,
/// `\n`, `\r` and `\t` are escapes; single quotes are literal.
///
/// # Errors
/// Returns a query error for an unterminated quote or an empty line.
pub(crate) fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut token = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            match c {
                '"' => loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => token.push('\n'),
                            Some('r') => token.push('\r'),
                            Some('t') => token.push('\t'),
                            Some(other) => token.push(other),
                            None => return Err(unterminated()),
                        },
                        Some(other) => token.push(other),
                        None => return Err(unterminated()),
                    }
                },
                '\'' => loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => token.push(other),
                        None => return Err(unterminated()),
                    }
                },
                other => token.push(other),
            }
        }
        tokens.push(token);
    }

    if tokens.is_empty() {
        return Err(DbDeskError::query("Empty Redis command"));
    }
    Ok(tokens)
}

fn unterminated() -> DbDeskError {
    DbDeskError::query("Unterminated quoted argument")
}

/// Renders arguments as a command line, quoting where needed.
pub(crate) fn render(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
                arg.clone()
            } else {
                Value::String(arg.clone()).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Converts a reply to plain JSON.
pub(crate) fn reply_to_json(reply: &redis::Value) -> Value {
    match reply {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(n) => Value::from(*n),
        redis::Value::BulkString(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(text) => Value::String(text.clone()),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.iter().map(reply_to_json).collect())
        }
        redis::Value::Map(pairs) => Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (json_text(&reply_to_json(k)), reply_to_json(v)))
                .collect(),
        ),
        redis::Value::Double(f) => serde_json::Number::from_f64(*f)
            .map_or_else(|| Value::String(f.to_string()), Value::Number),
        redis::Value::Boolean(b) => Value::Bool(*b),
        redis::Value::VerbatimString { text, .. } => Value::String(text.clone()),
        other => Value::String(format!("{:?}", other)),
    }
}

/// Text form of a JSON value; strings are not quoted.
pub(crate) fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_f64() => "Double",
        Value::Number(_) => "Integer",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn single(name: &str, value: Value) -> QueryResult {
    let mut row = Row::new();
    let column = QueryColumn::new(name, json_type(&value));
    row.insert(name.to_string(), value);
    QueryResult::with_rows(vec![column], vec![row])
}

fn is_paired(args: &[String]) -> bool {
    let Some(name) = args.first() else {
        return false;
    };
    PAIRED_COMMANDS.iter().any(|c| name.eq_ignore_ascii_case(c))
        || args.iter().skip(1).any(|a| a.eq_ignore_ascii_case("WITHSCORES"))
}

/// Shapes a reply as rows according to the command that produced it.
pub(crate) fn format_reply(args: &[String], reply: &redis::Value) -> QueryResult {
    let items = match reply {
        redis::Value::Nil => return single("result", Value::String("(nil)".to_string())),
        redis::Value::Array(items) | redis::Value::Set(items) => items,
        redis::Value::Map(_) => return single("result", Value::String(reply_to_json(reply).to_string())),
        other => return single("result", reply_to_json(other)),
    };
    if items.is_empty() {
        return single("result", Value::String("(empty list or set)".to_string()));
    }

    if is_paired(args) && items.len() % 2 == 0 {
        let rows = items
            .chunks(2)
            .map(|pair| {
                let mut row = Row::new();
                row.insert("field".to_string(), Value::String(json_text(&reply_to_json(&pair[0]))));
                row.insert("value".to_string(), reply_to_json(&pair[1]));
                row
            })
            .collect();
        return QueryResult::with_rows(
            vec![QueryColumn::new("field", "String"), QueryColumn::new("value", "String")],
            rows,
        );
    }

    let rows = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut row = Row::new();
            row.insert("index".to_string(), Value::from(i + 1));
            row.insert("value".to_string(), reply_to_json(item));
            row
        })
        .collect();
    QueryResult::with_rows(
        vec![QueryColumn::new("index", "Integer"), QueryColumn::new("value", "String")],
        rows,
    )
}
