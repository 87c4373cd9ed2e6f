//! Parser for shell-style commands such as `db.users.find({age: {$gt: 18}})`.
//!
//! Accepted forms:
//! - `db.<collection>.<method>(<args>)`
//! - `db.getCollection("<collection>").<method>(<args>)`
//! - `db.<method>(<args>)` for the database-level methods
//! - cursor modifiers `.sort(doc)`, `.limit(n)`, `.skip(n)` after `find`
//!   or `aggregate`
//!
//! Arguments are read as a JSON array. Strict JSON is tried first, then the
//! relaxed shell syntax (unquoted keys, single quotes, `ObjectId(...)`,
//! `ISODate(...)`, `NumberLong(...)`) is rewritten to extended JSON.

use super::values;
use crate::error::{DbDeskError, Result};
use mongodb::bson::{Bson, Document};
use serde_json::Value;

/// Methods the parser accepts. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Find,
    FindOne,
    Aggregate,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    CountDocuments,
    Distinct,
    CreateIndex,
    DropIndex,
    Drop,
    /// `db.getCollectionNames()`
    GetCollectionNames,
    /// `db.stats()`
    Stats,
}

impl Method {
    fn collection_method(name: &str) -> Option<Self> {
        Some(match name {
            "find" => Self::Find,
            "findOne" => Self::FindOne,
            "aggregate" => Self::Aggregate,
            "insertOne" => Self::InsertOne,
            "insertMany" => Self::InsertMany,
            "updateOne" => Self::UpdateOne,
            "updateMany" => Self::UpdateMany,
            "deleteOne" => Self::DeleteOne,
            "deleteMany" => Self::DeleteMany,
            "countDocuments" => Self::CountDocuments,
            "distinct" => Self::Distinct,
            "createIndex" => Self::CreateIndex,
            "dropIndex" => Self::DropIndex,
            "drop" => Self::Drop,
            _ => return None,
        })
    }

    fn database_method(name: &str) -> Option<Self> {
        match name {
            "getCollectionNames" => Some(Self::GetCollectionNames),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }

    /// Whether the method yields a cursor that accepts modifiers.
    pub(crate) fn returns_cursor(self) -> bool {
        matches!(self, Self::Find | Self::Aggregate)
    }
}

/// Modifiers chained after a cursor-returning method.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CursorModifiers {
    pub(crate) sort: Option<Document>,
    pub(crate) limit: Option<i64>,
    pub(crate) skip: Option<u64>,
}

impl CursorModifiers {
    fn is_empty(&self) -> bool {
        self.sort.is_none() && self.limit.is_none() && self.skip.is_none()
    }
}

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShellCommand {
    /// Target collection; `None` for database-level methods
    pub(crate) collection: Option<String>,
    pub(crate) method: Method,
    pub(crate) args: Vec<Bson>,
    pub(crate) modifiers: CursorModifiers,
}

fn invalid() -> DbDeskError {
    DbDeskError::query("Invalid MongoDB query: expected db.<collection>.<method>(...)")
}

/// Parses a shell command.
///
/// # Errors
/// Returns a query error for input that is not command-shaped, an unknown
/// method, or arguments that cannot be parsed.
pub(crate) fn parse(input: &str) -> Result<ShellCommand> {
    let text = input.trim().trim_end_matches(';').trim_end();
    let rest = text.strip_prefix("db.").ok_or_else(invalid)?;
    let (head, args_text, tail) = split_call(rest).ok_or_else(invalid)?;

    let (collection, method_name, args_text, tail) = if head == "getCollection" {
        let name = match parse_arguments(args_text)?.as_slice() {
            [Bson::String(name)] if !name.is_empty() => name.clone(),
            _ => return Err(invalid()),
        };
        let after = tail.trim_start().strip_prefix('.').ok_or_else(invalid)?;
        let (method, args, tail) = split_call(after).ok_or_else(invalid)?;
        (Some(name), method, args, tail)
    } else if let Some((collection, method)) = head.rsplit_once('.') {
        if collection.is_empty() {
            return Err(invalid());
        }
        (Some(collection.to_string()), method, args_text, tail)
    } else {
        (None, head, args_text, tail)
    };

    let method_name = method_name.trim();
    if method_name.is_empty() || !method_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }
    let method = match collection {
        Some(_) => Method::collection_method(method_name),
        None => Method::database_method(method_name),
    }
    .ok_or_else(|| DbDeskError::query(format!("Unsupported MongoDB method: {}", method_name)))?;

    let args = parse_arguments(args_text)?;
    let modifiers = parse_modifiers(tail)?;
    if !modifiers.is_empty() && !method.returns_cursor() {
        return Err(DbDeskError::query(format!(
            "Cursor modifiers cannot follow {}",
            method_name
        )));
    }

    Ok(ShellCommand {
        collection,
        method,
        args,
        modifiers,
    })
}

/// Splits `name(args)rest` at the call's matching parenthesis.
fn split_call(text: &str) -> Option<(&str, &str, &str)> {
    let open = text.find('(')?;
    let close = matching_close(text, open)?;
    Some((&text[..open], &text[open + 1..close], &text[close + 1..]))
}

/// Byte index of the bracket closing the one at `open`.
///
/// Brackets inside quoted strings are ignored.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (index, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_modifiers(mut tail: &str) -> Result<CursorModifiers> {
    let mut modifiers = CursorModifiers::default();
    loop {
        tail = tail.trim_start();
        if tail.is_empty() {
            return Ok(modifiers);
        }
        let after = tail.strip_prefix('.').ok_or_else(invalid)?;
        let (name, args_text, rest) = split_call(after).ok_or_else(invalid)?;
        let args = parse_arguments(args_text)?;
        match name.trim() {
            "sort" => match args.into_iter().next() {
                Some(Bson::Document(doc)) => modifiers.sort = Some(doc),
                _ => return Err(DbDeskError::query("sort() expects a document")),
            },
            "limit" => {
                let limit = integer_arg(&args, "limit")?;
                modifiers.limit = Some(limit);
            }
            "skip" => {
                let skip = integer_arg(&args, "skip")?;
                modifiers.skip = Some(u64::try_from(skip).unwrap_or(0));
            }
            "toArray" | "pretty" => {}
            other => {
                return Err(DbDeskError::query(format!(
                    "Unsupported cursor method: {}",
                    other
                )));
            }
        }
        tail = rest;
    }
}

fn integer_arg(args: &[Bson], name: &str) -> Result<i64> {
    match args.first() {
        Some(Bson::Int32(n)) => Ok(i64::from(*n)),
        Some(Bson::Int64(n)) => Ok(*n),
        Some(Bson::Double(f)) if f.fract() == 0.0 => Ok(*f as i64),
        _ => Err(DbDeskError::query(format!("{}() expects an integer", name))),
    }
}

/// Parses call arguments into BSON values.
///
/// # Errors
/// Returns "Failed to parse arguments" when neither strict nor relaxed
/// parsing succeeds.
pub(crate) fn parse_arguments(text: &str) -> Result<Vec<Bson>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let values = json_arguments(trimmed)
        .or_else(|| json_arguments(&normalize_relaxed(trimmed)))
        .ok_or_else(|| DbDeskError::query("Failed to parse arguments"))?;
    values
        .into_iter()
        .map(|value| {
            values::from_extended_json(value)
                .map_err(|e| DbDeskError::query(format!("Failed to parse arguments: {}", e)))
        })
        .collect()
}

/// Reads `text` as an argument list, falling back to a single value.
fn json_arguments(text: &str) -> Option<Vec<Value>> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{}]", text)) {
        return Some(items);
    }
    serde_json::from_str::<Value>(text).ok().map(|v| vec![v])
}

/// Shell constructors rewritten to extended JSON.
#[derive(Debug, Clone, Copy)]
enum Constructor {
    ObjectId,
    Date,
    NumberLong,
    NumberInt,
    NumberDecimal,
}

impl Constructor {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ObjectId" => Some(Self::ObjectId),
            "ISODate" | "Date" => Some(Self::Date),
            "NumberLong" => Some(Self::NumberLong),
            "NumberInt" => Some(Self::NumberInt),
            "NumberDecimal" => Some(Self::NumberDecimal),
            _ => None,
        }
    }

    fn render(self, argument: &str) -> String {
        let wrap = |key: &str, value: &str| format!("{{{}:{}}}", json_string(key), json_string(value));
        match self {
            Self::ObjectId => wrap("$oid", argument),
            Self::NumberLong => wrap("$numberLong", argument),
            Self::NumberInt => wrap("$numberInt", argument),
            Self::NumberDecimal => wrap("$numberDecimal", argument),
            Self::Date if argument.is_empty() => wrap("$date", &chrono::Utc::now().to_rfc3339()),
            Self::Date if argument.bytes().all(|b| b.is_ascii_digit()) => {
                format!("{{\"$date\":{}}}", wrap("$numberLong", argument))
            }
            Self::Date if argument.len() == 10 => wrap("$date", &format!("{}T00:00:00Z", argument)),
            Self::Date => wrap("$date", argument),
        }
    }
}

fn json_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Reads a quoted string starting at `start`; returns its text and the index
/// after the closing quote.
fn read_quoted(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while let Some(&c) = chars.get(i) {
        i += 1;
        match c {
            '\\' => {
                let Some(&next) = chars.get(i) else { break };
                i += 1;
                match next {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    'u' => {
                        let hex: String = chars.iter().skip(i).take(4).collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(decoded) if hex.len() == 4 => {
                                text.push(decoded);
                                i += 4;
                            }
                            _ => text.push('u'),
                        }
                    }
                    other => text.push(other),
                }
            }
            c if c == quote => return (text, i),
            c => text.push(c),
        }
    }
    (text, i)
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    i
}

/// Rewrites relaxed shell syntax as extended JSON text.
pub(crate) fn normalize_relaxed(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        if c == '"' || c == '\'' {
            let (text, next) = read_quoted(&chars, i);
            out.push_str(&json_string(&text));
            i = next;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while chars
                .get(i)
                .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
            {
                i += 1;
            }
            out.extend(&chars[start..i]);
        } else if is_ident_start(c) {
            let start = i;
            while chars.get(i).is_some_and(|c| is_ident_part(*c)) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let after = skip_whitespace(&chars, i);
            match chars.get(after) {
                Some(':') => out.push_str(&json_string(&word)),
                Some('(') if Constructor::from_name(&word).is_some() => {
                    let rest: String = chars[after..].iter().collect();
                    let Some(close) = matching_close(&rest, 0) else {
                        out.push_str(&word);
                        continue;
                    };
                    let inner = rest[1..close].trim();
                    let argument = match inner.chars().next() {
                        Some('"' | '\'') => {
                            let inner_chars: Vec<char> = inner.chars().collect();
                            read_quoted(&inner_chars, 0).0
                        }
                        _ => inner.to_string(),
                    };
                    if let Some(constructor) = Constructor::from_name(&word) {
                        out.push_str(&constructor.render(&argument));
                    }
                    i = after + rest[..=close].chars().count();
                }
                _ if word == "new" => {}
                _ => out.push_str(&word),
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}
