//! Key scanning, grouping and row materialization.
//!
//! A "table" is a key pattern. Patterns are expanded with `SCAN`, the
//! resulting key list is filtered and paginated in memory, and only the
//! keys on the requested page have their TTL and value fetched.

use super::command::reply_to_json;
use crate::error::Result;
use crate::models::{
    ColumnInfo, DataOptions, Filter, FilterOperator, QueryColumn, Row, SortDirection, TableInfo,
};
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Keys collected per request.
pub(crate) const SCAN_LIMIT: usize = 1000;

/// Above this many keys, `get_tables` groups keys by prefix.
pub(crate) const GROUP_THRESHOLD: usize = 200;

/// Stream entries shown in the value column, newest first.
const STREAM_WINDOW: usize = 10;

const SCAN_COUNT: usize = 200;

/// Whether a table name is a glob pattern rather than a single key.
pub(crate) fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// Keys matching a pattern, sorted.
///
/// Stops once `limit` keys were collected; `None` scans the whole keyspace.
pub(crate) async fn scan_keys(
    conn: &mut MultiplexedConnection,
    pattern: &str,
    limit: Option<usize>,
) -> Result<Vec<String>> {
    let mut keys = BTreeSet::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        cursor = next;
        let full = limit.is_some_and(|limit| keys.len() >= limit);
        if cursor == 0 || full {
            break;
        }
    }
    let mut keys: Vec<String> = keys.into_iter().collect();
    if let Some(limit) = limit {
        keys.truncate(limit);
    }
    Ok(keys)
}

/// Types of several keys in one round trip.
pub(crate) async fn key_types(conn: &mut MultiplexedConnection, keys: &[String]) -> Result<Vec<String>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut pipe = redis::pipe();
    for key in keys {
        pipe.cmd("TYPE").arg(key);
    }
    let types: Vec<String> = pipe.query_async(conn).await?;
    Ok(types)
}

/// Lists keys as tables, grouping by the prefix before the first `:` when
/// there are more than [`GROUP_THRESHOLD`] keys.
pub(crate) fn group_keys(keys: &[String]) -> Vec<TableInfo> {
    if keys.len() <= GROUP_THRESHOLD {
        return keys.iter().map(TableInfo::table).collect();
    }
    let mut groups: BTreeMap<String, u64> = BTreeMap::new();
    let mut singles = Vec::new();
    for key in keys {
        match key.split_once(':') {
            Some((prefix, _)) => *groups.entry(format!("{}:*", prefix)).or_default() += 1,
            None => singles.push(TableInfo::table(key)),
        }
    }
    let mut tables: Vec<TableInfo> = groups
        .into_iter()
        .map(|(pattern, count)| TableInfo {
            row_count: Some(count),
            ..TableInfo::table(pattern)
        })
        .chain(singles)
        .collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    tables
}

/// The fixed projection every key pattern exposes.
pub(crate) fn columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo {
            name: "key".to_string(),
            data_type: "String".to_string(),
            primary_key: true,
            unique: true,
            ..Default::default()
        },
        ColumnInfo {
            name: "type".to_string(),
            data_type: "String".to_string(),
            ..Default::default()
        },
        ColumnInfo {
            name: "ttl".to_string(),
            data_type: "Integer".to_string(),
            nullable: true,
            comment: Some("Seconds to expiry; empty means no expiry".to_string()),
            ..Default::default()
        },
        ColumnInfo {
            name: "value".to_string(),
            data_type: "String".to_string(),
            nullable: true,
            ..Default::default()
        },
    ]
}

pub(crate) fn query_columns() -> Vec<QueryColumn> {
    columns()
        .into_iter()
        .map(|c| QueryColumn {
            name: c.name,
            data_type: c.data_type,
            primary_key: c.primary_key,
        })
        .collect()
}

/// TTL as reported to callers: negative replies mean no expiry.
pub(crate) fn ttl_value(ttl: i64) -> Value {
    if ttl < 0 { Value::Null } else { Value::from(ttl) }
}

/// Case-insensitive `%`/`_` wildcard match.
pub(crate) fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();
    // matched[j]: pattern[..i] matches text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut any = false;
                for j in 0..=text.len() {
                    any |= matched[j];
                    next[j] = any;
                }
            }
            _ => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && (*p == '_' || *p == text[j - 1]);
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

fn filter_text(filter: &Filter) -> Option<String> {
    filter.value.as_ref().map(super::command::json_text)
}

/// Whether a key passes a filter on the `key` or `type` column.
///
/// Filters on other columns are not evaluated and always pass.
pub(crate) fn passes(filter: &Filter, key: &str, key_type: &str) -> bool {
    let subject = match filter.column.as_str() {
        "key" => key,
        "type" => key_type,
        _ => return true,
    };
    let text = || filter_text(filter).unwrap_or_default();
    let list = || match filter.value.as_ref() {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(super::command::json_text)
                .collect::<Vec<_>>(),
        ),
        _ => None,
    };
    match filter.operator {
        FilterOperator::Equal => subject == text(),
        FilterOperator::NotEqual => subject != text(),
        FilterOperator::GreaterThan => subject > text().as_str(),
        FilterOperator::LessThan => subject < text().as_str(),
        FilterOperator::GreaterOrEqual => subject >= text().as_str(),
        FilterOperator::LessOrEqual => subject <= text().as_str(),
        FilterOperator::Like => like_matches(&text(), subject),
        FilterOperator::NotLike => !like_matches(&text(), subject),
        FilterOperator::In => list().is_none_or(|items| items.iter().any(|i| i == subject)),
        FilterOperator::NotIn => list().is_none_or(|items| !items.iter().any(|i| i == subject)),
        FilterOperator::IsNull => false,
        FilterOperator::IsNotNull => true,
    }
}

/// Filters, sorts and pages `(key, type)` pairs.
pub(crate) fn select_page(
    mut entries: Vec<(String, String)>,
    options: &DataOptions,
    default_limit: u64,
) -> Vec<(String, String)> {
    entries.retain(|(key, key_type)| options.filters.iter().all(|f| passes(f, key, key_type)));
    if options.sort_column.as_deref() == Some("type") {
        entries.sort_by(|a, b| (&a.1, &a.0).cmp(&(&b.1, &b.0)));
    } else {
        entries.sort();
    }
    if options.sort_column.is_some() && options.sort_direction == SortDirection::Desc {
        entries.reverse();
    }
    let offset = usize::try_from(options.offset_or_zero()).unwrap_or(usize::MAX);
    let limit = usize::try_from(options.limit_or(default_limit)).unwrap_or(usize::MAX);
    entries.into_iter().skip(offset).take(limit).collect()
}

fn text_list(items: Vec<Vec<u8>>) -> Vec<Value> {
    items
        .into_iter()
        .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        .collect()
}

/// Stream entries `[id, [field, value, ...]]` as `{id, fields}` objects.
pub(crate) fn stream_entries(reply: &redis::Value) -> Value {
    let Value::Array(entries) = reply_to_json(reply) else {
        return Value::Array(Vec::new());
    };
    let entries = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Array(mut parts) if parts.len() == 2 => {
                let fields = match parts.pop() {
                    Some(Value::Array(flat)) => flat
                        .chunks(2)
                        .filter_map(|pair| match pair {
                            [field, value] => Some((super::command::json_text(field), value.clone())),
                            _ => None,
                        })
                        .collect(),
                    _ => serde_json::Map::new(),
                };
                let id = parts.pop().unwrap_or(Value::Null);
                Some(serde_json::json!({ "id": id, "fields": fields }))
            }
            _ => None,
        })
        .collect();
    Value::Array(entries)
}

/// Serialized value of a key according to its type.
pub(crate) async fn fetch_value(
    conn: &mut MultiplexedConnection,
    key: &str,
    key_type: &str,
) -> Result<Value> {
    let serialized = match key_type {
        "none" => return Ok(Value::Null),
        "string" => {
            let bytes: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(conn).await?;
            return Ok(bytes.map_or(Value::Null, |b| {
                Value::String(String::from_utf8_lossy(&b).into_owned())
            }));
        }
        "list" => {
            let items: Vec<Vec<u8>> = redis::cmd("LRANGE").arg(key).arg(0).arg(-1).query_async(conn).await?;
            Value::Array(text_list(items))
        }
        "set" => {
            let mut items: Vec<Vec<u8>> = redis::cmd("SMEMBERS").arg(key).query_async(conn).await?;
            items.sort();
            Value::Array(text_list(items))
        }
        "zset" => {
            let items: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(conn)
                .await?;
            Value::Array(
                items
                    .into_iter()
                    .map(|(member, score)| serde_json::json!({ "member": member, "score": score }))
                    .collect(),
            )
        }
        "hash" => {
            let pairs: Vec<(String, String)> = redis::cmd("HGETALL").arg(key).query_async(conn).await?;
            Value::Object(
                pairs
                    .into_iter()
                    .map(|(field, value)| (field, Value::String(value)))
                    .collect(),
            )
        }
        "stream" => {
            let reply: redis::Value = redis::cmd("XREVRANGE")
                .arg(key)
                .arg("+")
                .arg("-")
                .arg("COUNT")
                .arg(STREAM_WINDOW)
                .query_async(conn)
                .await?;
            stream_entries(&reply)
        }
        other => return Ok(Value::String(format!("[{}]", other))),
    };
    Ok(Value::String(serialized.to_string()))
}

/// Builds result rows for `(key, type)` pairs.
pub(crate) async fn fetch_rows(
    conn: &mut MultiplexedConnection,
    entries: &[(String, String)],
) -> Result<Vec<Row>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    let mut pipe = redis::pipe();
    for (key, _) in entries {
        pipe.cmd("TTL").arg(key);
    }
    let ttls: Vec<i64> = pipe.query_async(conn).await?;

    let mut rows = Vec::with_capacity(entries.len());
    for ((key, key_type), ttl) in entries.iter().zip(ttls) {
        let mut row = Row::new();
        row.insert("key".to_string(), Value::String(key.clone()));
        row.insert("type".to_string(), Value::String(key_type.clone()));
        row.insert("ttl".to_string(), ttl_value(ttl));
        row.insert("value".to_string(), fetch_value(conn, key, key_type).await?);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_small_keyspaces_are_listed_individually() {
        let tables = group_keys(&keys(&["user:1", "user:2", "config"]));
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["user:1", "user:2", "config"]);
    }

    #[test]
    fn test_large_keyspaces_are_grouped() {
        let mut names: Vec<String> = (0..250).map(|i| format!("session:{}", i)).collect();
        names.extend((0..10).map(|i| format!("user:{}:profile", i)));
        names.push("counter".to_string());
        let tables = group_keys(&names);
        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].name, "counter");
        assert_eq!(tables[0].row_count, None);
        assert_eq!(tables[1].name, "session:*");
        assert_eq!(tables[1].row_count, Some(250));
        assert_eq!(tables[2].name, "user:*");
        assert_eq!(tables[2].row_count, Some(10));
    }

    #[test]
    fn test_fixed_projection() {
        let columns = columns();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["key", "type", "ttl", "value"]);
        assert!(columns[0].primary_key);
        assert!(columns[2].nullable);
        assert!(columns[3].nullable);
    }

    #[test]
    fn test_negative_ttl_means_no_expiry() {
        assert_eq!(ttl_value(-1), Value::Null);
        assert_eq!(ttl_value(-2), Value::Null);
        assert_eq!(ttl_value(30), json!(30));
    }

    #[test]
    fn test_patterns() {
        assert!(is_pattern("user:*"));
        assert!(is_pattern("user:?"));
        assert!(is_pattern("user:[ab]"));
        assert!(!is_pattern("user:1"));
    }

    #[test]
    fn test_like_matching() {
        assert!(like_matches("user:%", "USER:42"));
        assert!(like_matches("a_c", "abc"));
        assert!(!like_matches("a_c", "abbc"));
        assert!(like_matches("%", ""));
        assert!(!like_matches("x%", ""));
    }

    #[test]
    fn test_page_is_filtered_sorted_and_sliced_in_memory() {
        let entries: Vec<(String, String)> = (0..5)
            .map(|i| (format!("k{}", i), if i % 2 == 0 { "string" } else { "hash" }.to_string()))
            .collect();

        let options = DataOptions {
            filters: vec![Filter::new("type", FilterOperator::Equal, Some(json!("string")))],
            sort_column: Some("key".to_string()),
            sort_direction: SortDirection::Desc,
            limit: Some(2),
            offset: Some(1),
        };
        let page = select_page(entries.clone(), &options, 100);
        let names: Vec<_> = page.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["k2", "k0"]);

        let options = DataOptions {
            filters: vec![
                Filter::new("key", FilterOperator::In, Some(json!(["k1", "k3"]))),
                Filter::new("value", FilterOperator::Equal, Some(json!("ignored"))),
            ],
            ..Default::default()
        };
        let page = select_page(entries, &options, 100);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_stream_entries() {
        let bulk = |s: &str| redis::Value::BulkString(s.as_bytes().to_vec());
        let reply = redis::Value::Array(vec![redis::Value::Array(vec![
            bulk("1700000000000-0"),
            redis::Value::Array(vec![bulk("temp"), bulk("21.5")]),
        ])]);
        assert_eq!(
            stream_entries(&reply),
            json!([{ "id": "1700000000000-0", "fields": { "temp": "21.5" } }])
        );
    }
}
