//! SQL helpers shared by the relational and analytical drivers.
//!
//! - `splitter`: quote- and comment-aware multi-statement splitting
//! - `filter`: `Filter` lists to WHERE fragments with bound parameters
//! - `ddl`: dialect-specific column, index, foreign key and view statements

pub mod ddl;
pub mod dml;
pub mod filter;
pub mod splitter;

pub use filter::{WhereClause, build_where_clause, order_and_page};
pub use splitter::split_statements;

use serde_json::Value;
use std::collections::HashMap;

/// SQL flavour spoken by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded engine, double-quoted identifiers, `?` placeholders
    Sqlite,
    /// Backtick identifiers, `?` placeholders
    MySql,
    /// Double-quoted identifiers, `$n` placeholders, `schema.table` names
    Postgres,
    /// Backtick identifiers, inlined literals
    ClickHouse,
}

impl Dialect {
    fn quote_char(self) -> char {
        match self {
            Self::Sqlite | Self::Postgres => '"',
            Self::MySql | Self::ClickHouse => '`',
        }
    }

    /// Quotes a single identifier, doubling any embedded quote character.
    pub fn quote_ident(self, name: &str) -> String {
        let q = self.quote_char();
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(q);
        for c in name.chars() {
            if c == q {
                quoted.push(q);
            }
            quoted.push(c);
        }
        quoted.push(q);
        quoted
    }

    /// Quotes a table name.
    ///
    /// PostgreSQL accepts `schema.table` and quotes each part separately;
    /// every other dialect treats the whole name as one identifier.
    pub fn quote_table(self, name: &str) -> String {
        match self {
            Self::Postgres => match name.split_once('.') {
                Some((schema, table)) => {
                    format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
                }
                None => self.quote_ident(name),
            },
            _ => self.quote_ident(name),
        }
    }

    /// Renders a JSON value as an inline SQL literal.
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self {
                Self::Sqlite => if *b { "1" } else { "0" }.to_string(),
                _ => if *b { "TRUE" } else { "FALSE" }.to_string(),
            },
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.string_literal(s),
            Value::Array(_) | Value::Object(_) => self.string_literal(&value.to_string()),
        }
    }

    /// Quotes a string literal for this dialect.
    pub fn string_literal(self, s: &str) -> String {
        match self {
            Self::MySql | Self::ClickHouse => {
                format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            Self::Sqlite | Self::Postgres => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

/// Allocates placeholders for values in dialect order.
///
/// SQLite and MySQL bind values by JSON type behind `?`. PostgreSQL binds
/// every value as text behind `$n`, cast to the column's declared type when
/// it is known. ClickHouse gets inline literals.
pub(crate) struct Binder<'a> {
    dialect: Dialect,
    column_types: &'a HashMap<String, String>,
    params: Vec<Value>,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(dialect: Dialect, column_types: &'a HashMap<String, String>) -> Self {
        Self {
            dialect,
            column_types,
            params: Vec::new(),
        }
    }

    /// Whether PostgreSQL placeholders for `column` are cast to its type.
    pub(crate) fn casts(&self, column: &str) -> bool {
        self.column_types
            .get(column)
            .is_some_and(|ty| is_castable_pg_type(ty))
    }

    /// Placeholder for a value stored in `column`.
    pub(crate) fn typed(&mut self, column: &str, value: &Value) -> String {
        match self.dialect {
            Dialect::ClickHouse => self.dialect.literal(value),
            Dialect::Sqlite | Dialect::MySql => {
                self.params.push(value.clone());
                "?".to_string()
            }
            Dialect::Postgres => {
                self.params
                    .push(value_as_text(value).map_or(Value::Null, Value::String));
                let n = self.params.len();
                match self.column_types.get(column) {
                    Some(ty) if is_castable_pg_type(ty) => format!("CAST(${} AS {})", n, ty),
                    _ => format!("${}", n),
                }
            }
        }
    }

    /// Placeholder for a plain text value.
    pub(crate) fn text(&mut self, text: String) -> String {
        match self.dialect {
            Dialect::ClickHouse => self.dialect.string_literal(&text),
            Dialect::Sqlite | Dialect::MySql => {
                self.params.push(Value::String(text));
                "?".to_string()
            }
            Dialect::Postgres => {
                self.params.push(Value::String(text));
                format!("${}", self.params.len())
            }
        }
    }

    pub(crate) fn into_params(self) -> Vec<Value> {
        self.params
    }
}

/// PostgreSQL pseudo-types that cannot be the target of a CAST from text.
fn is_castable_pg_type(ty: &str) -> bool {
    let lowered = ty.to_ascii_lowercase();
    !(lowered.is_empty() || lowered == "user-defined" || lowered == "array" || lowered == "unknown")
}

/// Text form of a JSON value for binding as a string parameter.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// First keyword of a statement, uppercased, skipping leading comments.
pub fn leading_keyword(statement: &str) -> String {
    let mut rest = statement.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            break;
        }
    }
    rest.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident_per_dialect() {
        assert_eq!(Dialect::Sqlite.quote_ident("users"), "\"users\"");
        assert_eq!(Dialect::MySql.quote_ident("users"), "`users`");
        assert_eq!(Dialect::ClickHouse.quote_ident("a`b"), "`a``b`");
        assert_eq!(Dialect::Postgres.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_table_schema_qualified() {
        assert_eq!(
            Dialect::Postgres.quote_table("audit.events"),
            "\"audit\".\"events\""
        );
        assert_eq!(Dialect::MySql.quote_table("a.b"), "`a.b`");
    }

    #[test]
    fn test_literals() {
        assert_eq!(Dialect::ClickHouse.literal(&json!("it's")), "'it\\'s'");
        assert_eq!(Dialect::Postgres.literal(&json!("it's")), "'it''s'");
        assert_eq!(Dialect::ClickHouse.literal(&json!(42)), "42");
        assert_eq!(Dialect::Sqlite.literal(&json!(true)), "1");
        assert_eq!(Dialect::MySql.literal(&Value::Null), "NULL");
    }

    #[test]
    fn test_leading_keyword_skips_comments() {
        assert_eq!(leading_keyword("  select 1"), "SELECT");
        assert_eq!(leading_keyword("-- note\nWITH x AS (SELECT 1) SELECT * FROM x"), "WITH");
        assert_eq!(leading_keyword("/* hi */ insert into t values (1)"), "INSERT");
        assert_eq!(leading_keyword(""), "");
    }
}
