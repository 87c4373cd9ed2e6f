//! Filter lists to SQL WHERE fragments.

use super::{Binder, Dialect, value_as_text};
use crate::models::{DataOptions, Filter, FilterOperator};
use serde_json::Value;
use std::collections::HashMap;

/// A WHERE condition and the parameters it binds, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    /// Condition text without the `WHERE` keyword; empty when nothing applies
    pub sql: String,
    /// Bound values
    pub params: Vec<Value>,
}

impl WhereClause {
    /// ` WHERE <condition>` or an empty string.
    pub fn to_where_sql(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }

    /// Whether no condition applies.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

struct Builder<'a> {
    dialect: Dialect,
    binder: Binder<'a>,
}

impl Builder<'_> {
    /// Left-hand side for a comparison against bound values.
    fn comparison_target(&self, column: &str) -> String {
        let quoted = self.dialect.quote_ident(column);
        match self.dialect {
            Dialect::Postgres if !self.binder.casts(column) => format!("CAST({} AS TEXT)", quoted),
            _ => quoted,
        }
    }

    /// Left-hand side for a pattern match.
    fn text_target(&self, column: &str) -> String {
        let quoted = self.dialect.quote_ident(column);
        match self.dialect {
            Dialect::Postgres => format!("CAST({} AS TEXT)", quoted),
            Dialect::ClickHouse => format!("toString({})", quoted),
            Dialect::Sqlite | Dialect::MySql => quoted,
        }
    }

    fn pattern(&mut self, value: &Value) -> String {
        self.binder.text(value_as_text(value).unwrap_or_default())
    }

    fn condition(&mut self, filter: &Filter) -> Option<String> {
        let column = filter.column.as_str();
        let quoted = self.dialect.quote_ident(column);
        match filter.operator {
            FilterOperator::IsNull => Some(format!("{} IS NULL", quoted)),
            FilterOperator::IsNotNull => Some(format!("{} IS NOT NULL", quoted)),
            FilterOperator::In | FilterOperator::NotIn => {
                let values = match filter.value.as_ref() {
                    Some(Value::Array(values)) if !values.is_empty() => values,
                    _ => return None,
                };
                let target = self.comparison_target(column);
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.binder.typed(column, v))
                    .collect();
                Some(format!(
                    "{} {} ({})",
                    target,
                    filter.operator.as_sql(),
                    placeholders.join(", ")
                ))
            }
            FilterOperator::Like | FilterOperator::NotLike => {
                let value = filter.value.as_ref()?;
                let target = self.text_target(column);
                let pattern = self.pattern(value);
                Some(format!("{} {} {}", target, filter.operator.as_sql(), pattern))
            }
            FilterOperator::Equal | FilterOperator::NotEqual if matches!(filter.value, Some(Value::Null)) => {
                let keyword = if filter.operator == FilterOperator::Equal {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                Some(format!("{} {}", quoted, keyword))
            }
            FilterOperator::Equal
            | FilterOperator::NotEqual
            | FilterOperator::GreaterThan
            | FilterOperator::LessThan
            | FilterOperator::GreaterOrEqual
            | FilterOperator::LessOrEqual => {
                let value = filter.value.as_ref()?;
                let target = self.comparison_target(column);
                let placeholder = self.binder.typed(column, value);
                Some(format!("{} {} {}", target, filter.operator.as_sql(), placeholder))
            }
        }
    }
}

/// Builds the WHERE condition for a filter list.
///
/// Filters are joined with AND. IN/NOT IN without a non-empty array, and
/// comparisons without a value, contribute nothing. `column_types` maps
/// column names to declared types and is only consulted for PostgreSQL
/// casts.
///
/// # Example
/// ```rust
/// use dbdesk_core::models::{Filter, FilterOperator};
/// use dbdesk_core::sql::{Dialect, build_where_clause};
/// use std::collections::HashMap;
///
/// let filters = vec![Filter::new("age", FilterOperator::GreaterThan, Some(18.into()))];
/// let clause = build_where_clause(&filters, Dialect::MySql, &HashMap::new());
/// assert_eq!(clause.sql, "`age` > ?");
/// assert_eq!(clause.params, vec![serde_json::json!(18)]);
/// ```
pub fn build_where_clause(
    filters: &[Filter],
    dialect: Dialect,
    column_types: &HashMap<String, String>,
) -> WhereClause {
    let mut builder = Builder {
        dialect,
        binder: Binder::new(dialect, column_types),
    };
    let conditions: Vec<String> = filters
        .iter()
        .filter_map(|f| builder.condition(f))
        .collect();
    WhereClause {
        sql: conditions.join(" AND "),
        params: builder.binder.into_params(),
    }
}

/// ` ORDER BY ... LIMIT n OFFSET m` for data browsing.
pub fn order_and_page(dialect: Dialect, options: &DataOptions, default_limit: u64) -> String {
    let mut sql = String::new();
    if let Some(column) = options.sort_column.as_deref().filter(|c| !c.is_empty()) {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            dialect.quote_ident(column),
            options.sort_direction.as_sql()
        ));
    }
    sql.push_str(&format!(
        " LIMIT {} OFFSET {}",
        options.limit_or(default_limit),
        options.offset_or_zero()
    ));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortDirection;
    use serde_json::json;

    fn no_types() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_single_filter_mysql() {
        let filters = vec![Filter::new("age", FilterOperator::GreaterThan, Some(json!(18)))];
        let clause = build_where_clause(&filters, Dialect::MySql, &no_types());
        assert_eq!(clause.sql, "`age` > ?");
        assert_eq!(clause.params, vec![json!(18)]);
        assert_eq!(clause.to_where_sql(), " WHERE `age` > ?");
    }

    #[test]
    fn test_filters_join_with_and() {
        let filters = vec![
            Filter::new("age", FilterOperator::GreaterOrEqual, Some(json!(18))),
            Filter::new("name", FilterOperator::Like, Some(json!("A%"))),
        ];
        let clause = build_where_clause(&filters, Dialect::Sqlite, &no_types());
        assert_eq!(clause.sql, "\"age\" >= ? AND \"name\" LIKE ?");
        assert_eq!(clause.params, vec![json!(18), json!("A%")]);
    }

    #[test]
    fn test_in_requires_non_empty_array() {
        let filters = vec![
            Filter::new("id", FilterOperator::In, Some(json!([1, 2, 3]))),
            Filter::new("x", FilterOperator::In, Some(json!([]))),
            Filter::new("y", FilterOperator::NotIn, Some(json!(5))),
        ];
        let clause = build_where_clause(&filters, Dialect::MySql, &no_types());
        assert_eq!(clause.sql, "`id` IN (?, ?, ?)");
        assert_eq!(clause.params.len(), 3);
    }

    #[test]
    fn test_null_checks_take_no_value() {
        let filters = vec![
            Filter::new("deleted_at", FilterOperator::IsNull, None),
            Filter::new("email", FilterOperator::IsNotNull, Some(json!("ignored"))),
        ];
        let clause = build_where_clause(&filters, Dialect::Postgres, &no_types());
        assert_eq!(
            clause.sql,
            "\"deleted_at\" IS NULL AND \"email\" IS NOT NULL"
        );
        assert!(clause.params.is_empty());
    }

    #[test]
    fn test_equal_null_becomes_is_null() {
        let filters = vec![Filter::new("a", FilterOperator::Equal, Some(Value::Null))];
        let clause = build_where_clause(&filters, Dialect::MySql, &no_types());
        assert_eq!(clause.sql, "`a` IS NULL");
    }

    #[test]
    fn test_postgres_casts_known_types() {
        let mut types = HashMap::new();
        types.insert("age".to_string(), "integer".to_string());
        let filters = vec![
            Filter::new("age", FilterOperator::GreaterThan, Some(json!(18))),
            Filter::new("name", FilterOperator::Equal, Some(json!("bob"))),
            Filter::new("bio", FilterOperator::NotLike, Some(json!("%spam%"))),
        ];
        let clause = build_where_clause(&filters, Dialect::Postgres, &types);
        assert_eq!(
            clause.sql,
            "\"age\" > CAST($1 AS integer) AND CAST(\"name\" AS TEXT) = $2 AND CAST(\"bio\" AS TEXT) NOT LIKE $3"
        );
        assert_eq!(clause.params, vec![json!("18"), json!("bob"), json!("%spam%")]);
    }

    #[test]
    fn test_clickhouse_inlines_literals() {
        let filters = vec![
            Filter::new("status", FilterOperator::NotEqual, Some(json!("it's"))),
            Filter::new("id", FilterOperator::NotIn, Some(json!([1, 2]))),
            Filter::new("path", FilterOperator::Like, Some(json!("/api%"))),
        ];
        let clause = build_where_clause(&filters, Dialect::ClickHouse, &no_types());
        assert_eq!(
            clause.sql,
            "`status` != 'it\\'s' AND `id` NOT IN (1, 2) AND toString(`path`) LIKE '/api%'"
        );
        assert!(clause.params.is_empty());
    }

    #[test]
    fn test_order_and_page() {
        let options = DataOptions {
            sort_column: Some("created".to_string()),
            sort_direction: SortDirection::Desc,
            limit: Some(25),
            offset: Some(50),
            ..Default::default()
        };
        assert_eq!(
            order_and_page(Dialect::MySql, &options, 100),
            " ORDER BY `created` DESC LIMIT 25 OFFSET 50"
        );
        assert_eq!(
            order_and_page(Dialect::Sqlite, &DataOptions::default(), 100),
            " LIMIT 100 OFFSET 0"
        );
    }
}
