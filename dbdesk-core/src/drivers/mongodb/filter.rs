//! Translation of data-browsing filters into a MongoDB query document.

use super::values::coerce;
use crate::models::{DataOptions, Filter, FilterOperator, SortDirection};
use mongodb::bson::{Bson, Document, doc};
use std::collections::HashMap;

/// Converts a `%`/`_` pattern into an anchored regular expression.
pub(crate) fn like_pattern(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}

fn condition(filter: &Filter, field_types: &HashMap<String, String>) -> Option<Document> {
    let column = filter.column.as_str();
    let field_type = field_types.get(column).map(String::as_str);
    let value = || filter.value.as_ref().map(|v| coerce(v, field_type));

    let test = match filter.operator {
        FilterOperator::Equal => value()?,
        FilterOperator::NotEqual => Bson::Document(doc! { "$ne": value()? }),
        FilterOperator::GreaterThan => Bson::Document(doc! { "$gt": value()? }),
        FilterOperator::LessThan => Bson::Document(doc! { "$lt": value()? }),
        FilterOperator::GreaterOrEqual => Bson::Document(doc! { "$gte": value()? }),
        FilterOperator::LessOrEqual => Bson::Document(doc! { "$lte": value()? }),
        FilterOperator::Like | FilterOperator::NotLike => {
            let pattern = match filter.value.as_ref()? {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let regex = doc! { "$regex": like_pattern(&pattern), "$options": "i" };
            if filter.operator == FilterOperator::Like {
                Bson::Document(regex)
            } else {
                Bson::Document(doc! { "$not": regex })
            }
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let items = match value()? {
                Bson::Array(items) if !items.is_empty() => items,
                _ => return None,
            };
            let key = if filter.operator == FilterOperator::In { "$in" } else { "$nin" };
            Bson::Document(doc! { key: items })
        }
        // Null checks test field presence; a stored null still counts as present
        FilterOperator::IsNull => Bson::Document(doc! { "$exists": false }),
        FilterOperator::IsNotNull => Bson::Document(doc! { "$exists": true }),
    };
    Some(doc! { column: test })
}

/// Builds the query document for a set of filters.
///
/// A single condition is returned as is; two or more are wrapped in `$and`.
/// Set-membership filters without a non-empty array are dropped.
pub(crate) fn build_filter(filters: &[Filter], field_types: &HashMap<String, String>) -> Document {
    let mut conditions: Vec<Document> = filters
        .iter()
        .filter_map(|f| condition(f, field_types))
        .collect();
    match conditions.len() {
        0 => Document::new(),
        1 => conditions.remove(0),
        _ => doc! { "$and": conditions },
    }
}

/// Sort document for the requested column, if any.
pub(crate) fn sort_document(options: &DataOptions) -> Option<Document> {
    let column = options.sort_column.as_deref().filter(|c| !c.is_empty())?;
    let direction = match options.sort_direction {
        SortDirection::Asc => 1,
        SortDirection::Desc => -1,
    };
    Some(doc! { column: direction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use serde_json::json;

    fn types(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_single_filter_is_unwrapped() {
        let filters = [Filter::new("age", FilterOperator::GreaterThan, Some(json!(18)))];
        assert_eq!(build_filter(&filters, &HashMap::new()), doc! { "age": { "$gt": 18 } });
    }

    #[test]
    fn test_multiple_filters_use_and() {
        let filters = [
            Filter::new("age", FilterOperator::GreaterOrEqual, Some(json!(18))),
            Filter::new("email", FilterOperator::IsNotNull, None),
        ];
        assert_eq!(
            build_filter(&filters, &HashMap::new()),
            doc! { "$and": [
                { "age": { "$gte": 18 } },
                { "email": { "$exists": true } },
            ] }
        );
    }

    #[test]
    fn test_like_becomes_escaped_regex() {
        assert_eq!(like_pattern("a.b%"), r"^a\.b.*$");
        assert_eq!(like_pattern("_x(1)"), r"^.x\(1\)$");

        let filters = [Filter::new("name", FilterOperator::NotLike, Some(json!("%son")))];
        assert_eq!(
            build_filter(&filters, &HashMap::new()),
            doc! { "name": { "$not": { "$regex": "^.*son$", "$options": "i" } } }
        );
    }

    #[test]
    fn test_set_membership_needs_array() {
        let scalar = [Filter::new("tag", FilterOperator::In, Some(json!("a")))];
        assert_eq!(build_filter(&scalar, &HashMap::new()), Document::new());

        let empty = [Filter::new("tag", FilterOperator::NotIn, Some(json!([])))];
        assert_eq!(build_filter(&empty, &HashMap::new()), Document::new());

        let list = [Filter::new("tag", FilterOperator::NotIn, Some(json!(["a", "b"])))];
        assert_eq!(
            build_filter(&list, &types(&[("tag", "String")])),
            doc! { "tag": { "$nin": ["a", "b"] } }
        );
    }

    #[test]
    fn test_values_follow_sampled_types() {
        let hex = "507f1f77bcf86cd799439011";
        let filters = [Filter::new("_id", FilterOperator::Equal, Some(json!(hex)))];
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(
            build_filter(&filters, &types(&[("_id", "ObjectId")])),
            doc! { "_id": oid }
        );
        assert_eq!(
            build_filter(&filters, &types(&[("_id", "String")])),
            doc! { "_id": hex }
        );

        let filters = [Filter::new("zip", FilterOperator::Equal, Some(json!("01234")))];
        assert_eq!(
            build_filter(&filters, &types(&[("zip", "String")])),
            doc! { "zip": "01234" }
        );
    }

    #[test]
    fn test_null_checks_and_sort() {
        let filters = [Filter::new("deleted_at", FilterOperator::IsNull, None)];
        assert_eq!(
            build_filter(&filters, &HashMap::new()),
            doc! { "deleted_at": { "$exists": false } }
        );

        let options = DataOptions {
            sort_column: Some("created".to_string()),
            sort_direction: SortDirection::Desc,
            ..Default::default()
        };
        assert_eq!(sort_document(&options), Some(doc! { "created": -1 }));
        assert_eq!(sort_document(&DataOptions::default()), None);
    }
}
