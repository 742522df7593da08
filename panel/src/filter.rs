//! Wire-level filter descriptions and their compilation into a `WhereClause`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{Operator, Predicate, Verb, WhereClause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Is,
    IsNot,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    IsEmpty,
    IsNotEmpty,
    Gt,
    Gte,
    Lt,
    Lte,
    IsTrue,
    IsFalse,
    IsNull,
    IsNotNull,
    IsBefore,
    IsAfter,
    IsOnOrBefore,
    IsOnOrAfter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub column_name: String,
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub verb: Verb,
    /// Set on filters the UI pins to a view; compiled like any other.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_base: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub is_group: bool,
    #[serde(default)]
    pub verb: Verb,
    pub filters: Vec<FilterNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Filter(Filter),
}

impl FilterNode {
    fn verb(&self) -> Verb {
        match self {
            FilterNode::Group(g) => g.verb,
            FilterNode::Filter(f) => f.verb,
        }
    }
}

/// Append `filters` to `clause`. Groups become parenthesized sub-clauses.
pub fn compile(clause: &mut WhereClause, filters: &[FilterNode]) {
    for node in filters {
        match node {
            FilterNode::Group(group) => {
                let mut sub = WhereClause::new();
                compile(&mut sub, &group.filters);
                clause.push_group(node.verb(), sub);
            }
            FilterNode::Filter(filter) => {
                clause.push(node.verb(), leaf(filter));
            }
        }
    }
}

fn leaf(filter: &Filter) -> Predicate {
    let column = filter.column_name.clone();
    match filter.condition {
        Condition::IsNull => Predicate::is_null(column),
        Condition::IsNotNull => Predicate::is_not_null(column),
        condition => Predicate::compare(
            column,
            operator(condition),
            value(condition, filter.value.as_ref()),
        ),
    }
}

fn operator(condition: Condition) -> Operator {
    match condition {
        Condition::Contains
        | Condition::StartsWith
        | Condition::EndsWith
        | Condition::IsEmpty => Operator::Like,
        Condition::NotContains
        | Condition::NotStartsWith
        | Condition::NotEndsWith
        | Condition::IsNotEmpty => Operator::NotLike,
        Condition::Gt | Condition::IsAfter => Operator::Gt,
        Condition::Gte | Condition::IsOnOrAfter => Operator::Gte,
        Condition::Lt | Condition::IsBefore => Operator::Lt,
        Condition::Lte | Condition::IsOnOrBefore => Operator::Lte,
        Condition::IsNot => Operator::NotEq,
        _ => Operator::Eq,
    }
}

fn value(condition: Condition, raw: Option<&Value>) -> Value {
    match condition {
        Condition::Contains | Condition::NotContains => Value::String(format!("%{}%", text(raw))),
        Condition::StartsWith | Condition::NotStartsWith => {
            Value::String(format!("{}%", text(raw)))
        }
        Condition::EndsWith | Condition::NotEndsWith => Value::String(format!("%{}", text(raw))),
        Condition::IsEmpty | Condition::IsNotEmpty => Value::String(String::new()),
        Condition::IsTrue => Value::String("true".to_string()),
        Condition::IsFalse => Value::String("false".to_string()),
        _ => raw.cloned().unwrap_or(Value::Null),
    }
}

fn text(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Flavor, Select, Serializer};
    use serde_json::json;

    fn sql(filters: &[FilterNode]) -> (String, Vec<Value>) {
        let mut select = Select::new("posts");
        compile(&mut select.filter, filters);
        let mut params = Vec::new();
        let sql = Serializer::new(Flavor::Postgresql).serialize(&select.into(), &mut params);
        (sql, params)
    }

    fn filter(column: &str, condition: Condition, value: Option<Value>, verb: Verb) -> FilterNode {
        FilterNode::Filter(Filter {
            column_name: column.to_string(),
            condition,
            value,
            verb,
            is_base: false,
        })
    }

    #[test]
    fn null_checks_never_read_value() {
        let (sql, params) = sql(&[
            filter("deleted_at", Condition::IsNull, Some(json!("ignored")), Verb::And),
            filter("title", Condition::IsNotNull, Some(json!(42)), Verb::And),
        ]);
        assert_eq!(
            sql,
            r#"SELECT * FROM "posts" WHERE "deleted_at" IS NULL AND "title" IS NOT NULL"#
        );
        assert!(params.is_empty(), "null checks must not bind values");
    }

    #[test]
    fn contains_wraps_value() {
        let (sql, params) = sql(&[filter("title", Condition::Contains, Some(json!("x")), Verb::And)]);
        assert_eq!(sql, r#"SELECT * FROM "posts" WHERE "title" LIKE $1"#);
        assert_eq!(params, vec![json!("%x%")]);
    }

    #[test]
    fn value_transformations() {
        let (sql, params) = sql(&[
            filter("a", Condition::StartsWith, Some(json!("ab")), Verb::And),
            filter("b", Condition::NotEndsWith, Some(json!(7)), Verb::And),
            filter("c", Condition::IsEmpty, Some(json!("ignored")), Verb::And),
            filter("d", Condition::IsTrue, None, Verb::And),
            filter("e", Condition::IsNot, Some(json!(3)), Verb::And),
            filter("f", Condition::IsOnOrAfter, Some(json!("2024-01-01")), Verb::And),
        ]);
        assert_eq!(
            sql,
            r#"SELECT * FROM "posts" WHERE "a" LIKE $1 AND "b" NOT LIKE $2 AND "c" LIKE $3 AND "d" = $4 AND "e" != $5 AND "f" >= $6"#
        );
        assert_eq!(
            params,
            vec![
                json!("ab%"),
                json!("%7"),
                json!(""),
                json!("true"),
                json!(3),
                json!("2024-01-01")
            ]
        );
    }

    #[test]
    fn or_group_is_parenthesized_and_joined_by_group_verb() {
        let group = FilterNode::Group(FilterGroup {
            is_group: true,
            verb: Verb::And,
            filters: vec![
                filter("status", Condition::Is, Some(json!(1)), Verb::And),
                filter("status", Condition::Is, Some(json!(2)), Verb::Or),
            ],
        });
        let (sql, _) = sql(&[
            filter("author_id", Condition::Is, Some(json!(9)), Verb::And),
            group,
        ]);
        assert_eq!(
            sql,
            r#"SELECT * FROM "posts" WHERE "author_id" = $1 AND ("status" = $2 OR "status" = $3)"#
        );
    }

    #[test]
    fn first_filter_verb_is_ignored() {
        let (sql, _) = sql(&[
            filter("a", Condition::Is, Some(json!(1)), Verb::Or),
            filter("b", Condition::Gt, Some(json!(2)), Verb::Or),
        ]);
        assert_eq!(sql, r#"SELECT * FROM "posts" WHERE "a" = $1 OR "b" > $2"#);
    }

    #[test]
    fn groups_nest_recursively() {
        let inner = FilterNode::Group(FilterGroup {
            is_group: true,
            verb: Verb::Or,
            filters: vec![
                filter("c", Condition::Lt, Some(json!(3)), Verb::And),
                filter("d", Condition::Lte, Some(json!(4)), Verb::And),
            ],
        });
        let outer = FilterNode::Group(FilterGroup {
            is_group: true,
            verb: Verb::And,
            filters: vec![filter("b", Condition::Is, Some(json!(2)), Verb::And), inner],
        });
        let (sql, params) = sql(&[filter("a", Condition::Is, Some(json!(1)), Verb::And), outer]);
        assert_eq!(
            sql,
            r#"SELECT * FROM "posts" WHERE "a" = $1 AND ("b" = $2 OR ("c" < $3 AND "d" <= $4))"#
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn deserializes_wire_shape() {
        let nodes: Vec<FilterNode> = serde_json::from_value(json!([
            {"columnName": "status", "condition": "is", "value": "1", "verb": "and"},
            {"isGroup": true, "verb": "or", "filters": [
                {"columnName": "title", "condition": "contains", "value": "rust", "verb": "and"},
                {"columnName": "body", "condition": "is_not_empty", "verb": "or", "isBase": true}
            ]}
        ]))
        .unwrap();

        assert!(matches!(nodes[0], FilterNode::Filter(_)));
        match &nodes[1] {
            FilterNode::Group(g) => {
                assert_eq!(g.verb, Verb::Or);
                assert_eq!(g.filters.len(), 2);
            }
            other => panic!("expected group, got {other:?}"),
        }
    }
}
